fn main() {
    tripdesk_lib::run()
}
