#[macro_use]
mod logging;

pub mod api;
pub mod chat;
pub mod credentials;
pub mod error;
pub mod models;
pub mod mqtt;
pub mod settings;
pub mod topics;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;

use api::ApiClient;
use chat::ChatChannel;
use error::AppError;
use models::{Trip, TripStatus};
use mqtt::{reconnect, RumqttTransport, SessionManager};
use settings::AppSettings;

pub use logging::{init_file_logging, stop_file_logging};

/// Trip dispatch console: trips over REST, driver messaging over MQTT
#[derive(Parser, Debug)]
#[command(name = "tripdesk", version)]
struct Cli {
    /// Settings file (defaults to <config dir>/tripdesk/settings.json)
    #[arg(long, global = true, env = "TRIPDESK_SETTINGS")]
    settings: Option<PathBuf>,

    /// Mirror log output to a timestamped file in this directory
    #[arg(long, global = true, env = "TRIPDESK_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage trips on the backend
    Trips {
        #[command(subcommand)]
        command: TripsCommand,
    },

    /// List pending trip patches
    Patches,

    /// Tell a driver's device to wipe its local data
    ResetDriver {
        /// Driver code, as shown on the device
        code: String,
    },

    /// Fetch a trip and broadcast it on `trip_update`
    BroadcastTrip { id: i64 },

    /// Interactive chat with a driver (one line per message, Ctrl-C to leave)
    Chat { driver_id: String },

    /// Print every message received on the given topics
    Watch {
        #[arg(required = true)]
        topics: Vec<String>,
    },

    /// Inspect the settings file
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Manage the broker password in the OS keyring
    Credential {
        #[command(subcommand)]
        command: CredentialCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TripsCommand {
    /// One line per trip: id, status, expected start, source -> destination
    List {
        /// Print the raw JSON instead
        #[arg(long)]
        json: bool,
    },
    Get {
        id: i64,
    },
    /// Create a trip from a JSON file, or a blank draft
    Create {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Replace a trip from a JSON file and/or change its status
    Update {
        id: i64,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        status: Option<TripStatus>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print effective settings (password redacted)
    Show,
    /// Print the settings file location
    Path,
}

#[derive(Subcommand, Debug)]
enum CredentialCommand {
    /// Store the password for the configured broker user (read from stdin)
    Set,
    /// Remove the stored password
    Clear,
}

/// Entry point for the `tripdesk` binary
pub fn run() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(execute(cli));
    stop_file_logging();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<(), AppError> {
    let settings = settings::load_settings(cli.settings.as_deref())?;

    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| settings.log_dir.as_ref().map(PathBuf::from));
    if let Some(dir) = log_dir {
        if let Err(e) = init_file_logging(&dir) {
            tlog!("[setup] Could not start file logging in {}: {}", dir.display(), e);
        }
    }

    match cli.command {
        Command::Trips { command } => trips(&settings, command).await,
        Command::Patches => {
            let patches = ApiClient::new(&settings.api_base_url)?.list_patches().await?;
            print_json(&patches)
        }
        Command::ResetDriver { code } => reset_driver(&settings, &code).await,
        Command::BroadcastTrip { id } => broadcast(&settings, id).await,
        Command::Chat { driver_id } => chat(&settings, &driver_id).await,
        Command::Watch { topics } => watch(&settings, &topics).await,
        Command::Settings { command } => match command {
            SettingsCommand::Show => print_json(&redacted(&settings)),
            SettingsCommand::Path => {
                let path = match cli.settings {
                    Some(p) => p,
                    None => settings::settings_path()?,
                };
                println!("{}", path.display());
                Ok(())
            }
        },
        Command::Credential { command } => credential(&settings, command).await,
    }
}

async fn trips(settings: &AppSettings, command: TripsCommand) -> Result<(), AppError> {
    let client = ApiClient::new(&settings.api_base_url)?;
    match command {
        TripsCommand::List { json } => {
            let trips = client.list_trips().await?;
            if json {
                return print_json(&trips);
            }
            for trip in &trips {
                println!("{}", trip_line(trip));
            }
            Ok(())
        }
        TripsCommand::Get { id } => print_json(&client.get_trip(id).await?),
        TripsCommand::Create { file } => {
            let trip = match file {
                Some(path) => read_trip(&path)?,
                None => Trip::draft(),
            };
            print_json(&client.create_trip(&trip).await?)
        }
        TripsCommand::Update { id, file, status } => {
            if file.is_none() && status.is_none() {
                return Err(AppError::Usage(
                    "nothing to update: pass --file and/or --status".to_string(),
                ));
            }
            let mut trip = match file {
                Some(path) => read_trip(&path)?,
                None => client.get_trip(id).await?,
            };
            if let Some(status) = status {
                trip.status = status;
            }
            print_json(&client.update_trip(id, &trip).await?)
        }
    }
}

async fn reset_driver(settings: &AppSettings, code: &str) -> Result<(), AppError> {
    if code.trim().is_empty() {
        return Err(AppError::Usage("driver code must not be empty".to_string()));
    }
    let session = build_session(settings);
    let lease = session.lease("reset");
    lease.acquire().await?;
    topics::send_reset_command(lease.session(), code).await?;
    println!("Reset command sent to driver {}", code.trim());
    Ok(())
}

async fn broadcast(settings: &AppSettings, id: i64) -> Result<(), AppError> {
    let trip = ApiClient::new(&settings.api_base_url)?.get_trip(id).await?;
    let session = build_session(settings);
    let lease = session.lease("broadcast");
    lease.acquire().await?;
    topics::broadcast_trip(lease.session(), &trip).await?;
    println!("Trip {} broadcast on {}", trip.id, topics::TRIP_UPDATE_TOPIC);
    Ok(())
}

async fn chat(settings: &AppSettings, driver_id: &str) -> Result<(), AppError> {
    let session = build_session(settings);
    let sender_id = settings
        .chat_sender_id
        .clone()
        .unwrap_or_else(chat::generate_sender_id);

    let channel = ChatChannel::open(&session, driver_id, &sender_id);
    let mut feed = channel.subscribe_messages();
    let mut status = session.watch_status();
    let supervisor = reconnect::spawn_supervisor(
        session.clone(),
        Duration::from_millis(settings.broker.reconnect_period_ms),
    );

    let lease = session.lease("chat");
    lease.acquire().await?;
    println!(
        "Chatting with driver {} as {} (Ctrl-C to quit)",
        channel.driver_id(),
        sender_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(text) => {
                    if let Err(e) = channel.send(&text).await {
                        println!("! not sent: {}", e);
                    }
                }
                None => break,
            },
            received = feed.recv() => match received {
                Ok(message) if message.sender == chat::Sender::Other => {
                    println!("[{}] {}", message.timestamp.format("%H:%M:%S"), message.text);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tlog!("[chat] Display fell behind, skipped {} message(s)", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                println!("-- {:?}", current);
            }
        }
    }

    if let Some(handle) = supervisor {
        handle.abort();
    }
    channel.close();
    lease.release();
    session.reset();
    Ok(())
}

async fn watch(settings: &AppSettings, topics: &[String]) -> Result<(), AppError> {
    let session = build_session(settings);
    for topic in topics {
        let name = topic.clone();
        session.subscribe(topic, move |payload| {
            println!("{} {}", name, payload);
        });
    }
    let supervisor = reconnect::spawn_supervisor(
        session.clone(),
        Duration::from_millis(settings.broker.reconnect_period_ms),
    );

    let lease = session.lease("watch");
    lease.acquire().await?;
    tlog!("[watch] Listening on {} topic(s)", topics.len());

    tokio::signal::ctrl_c().await?;

    if let Some(handle) = supervisor {
        handle.abort();
    }
    lease.release();
    session.reset();
    Ok(())
}

async fn credential(settings: &AppSettings, command: CredentialCommand) -> Result<(), AppError> {
    let host = &settings.broker.host;
    let username = settings.broker.username.as_deref().ok_or_else(|| {
        AppError::Usage("no broker username configured (set broker.username)".to_string())
    })?;

    match command {
        CredentialCommand::Set => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let password = lines
                .next_line()
                .await?
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.is_empty())
                .ok_or_else(|| AppError::Usage("no password given on stdin".to_string()))?;
            credentials::store_broker_password(host, username, &password)?;
            println!("Stored password for {}@{}", username, host);
        }
        CredentialCommand::Clear => {
            credentials::delete_broker_password(host, username)?;
            println!("Cleared password for {}@{}", username, host);
        }
    }
    Ok(())
}

/// One session per process, backed by the configured broker
fn build_session(settings: &AppSettings) -> SessionManager {
    let mut broker = settings.broker.clone();
    credentials::resolve_broker_password(&mut broker);
    SessionManager::new(RumqttTransport::new(broker))
}

fn trip_line(trip: &Trip) -> String {
    let start = trip
        .expected_start_time
        .as_millis()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    let stops = trip.ordered_stops();
    let (source, destination) = match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => (first.name.as_str(), last.name.as_str()),
        _ => ("Unknown", "Unknown"),
    };

    format!(
        "{:>6}  {:<11}  {:<16}  {} -> {}",
        trip.id,
        trip.status.as_str(),
        start,
        source,
        destination
    )
}

fn read_trip(path: &Path) -> Result<Trip, AppError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn redacted(settings: &AppSettings) -> AppSettings {
    let mut shown = settings.clone();
    if shown.broker.password.is_some() {
        shown.broker.password = Some("********".to_string());
    }
    shown
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
