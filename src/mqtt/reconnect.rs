// src/mqtt/reconnect.rs
//
// Reconnect supervisor. Watches session status and, when the connection
// drops while the owner still wants it up, waits one period and connects
// again. Fixed period, no backoff. Explicit disconnect()/reset() switch it off
// until the next connect().

use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::session::{ConnectionStatus, SessionManager};

/// Spawn the supervisor. Returns None when `period` is zero (disabled).
/// Abort the handle to stop it.
pub fn spawn_supervisor(session: SessionManager, period: Duration) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }

    let mut status = session.watch_status();
    Some(tokio::spawn(async move {
        loop {
            if status.changed().await.is_err() {
                return;
            }
            let current = *status.borrow_and_update();
            if current != ConnectionStatus::Disconnected || !session.wants_connection() {
                continue;
            }

            tokio::time::sleep(period).await;

            if session.status() != ConnectionStatus::Disconnected || !session.wants_connection() {
                continue;
            }

            tlog!("[reconnect] Session dropped, reconnecting");
            match session.connect().await {
                Ok(()) => tlog!("[reconnect] Reconnected"),
                Err(e) => tlog!("[reconnect] Reconnect failed: {}", e),
            }
        }
    }))
}
