// src/mqtt/lease.rs
//
// Lease tracking for the shared session.
// Each feature (chat, reset commands, trip broadcast) holds a lease instead of
// owning the connection. The session disconnects only when the last holder
// releases; nobody tears the connection down underneath another feature.
//
// A holder may take several leases (e.g. two chat panes); it counts as one
// holder until all of them are released.

use super::session::SessionManager;
use crate::error::SessionError;

pub struct SessionLease {
    session: SessionManager,
    holder: String,
    released: bool,
}

impl SessionManager {
    /// Register `holder` as a user of this session. Does not connect;
    /// call [`SessionLease::acquire`] for that.
    pub fn lease(&self, holder: &str) -> SessionLease {
        let count = self.register_holder(holder);
        tlog!(
            "[lease] '{}' took a lease (holds {}, holders: {})",
            holder,
            count,
            self.holders().len()
        );
        SessionLease {
            session: self.clone(),
            holder: holder.to_string(),
            released: false,
        }
    }
}

impl SessionLease {
    /// Ensure the session is connected
    pub async fn acquire(&self) -> Result<(), SessionError> {
        self.session.connect().await
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Give the lease back. Same as dropping it.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let remaining = self.session.release_holder(&self.holder);
        tlog!(
            "[lease] '{}' released its lease (remaining holders: {})",
            self.holder,
            remaining
        );
        if remaining == 0 {
            tlog!("[lease] Last holder gone, disconnecting session");
            self.session.disconnect();
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use crate::mqtt::mock::MockTransport;
    use crate::mqtt::ConnectionStatus;

    #[tokio::test]
    async fn test_last_release_disconnects() {
        let mock = MockTransport::new();
        let session = mock.session();

        let chat = session.lease("chat");
        let reset = session.lease("reset");
        chat.acquire().await.unwrap();
        reset.acquire().await.unwrap();
        assert_eq!(mock.opens(), 1);
        assert_eq!(session.holders(), vec!["chat".to_string(), "reset".to_string()]);

        chat.release();
        assert!(session.is_connected());

        drop(reset);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.holders().is_empty());
    }

    #[tokio::test]
    async fn test_same_holder_counts_leases() {
        let mock = MockTransport::new();
        let session = mock.session();

        let first = session.lease("chat");
        let second = session.lease("chat");
        first.acquire().await.unwrap();
        assert_eq!(session.holders(), vec!["chat".to_string()]);

        drop(first);
        assert!(session.is_connected());
        assert_eq!(session.holders(), vec!["chat".to_string()]);

        drop(second);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_failed_acquire_keeps_lease() {
        let mock = MockTransport::new();
        let session = mock.session();
        mock.fail_next_open(crate::error::TransportError::Connect("refused".into()));

        let lease = session.lease("broadcast");
        assert!(lease.acquire().await.is_err());
        assert_eq!(lease.holder(), "broadcast");
        assert_eq!(session.holders(), vec!["broadcast".to_string()]);

        lease.acquire().await.unwrap();
        assert!(lease.session().is_connected());
    }
}
