use crate::transport::{TransportError, TransportState};

/// Errors surfaced by [`SessionClient`](crate::client::SessionClient).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The handshake completed but yielded no usable connection descriptor.
    /// The server treats this as "busy".
    #[error("server is at capacity: no connection descriptor was returned")]
    Capacity,
    /// The request to start the remote agent failed.
    #[error("failed to start bot at URL {room}")]
    Provisioning {
        room: String,
        #[source]
        source: anyhow::Error,
    },
    /// Handshake or provisioning did not finish before the deadline, or was cancelled.
    #[error("handshake timed out")]
    Timeout,
    /// A connected-only operation was attempted without a live connection.
    #[error("{0} while transport not in connected state")]
    OperationNotPermitted(&'static str),
    /// `start()` was called while another attempt is in flight or live.
    #[error("session already started (state: {0})")]
    AlreadyStarted(TransportState),
    /// The authentication request itself failed.
    #[error("handshake failed: {0}")]
    Handshake(#[source] anyhow::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Provisioning {
            room: "https://example.daily.co/room".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "failed to start bot at URL https://example.daily.co/room"
        );

        let err = SessionError::OperationNotPermitted("Attempted to speak");
        assert_eq!(
            err.to_string(),
            "Attempted to speak while transport not in connected state"
        );

        let err = SessionError::AlreadyStarted(TransportState::Connecting);
        assert_eq!(err.to_string(), "session already started (state: connecting)");
    }
}
