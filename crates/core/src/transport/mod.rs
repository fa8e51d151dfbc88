//! The capability contract every media/data transport must satisfy.
//!
//! A transport joins the real-time session described by a
//! [`ConnectionDescriptor`], carries control messages over its data channel
//! and reports lifecycle occurrences back through the [`TransportEvents`]
//! adapter it receives from the session client.

pub mod mock;
pub mod websocket;

use crate::messages::ControlMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::client::TransportEvents;
pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

/// Lifecycle of one connection attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Idle,
    Handshaking,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl TransportState {
    /// `error` and `disconnected` end an attempt; a new `start()` begins the next one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Disconnected)
    }

    /// Whether an attempt is in flight or live.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Handshaking | Self::Connecting | Self::Connected)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Within an attempt the order is `idle → handshaking → connecting →
    /// connected`; `error` is reachable from any non-terminal state, and
    /// `disconnected` from `connected` or as a cancel of an attempt in flight.
    /// A terminal state may only restart the cycle at `handshaking`.
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        match (self, next) {
            (from, to) if from == to => false,
            (Idle, Handshaking) | (Handshaking, Connecting) | (Connecting, Connected) => true,
            // Transports driven without a handshake connect straight from idle.
            (Idle, Connecting) => true,
            (from, Error) => !from.is_terminal(),
            (Handshaking | Connecting | Connected, Disconnected) => true,
            (Error | Disconnected, Handshaking | Idle) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of the real-time session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    /// `true` for this client, `false` for remote members such as the agent.
    pub local: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, local: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            local,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to a media stream owned by the transport.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
}

/// Audio/video tracks of one side of the session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaTracks {
    pub audio: Option<Track>,
    pub video: Option<Track>,
}

impl MediaTracks {
    pub fn get(&self, kind: TrackKind) -> Option<&Track> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }
}

/// Snapshot of the current tracks, local and agent side.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Tracks {
    pub local: MediaTracks,
    pub bot: MediaTracks,
}

/// Credentials for joining a transport session, obtained from the handshake.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Room URL or session identifier.
    pub url: String,
    pub token: String,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),
    /// There is no live data channel to send on.
    #[error("transport is not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The operations a session client needs from a transport.
///
/// Implementations must invoke the [`TransportEvents`] passed to
/// [`attach`](Transport::attach) synchronously, in order, at the point each
/// occurrence happens. In particular, [`set_state`](Transport::set_state)
/// must call [`TransportEvents::state_changed`] before returning.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hands the transport its event adapter. Called exactly once, before any
    /// other method.
    fn attach(&mut self, events: TransportEvents);

    /// Joins the session. Must only report `connected` once fully joined.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError>;

    /// Leaves the session. A no-op when not connected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Best-effort delivery over the data channel: no acknowledgement, no retry.
    fn send_message(&self, message: ControlMessage) -> Result<(), TransportError>;

    fn enable_mic(&self, enable: bool);

    fn is_mic_enabled(&self) -> bool;

    fn enable_cam(&self, enable: bool);

    fn is_cam_enabled(&self) -> bool;

    fn state(&self) -> TransportState;

    fn set_state(&self, state: TransportState);

    fn tracks(&self) -> Tracks;
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportState::*;

    #[test]
    fn test_forward_path_is_allowed() {
        assert!(Idle.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_backward_and_terminal_moves_are_rejected() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(Handshaking));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Error));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Disconnected));
    }

    #[test]
    fn test_error_reachable_from_non_terminal_states() {
        for state in [Idle, Handshaking, Connecting, Connected] {
            assert!(state.can_transition_to(Error), "{state} -> error");
        }
    }

    #[test]
    fn test_terminal_states_restart_at_handshaking() {
        assert!(Error.can_transition_to(Handshaking));
        assert!(Disconnected.can_transition_to(Handshaking));
        assert!(Error.is_terminal());
        assert!(!Connected.is_terminal());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Handshaking).unwrap(), "\"handshaking\"");
        assert_eq!(Connected.to_string(), "connected");
    }

    #[test]
    fn test_descriptor_debug_redacts_token() {
        let descriptor = ConnectionDescriptor {
            url: "wss://example/room".into(),
            token: "secret".into(),
        };
        assert!(!format!("{descriptor:?}").contains("secret"));
    }
}
