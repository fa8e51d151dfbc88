//! RTVI Session Client
//!
//! Client side of a real-time voice agent session: authenticate, start the
//! remote bot, connect a transport, then exchange control messages and keep
//! the bot's pipeline configuration in sync.
//!
//! - [`client`]: the [`SessionClient`] orchestrator and its options.
//! - [`transport`]: the [`Transport`] contract plus WebSocket and mock implementations.
//! - [`messages`]: the `{type, tag, data}` control message protocol.
//! - [`events`]: typed event registries.
//! - [`handshake`]: pluggable authentication and bot provisioning.
//! - [`config`]: the per-service configuration model and its merge policy.

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod handshake;
pub mod messages;
mod sync;
pub mod transport;

pub use client::{ClientOptions, SessionClient, TransportEvents};
pub use config::{ClientConfig, LlmMessage, ServiceOptions};
pub use errors::SessionError;
pub use events::{EventBus, EventCallbacks, SubscriptionId};
pub use handshake::{AuthBundle, Handshake, HttpHandshake, StaticHandshake};
pub use messages::{ControlMessage, MessageType, ToolCall, Transcript};
pub use transport::{
    ConnectionDescriptor, Participant, Track, TrackKind, Tracks, Transport, TransportError,
    TransportState,
};
