//! Typed Session Events
//!
//! Every event a session can publish has its own [`Registry`], holding the
//! payload type of that event. A registry delivers each occurrence to:
//!
//! 1. the global handler supplied through [`EventCallbacks`] at construction,
//! 2. runtime subscribers, in registration order,
//! 3. channel listeners created with [`Registry::listen`].
//!
//! Handlers run synchronously on the emitting task. A panicking handler is
//! logged and skipped; delivery to the remaining handlers continues.

use crate::{
    config::ClientConfig,
    messages::{ToolCall, Transcript},
    sync::lock,
    transport::{Participant, Track, TransportState},
};
use serde_json::Value;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::warn;

/// A shared event handler receiving a reference to the payload.
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Identifies a runtime subscription, for [`Registry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Subscribers of a single event key.
pub struct Registry<A> {
    name: &'static str,
    global: Option<Handler<A>>,
    subscribers: Mutex<Vec<(SubscriptionId, Handler<A>)>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<A>>>,
}

impl<A: Clone + Send + 'static> Registry<A> {
    fn new(name: &'static str, global: Option<Handler<A>>) -> Self {
        Self {
            name,
            global,
            subscribers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The event key, as used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(handler)));
        id
    }

    /// Removes a runtime subscriber. Returns `false` if it was not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Returns a channel receiving a clone of every future payload.
    ///
    /// The channel is unbounded so the emitter never waits on a slow
    /// consumer. Dropping the receiver ends the subscription.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<A> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len() + lock(&self.listeners).len()
    }

    /// Delivers `payload` to the global handler, then to every subscriber.
    pub fn emit(&self, payload: &A) {
        if let Some(global) = &self.global {
            self.invoke(global, payload);
        }

        // Snapshot so handlers may (un)subscribe while being called.
        let subscribers: Vec<Handler<A>> = lock(&self.subscribers)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in &subscribers {
            self.invoke(handler, payload);
        }

        lock(&self.listeners).retain(|tx| tx.send(payload.clone()).is_ok());
    }

    fn invoke(&self, handler: &Handler<A>, payload: &A) {
        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            warn!(event = self.name, "Event handler panicked; continuing delivery.");
        }
    }
}

impl<A> fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("global", &self.global.is_some())
            .finish_non_exhaustive()
    }
}

macro_rules! event_catalog {
    ($( $(#[$doc:meta])* $key:ident => $builder:ident($payload:ty) ),* $(,)?) => {
        /// The closed set of session events, one [`Registry`] per key.
        #[derive(Debug)]
        pub struct EventBus {
            $( $(#[$doc])* pub $key: Registry<$payload>, )*
        }

        impl EventBus {
            /// Creates the bus with the given global handlers.
            pub fn new(callbacks: EventCallbacks) -> Self {
                Self {
                    $( $key: Registry::new(stringify!($key), callbacks.$key), )*
                }
            }
        }

        impl Default for EventBus {
            fn default() -> Self {
                Self::new(EventCallbacks::default())
            }
        }

        /// Global handlers, at most one per event, fixed at construction.
        #[derive(Clone, Default)]
        pub struct EventCallbacks {
            $( pub $key: Option<Handler<$payload>>, )*
        }

        impl EventCallbacks {
            $(
                pub fn $builder(mut self, handler: impl Fn(&$payload) + Send + Sync + 'static) -> Self {
                    self.$key = Some(Arc::new(handler));
                    self
                }
            )*
        }

        impl fmt::Debug for EventCallbacks {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut set = f.debug_set();
                $( if self.$key.is_some() { set.entry(&stringify!($key)); } )*
                set.finish()
            }
        }
    };
}

event_catalog! {
    /// The transport joined the session.
    connected => on_connected(()),
    /// The transport left the session.
    disconnected => on_disconnected(()),
    transport_state_changed => on_transport_state_changed(TransportState),
    /// The local configuration changed (fires whether or not it was sent).
    config_updated => on_config_updated(ClientConfig),
    participant_connected => on_participant_connected(Participant),
    participant_left => on_participant_left(Participant),
    /// The remote agent joined the session.
    bot_connected => on_bot_connected(Participant),
    bot_disconnected => on_bot_disconnected(Participant),
    track_started => on_track_started((Track, Option<Participant>)),
    track_stopped => on_track_stopped((Track, Option<Participant>)),
    bot_started_talking => on_bot_started_talking(Participant),
    bot_stopped_talking => on_bot_stopped_talking(Participant),
    local_started_talking => on_local_started_talking(()),
    local_stopped_talking => on_local_stopped_talking(()),
    local_audio_level => on_local_audio_level(f32),
    remote_audio_level => on_remote_audio_level((f32, Participant)),
    json_completion => on_json_completion(String),
    transcript => on_transcript(Transcript),
    /// The agent's LLM context, in reply to a context request.
    llm_context => on_llm_context(Value),
    /// The agent accepted a configuration update.
    bot_config_updated => on_bot_config_updated(ClientConfig),
    /// The agent rejected a configuration update.
    config_error => on_config_error(String),
    tool_call => on_tool_call(ToolCall),
}
