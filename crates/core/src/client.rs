//! The session client.
//!
//! [`SessionClient`] drives the handshake → provisioning → connect sequence,
//! owns the pipeline configuration, turns commands into control messages and
//! republishes everything the transport reports through the [`EventBus`].

use crate::{
    config::{ClientConfig, LLM_SERVICE, LlmMessage, ServiceOptions},
    errors::{Result, SessionError},
    events::{EventBus, EventCallbacks},
    handshake::{Handshake, HttpHandshake},
    messages::{ControlMessage, InboundMessage, MalformedMessage},
    sync::lock,
    transport::{
        ConnectionDescriptor, Participant, Track, Tracks, Transport, TransportState,
        WebSocketTransport,
    },
};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://rtvi.pipecat.bot";

/// Everything a [`SessionClient`] is constructed with.
#[derive(Clone)]
pub struct ClientOptions {
    /// Base URL of the authentication and bot-start endpoints.
    pub base_url: String,
    /// Headers sent with the handshake requests.
    pub start_headers: BTreeMap<String, String>,
    /// Extra body fields sent with the handshake requests.
    pub start_params: Map<String, Value>,
    /// Initial pipeline configuration.
    pub config: ClientConfig,
    /// Global event handlers.
    pub callbacks: EventCallbacks,
    /// Deadline for authentication plus provisioning. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Capture the microphone once connected.
    pub enable_mic: bool,
    /// Capture the camera once connected.
    pub enable_cam: bool,
    /// Aborts an in-flight handshake when cancelled.
    pub cancellation: Option<CancellationToken>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            start_headers: BTreeMap::new(),
            start_params: Map::new(),
            config: ClientConfig::default(),
            callbacks: EventCallbacks::default(),
            timeout: None,
            enable_mic: true,
            enable_cam: false,
            cancellation: None,
        }
    }
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_callbacks(mut self, callbacks: EventCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.start_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.start_params.insert(name.into(), value);
        self
    }

    pub fn with_mic(mut self, enable: bool) -> Self {
        self.enable_mic = enable;
        self
    }

    pub fn with_cam(mut self, enable: bool) -> Self {
        self.enable_cam = enable;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("start_headers", &self.start_headers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .field("timeout", &self.timeout)
            .field("enable_mic", &self.enable_mic)
            .field("enable_cam", &self.enable_cam)
            .finish_non_exhaustive()
    }
}

/// The adapter a transport reports through.
///
/// Built once by the session client. Each method forwards one transport
/// occurrence to the session's [`EventBus`], where the caller's global
/// handler runs first and runtime subscribers after it.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    bus: Arc<EventBus>,
}

impl TransportEvents {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn connected(&self) {
        self.bus.connected.emit(&());
    }

    pub fn disconnected(&self) {
        self.bus.disconnected.emit(&());
    }

    pub fn state_changed(&self, state: TransportState) {
        self.bus.transport_state_changed.emit(&state);
    }

    pub fn participant_joined(&self, participant: &Participant) {
        self.bus.participant_connected.emit(participant);
    }

    pub fn participant_left(&self, participant: &Participant) {
        self.bus.participant_left.emit(participant);
    }

    pub fn bot_connected(&self, participant: &Participant) {
        self.bus.bot_connected.emit(participant);
    }

    pub fn bot_disconnected(&self, participant: &Participant) {
        self.bus.bot_disconnected.emit(participant);
    }

    pub fn track_started(&self, track: &Track, participant: Option<&Participant>) {
        self.bus
            .track_started
            .emit(&(track.clone(), participant.cloned()));
    }

    pub fn track_stopped(&self, track: &Track, participant: Option<&Participant>) {
        self.bus
            .track_stopped
            .emit(&(track.clone(), participant.cloned()));
    }

    pub fn bot_started_talking(&self, participant: &Participant) {
        self.bus.bot_started_talking.emit(participant);
    }

    pub fn bot_stopped_talking(&self, participant: &Participant) {
        self.bus.bot_stopped_talking.emit(participant);
    }

    pub fn local_started_talking(&self) {
        self.bus.local_started_talking.emit(&());
    }

    pub fn local_stopped_talking(&self) {
        self.bus.local_stopped_talking.emit(&());
    }

    pub fn local_audio_level(&self, level: f32) {
        self.bus.local_audio_level.emit(&level);
    }

    pub fn remote_audio_level(&self, level: f32, participant: &Participant) {
        self.bus
            .remote_audio_level
            .emit(&(level, participant.clone()));
    }

    /// Raw data received on the data channel. Anything that is not a control
    /// message of this protocol is dropped.
    pub fn message_received(&self, raw: &str) {
        match ControlMessage::decode(raw) {
            Ok(message) => self.message(message),
            Err(e) => debug!(error = %e, "Dropping inbound data that is not a control message."),
        }
    }

    /// A decoded control message from the agent.
    pub fn message(&self, message: ControlMessage) {
        route_message(&self.bus, message);
    }
}

/// Dispatches an inbound message to its event, strictly by `type`.
fn route_message(bus: &EventBus, message: ControlMessage) {
    let inbound = match InboundMessage::try_from(message) {
        Ok(inbound) => inbound,
        Err(MalformedMessage::UnknownType(kind)) => {
            debug!(%kind, "Ignoring unknown inbound message type.");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Dropping malformed inbound message.");
            return;
        }
    };
    debug!(kind = %inbound.message_type(), "Inbound message.");

    match inbound {
        InboundMessage::Transcript(transcript) => bus.transcript.emit(&transcript),
        InboundMessage::LlmContext(context) => bus.llm_context.emit(&context),
        InboundMessage::ConfigUpdated(config) => bus.bot_config_updated.emit(&config),
        InboundMessage::ConfigError(reason) => {
            warn!(%reason, "Bot rejected configuration.");
            bus.config_error.emit(&reason);
        }
        InboundMessage::ToolCall(call) => bus.tool_call.emit(&call),
        InboundMessage::JsonCompletion(json) => bus.json_completion.emit(&json),
    }
}

/// A `start()` call whose handshake is in flight.
struct Attempt {
    id: u64,
    cancel: CancellationToken,
}

/// Client side of an RTVI voice session.
pub struct SessionClient {
    options: ClientOptions,
    config: Mutex<ClientConfig>,
    transport: Box<dyn Transport>,
    handshake: Arc<dyn Handshake>,
    bus: Arc<EventBus>,
    attempt: Mutex<Option<Attempt>>,
    attempts: AtomicU64,
}

impl SessionClient {
    /// Creates a client using the WebSocket transport and the HTTP handshake.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_transport(options, Box::new(WebSocketTransport::new()))
    }

    /// Creates a client that owns `transport` for its whole lifetime.
    pub fn with_transport(options: ClientOptions, mut transport: Box<dyn Transport>) -> Self {
        let bus = Arc::new(EventBus::new(options.callbacks.clone()));
        transport.attach(TransportEvents::new(bus.clone()));
        let handshake = Arc::new(HttpHandshake::from_options(&options));
        Self {
            config: Mutex::new(options.config.clone()),
            options,
            transport,
            handshake,
            bus,
            attempt: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// Replaces the handshake routine used by [`start`](Self::start).
    pub fn with_handshake(mut self, handshake: impl Handshake + 'static) -> Self {
        self.handshake = Arc::new(handshake);
        self
    }

    /// Event registries for runtime subscriptions.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    // ------ Transport methods

    /// Authenticates, starts the bot and connects the transport.
    ///
    /// Fails with [`SessionError::Capacity`] when no room/token is returned,
    /// [`SessionError::Provisioning`] when the bot cannot be started (the
    /// transport is then never connected) and [`SessionError::Timeout`] when
    /// the handshake outlives the configured timeout or is cancelled.
    ///
    /// Dropping the returned future before it resolves aborts the attempt and
    /// leaves the session in `error`, from which it can be started again. An
    /// attempt cancelled by [`disconnect`](Self::disconnect) resolves to
    /// [`SessionError::Timeout`] without touching the state of whatever
    /// attempt runs next.
    #[instrument(name = "session_start", skip_all, fields(base_url = %self.options.base_url))]
    pub async fn start(&self) -> Result<()> {
        let state = self.transport.state();
        if state.is_active() {
            warn!(%state, "start() called while a session is active.");
            return Err(SessionError::AlreadyStarted(state));
        }

        let cancel = self
            .options
            .cancellation
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let id = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.attempt) = Some(Attempt {
            id,
            cancel: cancel.clone(),
        });
        let mut guard = StartGuard {
            client: self,
            id,
            connecting: false,
            armed: true,
        };

        self.transport.set_state(TransportState::Handshaking);
        let config = self.config();
        let result = self.run_handshake(&config, &cancel).await;

        if self.release_attempt(id).is_none() {
            guard.armed = false;
            debug!(attempt = id, "Attempt was cancelled by disconnect; leaving state alone.");
            return Err(result.err().unwrap_or(SessionError::Timeout));
        }
        let descriptor = match result {
            Ok(descriptor) => descriptor,
            Err(e) => {
                guard.armed = false;
                error!(error = %e, "Handshake failed.");
                self.fail_attempt();
                return Err(e);
            }
        };

        info!(room = %descriptor.url, "Bot started. Connecting transport...");
        self.transport.enable_mic(self.options.enable_mic);
        self.transport.enable_cam(self.options.enable_cam);
        guard.connecting = true;
        let connected = self.transport.connect(&descriptor).await;
        guard.armed = false;
        if let Err(e) = connected {
            error!(error = %e, "Transport failed to connect.");
            self.fail_attempt();
            return Err(e.into());
        }
        info!("Session connected.");
        Ok(())
    }

    async fn run_handshake(
        &self,
        config: &ClientConfig,
        cancel: &CancellationToken,
    ) -> Result<ConnectionDescriptor> {
        let steps = async {
            let bundle = self
                .handshake
                .authenticate()
                .await
                .map_err(SessionError::Handshake)?;
            let descriptor = bundle.into_descriptor().ok_or(SessionError::Capacity)?;
            self.handshake
                .provision(&descriptor, config)
                .await
                .map_err(|source| SessionError::Provisioning {
                    room: descriptor.url.clone(),
                    source,
                })?;
            Ok(descriptor)
        };

        let bounded = async {
            match self.options.timeout {
                Some(limit) => tokio::time::timeout(limit, steps).await.unwrap_or_else(|_| {
                    warn!(?limit, "Handshake deadline elapsed; request aborted.");
                    Err(SessionError::Timeout)
                }),
                None => steps.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = cancel.cancelled() => {
                warn!("Handshake cancelled; request aborted.");
                Err(SessionError::Timeout)
            }
        }
    }

    /// Clears the in-flight slot if it still belongs to attempt `id`.
    fn release_attempt(&self, id: u64) -> Option<CancellationToken> {
        let mut slot = lock(&self.attempt);
        match slot.as_ref() {
            Some(attempt) if attempt.id == id => slot.take().map(|attempt| attempt.cancel),
            _ => None,
        }
    }

    fn fail_attempt(&self) {
        if !self.transport.state().is_terminal() {
            self.transport.set_state(TransportState::Error);
        }
    }

    /// Leaves the session. Cancels a handshake in flight; otherwise a no-op
    /// unless connected.
    pub async fn disconnect(&self) -> Result<()> {
        let in_flight = lock(&self.attempt).take();
        if let Some(attempt) = in_flight {
            info!(attempt = attempt.id, "Cancelling handshake in flight.");
            attempt.cancel.cancel();
            self.transport.set_state(TransportState::Disconnected);
            return Ok(());
        }
        self.transport.disconnect().await?;
        Ok(())
    }

    pub fn enable_mic(&self, enable: bool) {
        self.transport.enable_mic(enable);
    }

    pub fn is_mic_enabled(&self) -> bool {
        self.transport.is_mic_enabled()
    }

    pub fn enable_cam(&self, enable: bool) {
        self.transport.enable_cam(enable);
    }

    pub fn is_cam_enabled(&self) -> bool {
        self.transport.is_cam_enabled()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    pub fn tracks(&self) -> Tracks {
        self.transport.tracks()
    }

    // ------ Config methods

    /// A snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        lock(&self.config).clone()
    }

    /// Replaces (or deep-merges into) the configuration.
    ///
    /// When connected, the result is pushed to the bot as a CONFIG message,
    /// either in full or, with `send_partial`, only `config` itself.
    /// `config_updated` fires in every case. The configuration is kept even
    /// if the push fails.
    pub fn update_config(
        &self,
        config: ClientConfig,
        use_deep_merge: bool,
        send_partial: bool,
    ) -> Result<()> {
        let updated = {
            let mut current = lock(&self.config);
            *current = if use_deep_merge {
                current.deep_merged(&config)
            } else {
                config.clone()
            };
            current.clone()
        };

        let pushed = if self.is_connected() {
            let payload = if send_partial { &config } else { &updated };
            self.transport.send_message(ControlMessage::config(payload))
        } else {
            Ok(())
        };

        self.bus.config_updated.emit(&updated);
        pushed.map_err(Into::into)
    }

    // ------ LLM context methods

    /// Options of the `llm` service, if configured.
    pub fn llm_context(&self) -> Option<ServiceOptions> {
        lock(&self.config).service(LLM_SERVICE).cloned()
    }

    /// Merges `llm` field by field into the `llm` service options.
    ///
    /// When connected the fields are pushed as LLM_UPDATE_CONTEXT;
    /// `config_updated` fires in every case.
    pub fn set_llm_context(&self, llm: ServiceOptions) -> Result<()> {
        let updated = {
            let mut current = lock(&self.config);
            let mut options = current.service(LLM_SERVICE).cloned().unwrap_or_default();
            options.extend(llm.clone());
            current.set_service(LLM_SERVICE, options);
            current.clone()
        };

        let pushed = if self.is_connected() {
            self.transport
                .send_message(ControlMessage::update_llm_context(&llm))
        } else {
            Ok(())
        };

        self.bus.config_updated.emit(&updated);
        pushed.map_err(Into::into)
    }

    /// Appends one message to the bot's live LLM context. Requires a connection.
    pub fn append_llm_context(&self, message: &LlmMessage) -> Result<()> {
        self.send_connected(
            "Attempt to update LLM context",
            ControlMessage::append_llm_context(message),
        )
    }

    /// Asks the bot for its LLM context; the answer arrives as `llm_context`.
    pub fn request_llm_context(&self) -> Result<()> {
        self.send_connected(
            "Attempt to request LLM context",
            ControlMessage::get_llm_context(),
        )
    }

    // ------ Utility methods

    /// Sends text for the bot to speak, optionally cutting off current speech.
    pub fn say(&self, text: &str, interrupt: bool) -> Result<()> {
        self.send_connected("Attempted to speak", ControlMessage::speak(text, interrupt))
    }

    /// Interrupts the bot's speech.
    pub fn interrupt(&self) -> Result<()> {
        self.send_connected("Attempted to interrupt bot TTS", ControlMessage::interrupt())
    }

    fn send_connected(&self, operation: &'static str, message: ControlMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::OperationNotPermitted(operation));
        }
        self.transport.send_message(message)?;
        Ok(())
    }

    // ------ Handlers

    /// Routes an inbound message to its event. Unknown types are ignored.
    pub fn handle_message(&self, message: ControlMessage) {
        route_message(&self.bus, message);
    }
}

/// Fails the attempt if `start()` is dropped before it resolves.
struct StartGuard<'a> {
    client: &'a SessionClient,
    id: u64,
    connecting: bool,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let in_flight = self.client.release_attempt(self.id);
        if let Some(cancel) = &in_flight {
            cancel.cancel();
        }
        if in_flight.is_some() || self.connecting {
            warn!(attempt = self.id, "start() dropped before completing; attempt abandoned.");
            self.client.fail_attempt();
        }
    }
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
