//! An in-memory transport for development and integration testing.
//!
//! [`MockTransport`] follows the state machine of a real transport, records
//! every descriptor it connects with and every message it sends, and lets the
//! test inject inbound data and remote participants. Clones share state, so a
//! test can keep a handle after giving the transport to a session client.

use super::{
    ConnectionDescriptor, MediaTracks, Participant, Track, TrackKind, Tracks, Transport,
    TransportError, TransportEvents, TransportState,
};
use crate::{messages::ControlMessage, sync::lock};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing::warn;

#[derive(Default)]
struct Inner {
    events: Mutex<Option<TransportEvents>>,
    state: Mutex<TransportState>,
    sent: Mutex<Vec<ControlMessage>>,
    connects: Mutex<Vec<ConnectionDescriptor>>,
    fail_next_connect: Mutex<Option<String>>,
    tracks: Mutex<Tracks>,
    mic: AtomicBool,
    cam: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<ControlMessage> {
        lock(&self.inner.sent).clone()
    }

    /// Descriptors passed to `connect`, oldest first.
    pub fn connects(&self) -> Vec<ConnectionDescriptor> {
        lock(&self.inner.connects).clone()
    }

    /// Makes the next `connect` fail with `reason`.
    pub fn fail_next_connect(&self, reason: impl Into<String>) {
        *lock(&self.inner.fail_next_connect) = Some(reason.into());
    }

    /// Delivers raw data as if it arrived on the data channel.
    pub fn receive(&self, raw: &str) {
        if let Some(events) = self.events() {
            events.message_received(raw);
        }
    }

    /// Simulates the agent joining, publishing an audio track.
    pub fn join_bot(&self, participant: &Participant) {
        let track = Track {
            id: format!("{}-audio", participant.id),
            kind: TrackKind::Audio,
        };
        lock(&self.inner.tracks).bot = MediaTracks {
            audio: Some(track.clone()),
            video: None,
        };
        if let Some(events) = self.events() {
            events.participant_joined(participant);
            events.bot_connected(participant);
            events.track_started(&track, Some(participant));
        }
    }

    /// Simulates the agent leaving.
    pub fn leave_bot(&self, participant: &Participant) {
        let track = lock(&self.inner.tracks).bot.audio.take();
        if let Some(events) = self.events() {
            if let Some(track) = track {
                events.track_stopped(&track, Some(participant));
            }
            events.participant_left(participant);
            events.bot_disconnected(participant);
        }
    }

    fn events(&self) -> Option<TransportEvents> {
        lock(&self.inner.events).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn attach(&mut self, events: TransportEvents) {
        *lock(&self.inner.events) = Some(events);
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), TransportError> {
        self.set_state(TransportState::Connecting);
        if let Some(reason) = lock(&self.inner.fail_next_connect).take() {
            self.set_state(TransportState::Error);
            return Err(TransportError::Connection(reason));
        }
        lock(&self.inner.connects).push(descriptor.clone());
        self.set_state(TransportState::Connected);
        if let Some(events) = self.events() {
            events.connected();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            return Ok(());
        }
        *lock(&self.inner.tracks) = Tracks::default();
        self.set_state(TransportState::Disconnected);
        if let Some(events) = self.events() {
            events.disconnected();
        }
        Ok(())
    }

    fn send_message(&self, message: ControlMessage) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        lock(&self.inner.sent).push(message);
        Ok(())
    }

    fn enable_mic(&self, enable: bool) {
        self.inner.mic.store(enable, Ordering::SeqCst);
    }

    fn is_mic_enabled(&self) -> bool {
        self.inner.mic.load(Ordering::SeqCst)
    }

    fn enable_cam(&self, enable: bool) {
        self.inner.cam.store(enable, Ordering::SeqCst);
    }

    fn is_cam_enabled(&self) -> bool {
        self.inner.cam.load(Ordering::SeqCst)
    }

    fn state(&self) -> TransportState {
        *lock(&self.inner.state)
    }

    fn set_state(&self, state: TransportState) {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), state);
        if !previous.can_transition_to(state) {
            warn!(from = %previous, to = %state, "Unexpected transport state transition.");
        }
        if let Some(events) = self.events() {
            events.state_changed(state);
        }
    }

    fn tracks(&self) -> Tracks {
        lock(&self.inner.tracks).clone()
    }
}
