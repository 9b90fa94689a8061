// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory message channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use nimbus_common::{AppStateDescriptor, MessageId, ProtocolError};
use nimbus_protocol::channel::{ChannelCommand, EstablishOutcome, MessageChannel};
use nimbus_protocol::Message;
use tracing::debug;

/// Persisted fingerprint store shared between a [`MockChannel`] and the
/// host's app-state selector, standing in for the session cache of a real
/// transport.
#[derive(Clone, Default)]
pub struct SharedAppState {
    inner: Arc<Mutex<AppStateDescriptor>>,
}

impl SharedAppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> AppStateDescriptor {
        *self.inner.lock().unwrap()
    }

    pub fn set(&self, descriptor: AppStateDescriptor) {
        *self.inner.lock().unwrap() = descriptor;
    }

    pub fn update(&self, mutate: impl FnOnce(&mut AppStateDescriptor)) {
        mutate(&mut self.inner.lock().unwrap());
    }
}

/// One frame the engine transmitted.
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// Frame bytes with the message id patched in.
    pub bytes: Bytes,
    pub id: MessageId,
    pub confirm_received: bool,
}

#[derive(Default)]
struct Inner {
    outcome: EstablishOutcomeConfig,
    next_id: MessageId,
    inbox: VecDeque<Bytes>,
    sent: Vec<SentFrame>,
    commands: Vec<ChannelCommand>,
    establish_count: usize,
    notified: usize,
    app_state: Option<SharedAppState>,
    send_error: Option<ProtocolError>,
    receive_error: Option<ProtocolError>,
}

#[derive(Default)]
enum EstablishOutcomeConfig {
    #[default]
    New,
    Resumed,
    Fail(ProtocolError),
}

/// In-memory implementation of [`MessageChannel`].
///
/// Cloning shares the same state, so a test keeps one handle for inspection
/// while the engine owns another.
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<Inner>>,
}

impl MockChannel {
    pub fn new() -> Self {
        let channel = Self::default();
        channel.inner.lock().unwrap().next_id = 0x2000;
        channel
    }

    /// Make `establish` report a restored session.
    pub fn resume_sessions(self) -> Self {
        self.inner.lock().unwrap().outcome = EstablishOutcomeConfig::Resumed;
        self
    }

    /// Make `establish` fail.
    pub fn fail_establish(self, err: ProtocolError) -> Self {
        self.inner.lock().unwrap().outcome = EstablishOutcomeConfig::Fail(err);
        self
    }

    /// Attach the persisted fingerprint store.
    pub fn with_app_state(self, state: SharedAppState) -> Self {
        self.inner.lock().unwrap().app_state = Some(state);
        self
    }

    /// Queue a frame for the engine to receive.
    pub fn push_incoming(&self, frame: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .inbox
            .push_back(Bytes::copy_from_slice(frame));
    }

    /// Fail the next `send` with `err`.
    pub fn fail_next_send(&self, err: ProtocolError) {
        self.inner.lock().unwrap().send_error = Some(err);
    }

    /// Fail the next `receive` with `err`.
    pub fn fail_next_receive(&self, err: ProtocolError) {
        self.inner.lock().unwrap().receive_error = Some(err);
    }

    /// Everything the engine transmitted so far.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Drain the transmit log.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.inner.lock().unwrap().sent)
    }

    /// Session commands issued so far, in order.
    pub fn commands(&self) -> Vec<ChannelCommand> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn establish_count(&self) -> usize {
        self.inner.lock().unwrap().establish_count
    }

    pub fn notify_established_count(&self) -> usize {
        self.inner.lock().unwrap().notified
    }
}

impl MessageChannel for MockChannel {
    fn establish(&mut self) -> Result<EstablishOutcome, ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        inner.establish_count += 1;
        match inner.outcome {
            EstablishOutcomeConfig::New => Ok(EstablishOutcome::New),
            EstablishOutcomeConfig::Resumed => Ok(EstablishOutcome::Resumed),
            EstablishOutcomeConfig::Fail(err) => Err(err),
        }
    }

    fn create(&mut self, msg: &mut Message) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        msg.clear();
        msg.set_id(id);
        Ok(())
    }

    fn response(&mut self, _request: &Message, msg: &mut Message) -> Result<(), ProtocolError> {
        self.create(msg)
    }

    fn send(&mut self, msg: &mut Message) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.send_error.take() {
            return Err(err);
        }
        let id = msg.id();
        {
            let bytes = msg.bytes_mut();
            if bytes.len() >= 4 {
                bytes[2..4].copy_from_slice(&id.to_be_bytes());
            }
        }
        debug!(id, len = msg.len(), confirm = msg.confirm_received(), "send");
        inner.sent.push(SentFrame {
            bytes: Bytes::copy_from_slice(msg.bytes()),
            id,
            confirm_received: msg.confirm_received(),
        });
        Ok(())
    }

    fn receive(&mut self, msg: &mut Message) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.receive_error.take() {
            return Err(err);
        }
        msg.clear();
        if let Some(frame) = inner.inbox.pop_front() {
            msg.set_bytes(&frame)?;
            msg.set_id(nimbus_protocol::coap::message_id(&frame));
        }
        Ok(())
    }

    fn command(&mut self, cmd: ChannelCommand) -> Result<(), ProtocolError> {
        debug!(?cmd, "command");
        self.inner.lock().unwrap().commands.push(cmd);
        Ok(())
    }

    fn cached_app_state_descriptor(&self) -> AppStateDescriptor {
        let inner = self.inner.lock().unwrap();
        inner
            .app_state
            .as_ref()
            .map(SharedAppState::get)
            .unwrap_or_default()
    }

    fn notify_established(&mut self) {
        self.inner.lock().unwrap().notified += 1;
    }
}
