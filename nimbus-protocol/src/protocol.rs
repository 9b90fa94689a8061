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

//! The protocol driver.
//!
//! Owns every sub-component and the host capability records, drives the
//! session handshake, and demultiplexes received frames. The event loop is a
//! single explicit `event_loop()` tick: advance the ack tracker, receive at
//! most one message, dispatch it or run idle work, return. The hosting
//! supervisor calls the tick in its own loop; the engine never blocks on its
//! own except for a synchronous confirmed send inside the channel.

use heapless::String;
use log::{error, info, trace, warn};
use nimbus_common::{
    AppStateDescriptor, CompletionError, MessageId, ProtocolError, Token,
    DEFAULT_ACK_TIMEOUT_MS, MAX_ACK_HANDLERS, MAX_EVENT_NAME_LENGTH, MAX_FUNCTION_KEY_LENGTH,
    MAX_VARIABLE_KEY_LENGTH,
};

use crate::ack::AckTracker;
use crate::callbacks::{
    AppStateOp, AppStateSelector, Callbacks, CompletionToken, Descriptor, VariableValue,
};
use crate::channel::{ChannelCommand, EstablishOutcome, MessageChannel};
use crate::coap::{self, code, CoapType, MessageKind, TokenField};
use crate::describe::{
    self, Appender, DescribeData, DESCRIBE_APPLICATION, DESCRIBE_MAX, DESCRIBE_METRICS,
    DESCRIBE_SYSTEM,
};
use crate::message::Message;
use crate::pinger::{PingAction, Pinger};
use crate::subscriptions::{SubscriptionScope, Subscriptions};
use crate::timesync::TimeSync;
use crate::transfer::ChunkedTransfer;

/// Protocol feature flags.
pub mod flags {
    /// The handshake is not complete until the server's hello arrives.
    pub const REQUIRE_HELLO_RESPONSE: u32 = 0x01;
    /// The device decides when to send its application describe.
    pub const DEVICE_INITIATED_DESCRIBE: u32 = 0x02;
}

/// Feature bits carried in the hello payload.
pub mod hello_flag {
    pub const OTA_UPGRADE_SUCCESSFUL: u8 = 0x01;
    pub const DIAGNOSTICS_SUPPORT: u8 = 0x02;
    pub const IMMEDIATE_UPDATES_SUPPORT: u8 = 0x04;
    // 0x08 and 0x10 are reserved for the HandshakeComplete and Goodbye
    // messages.
    pub const DEVICE_INITIATED_DESCRIBE: u8 = 0x20;
}

/// How long `begin` waits for the server's hello when one is required.
pub const HELLO_RESPONSE_TIMEOUT_MS: u32 = 4000;

/// How the current session came to be. A resumed session may replay events
/// the caller has already seen; filtering is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    New,
    Resumed,
}

/// Engine tunables. Construct with `Default` and override fields; new fields
/// may appear without breaking hosts built against older definitions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProtocolConfig {
    pub protocol_flags: u32,
    pub product_id: u16,
    pub product_version: u16,
    pub ping_interval_ms: u32,
    pub ping_timeout_ms: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_flags: 0,
            product_id: 0,
            product_version: 0,
            ping_interval_ms: crate::pinger::DEFAULT_PING_INTERVAL_MS,
            ping_timeout_ms: crate::pinger::DEFAULT_PING_TIMEOUT_MS,
        }
    }
}

/// The cloud protocol engine.
pub struct Protocol<C, CB, D> {
    channel: C,
    callbacks: CB,
    descriptor: D,
    config: ProtocolConfig,
    ack_handlers: AckTracker<CompletionToken, MAX_ACK_HANDLERS>,
    subscriptions: Subscriptions,
    transfer: ChunkedTransfer,
    timesync: TimeSync,
    pinger: Pinger,
    token_counter: Token,
    last_message_ms: u32,
    last_ack_update_ms: u32,
    app_describe_id: Option<MessageId>,
    system_describe_id: Option<MessageId>,
    subscriptions_id: Option<MessageId>,
}

impl<C, CB, D> Protocol<C, CB, D>
where
    C: MessageChannel,
    CB: Callbacks,
    D: Descriptor,
{
    /// Build the engine. The capability records are moved in; hosts that
    /// need to observe them afterwards keep shared handles of their own.
    pub fn new(channel: C, mut callbacks: CB, descriptor: D, config: ProtocolConfig) -> Self {
        let token_counter = callbacks.random_token_seed();
        let pinger = Pinger::new(config.ping_interval_ms, config.ping_timeout_ms);
        Self {
            channel,
            callbacks,
            descriptor,
            config,
            ack_handlers: AckTracker::new(),
            subscriptions: Subscriptions::new(),
            transfer: ChunkedTransfer::new(),
            timesync: TimeSync::new(),
            pinger,
            token_counter,
            last_message_ms: 0,
            last_ack_update_ms: 0,
            app_describe_id: None,
            system_describe_id: None,
            subscriptions_id: None,
        }
    }

    /// Establish the secure channel and perform the session handshake.
    ///
    /// On a resumed session whose fingerprints match the cached state under
    /// the active mask, the hello is skipped and a ping announces liveness
    /// instead; `SessionKind::Resumed` is returned either way so the caller
    /// can decide about event replay.
    pub fn begin(&mut self) -> Result<SessionKind, ProtocolError> {
        info!("Establish secure connection");
        self.transfer.reset();
        self.pinger.reset();
        self.timesync.reset();

        {
            let Self { ack_handlers, callbacks, .. } = self;
            ack_handlers
                .clear(|token| callbacks.send_complete(token, Err(CompletionError::Aborted)));
        }
        let now = self.callbacks.millis();
        self.last_ack_update_ms = now;
        self.last_message_ms = now;
        self.app_describe_id = None;
        self.system_describe_id = None;
        self.subscriptions_id = None;

        let outcome = self.channel.establish().map_err(|err| {
            error!("Handshake failed: {err}");
            err
        })?;
        let resumed = outcome == EstablishOutcome::Resumed;

        if resumed {
            // Unconditionally move the session to this endpoint on resume.
            self.channel.command(ChannelCommand::MoveSession)?;

            let current = self.app_state_descriptor();
            let cached = self.channel.cached_app_state_descriptor();
            let mask = if self.device_initiated_describe() {
                // The engine controls when the application describe goes out.
                AppStateDescriptor::SYSTEM_DESCRIBE_CRC | AppStateDescriptor::PROTOCOL_FLAGS
            } else {
                AppStateDescriptor::ALL
            };
            if cached.equals_to(&current, mask) {
                info!("Skipping HELLO message");
                self.ping()?;
                return Ok(SessionKind::Resumed);
            }
        }

        info!("Sending HELLO message");
        self.hello(self.descriptor.was_ota_upgrade_successful())
            .map_err(|err| {
                error!("Could not send HELLO message: {err}");
                err
            })?;

        if self.config.protocol_flags & flags::REQUIRE_HELLO_RESPONSE != 0 {
            info!("Receiving HELLO response");
            self.wait_for(MessageKind::Hello, HELLO_RESPONSE_TIMEOUT_MS)
                .map_err(|err| {
                    error!("Handshake: could not receive HELLO response: {err}");
                    err
                })?;
        }

        info!("Handshake completed");
        self.channel.notify_established();
        self.update_protocol_flags()?;

        if self.device_initiated_describe() {
            self.post_description(DESCRIBE_SYSTEM, true)?;
        }

        Ok(if resumed { SessionKind::Resumed } else { SessionKind::New })
    }

    /// One cooperative tick: advance timers, receive at most one message,
    /// dispatch it or run idle work. Returns the kind of the handled message,
    /// `MessageKind::None` when the tick was idle.
    ///
    /// Any error cancels a transfer in progress and ends the session; the
    /// supervisor is expected to tear down and call [`Self::begin`] again.
    pub fn event_loop(&mut self) -> Result<MessageKind, ProtocolError> {
        let now = self.callbacks.millis();
        let dt = now.wrapping_sub(self.last_ack_update_ms);
        self.last_ack_update_ms = now;
        {
            let Self { ack_handlers, callbacks, .. } = self;
            ack_handlers.update(dt, |token| {
                callbacks.send_complete(token, Err(CompletionError::Timeout));
            });
        }

        let mut message = Message::new();
        let result = match self.channel.receive(&mut message) {
            Ok(()) if message.is_empty() => self.idle().map(|()| MessageKind::None),
            Ok(()) => self.handle_received_message(&message),
            Err(err) => Err(err),
        };

        match result {
            Ok(kind) => Ok(kind),
            Err(err) => {
                let Self { transfer, callbacks, .. } = self;
                transfer.cancel(callbacks);
                error!("Event loop error: {err}");
                Err(err)
            }
        }
    }

    /// Poll [`Self::event_loop`] until a message of `kind` is handled or the
    /// timeout elapses.
    pub fn wait_for(&mut self, kind: MessageKind, timeout_ms: u32) -> Result<(), ProtocolError> {
        let start = self.callbacks.millis();
        info!("Waiting {timeout_ms} ms for message kind {kind:?}");
        loop {
            let handled = self.event_loop()?;
            if handled == kind {
                return Ok(());
            }
            if self.callbacks.millis().wrapping_sub(start) >= timeout_ms {
                return Err(ProtocolError::MessageTimeout);
            }
            if handled == MessageKind::None {
                self.callbacks.sleep(1);
            }
        }
    }

    /// Upload the describe manifests selected by `desc_flags`.
    ///
    /// Unless `force` is set, sections whose fingerprint already matches the
    /// server's cached copy are skipped; if nothing remains, no frame goes
    /// out at all. The resulting message id is tracked so the matching
    /// acknowledgement persists the new fingerprint.
    pub fn post_description(&mut self, desc_flags: u8, force: bool) -> Result<(), ProtocolError> {
        let mut desc_flags = desc_flags;
        if !force {
            let current = self.app_state_descriptor();
            let cached = self.channel.cached_app_state_descriptor();
            if desc_flags & DESCRIBE_SYSTEM != 0
                && current.equals_to(&cached, AppStateDescriptor::SYSTEM_DESCRIBE_CRC)
            {
                desc_flags &= !DESCRIBE_SYSTEM;
                info!("Not sending system DESCRIBE");
            }
            if desc_flags & DESCRIBE_APPLICATION != 0
                && current.equals_to(&cached, AppStateDescriptor::APP_DESCRIBE_CRC)
            {
                desc_flags &= !DESCRIBE_APPLICATION;
                info!("Not sending application DESCRIBE");
            }
        }
        if desc_flags == 0 {
            return Ok(());
        }

        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        let token = self.next_token();
        coap::describe_post(&mut msg, token, desc_flags)?;
        self.generate_and_send_description(&mut msg, desc_flags)
    }

    /// Publish an event. A completion token makes the event confirmable and
    /// registers the token with the ack tracker; it is delivered through
    /// [`Callbacks::send_complete`] exactly once.
    pub fn send_event(
        &mut self,
        name: &str,
        data: &[u8],
        ttl_seconds: u32,
        confirmable: bool,
        completion: Option<CompletionToken>,
    ) -> Result<(), ProtocolError> {
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        coap::event(
            &mut msg,
            name,
            data,
            ttl_seconds,
            confirmable || completion.is_some(),
        )?;
        let id = msg.id();
        if let Some(token) = completion {
            if self.ack_handlers.add(id, token, DEFAULT_ACK_TIMEOUT_MS).is_err() {
                warn!("Completion handler table full");
                return Err(ProtocolError::NoMemory);
            }
        }
        match self.channel.send(&mut msg) {
            Ok(()) => Ok(()),
            Err(err) => {
                // The message never left; the registration must not outlive it.
                let Self { ack_handlers, callbacks, .. } = self;
                if let Some(token) = ack_handlers.take(id) {
                    callbacks.send_complete(token, Err(CompletionError::Aborted));
                }
                Err(err)
            }
        }
    }

    /// Add an event subscription to the local table.
    pub fn subscribe(&mut self, prefix: &str, scope: SubscriptionScope) -> Result<(), ProtocolError> {
        self.subscriptions.add(prefix, scope)
    }

    /// Announce the subscription table to the server. The acknowledgement of
    /// the last request persists the subscription checksum.
    pub fn send_subscriptions(&mut self) -> Result<(), ProtocolError> {
        let Self { subscriptions, channel, token_counter, .. } = self;
        let last_id = subscriptions.send_subscriptions(channel, || {
            let token = *token_counter;
            *token_counter = token_counter.wrapping_add(1);
            token
        })?;
        if last_id.is_some() {
            self.subscriptions_id = last_id;
        }
        Ok(())
    }

    /// Ask the server for the current time.
    pub fn send_time_request(&mut self) -> Result<(), ProtocolError> {
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        let token = self.next_token();
        coap::time_request(&mut msg, token)?;
        self.channel.send(&mut msg)?;
        let now = self.callbacks.millis();
        self.timesync.request_sent(now);
        Ok(())
    }

    /// Send a keep-alive ping.
    pub fn ping(&mut self) -> Result<(), ProtocolError> {
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        coap::ping(&mut msg)?;
        self.channel.send(&mut msg)?;
        // The reply window runs from the send.
        self.last_message_ms = self.callbacks.millis();
        self.pinger.ping_sent();
        Ok(())
    }

    /// Report the size a describe payload currently needs (measure-only).
    pub fn describe_data(&mut self, desc_flags: u8) -> DescribeData {
        describe::describe_data(&mut self.descriptor, desc_flags)
    }

    /// The currently effective state fingerprints.
    pub fn app_state_descriptor(&mut self) -> AppStateDescriptor {
        let system_describe_crc = self
            .descriptor
            .app_state(AppStateSelector::DescribeSystem, AppStateOp::Compute);
        let app_describe_crc = self
            .descriptor
            .app_state(AppStateSelector::DescribeApp, AppStateOp::Compute);
        let subscriptions_crc = {
            let Self { subscriptions, callbacks, .. } = self;
            subscriptions.checksum(|data| callbacks.calculate_crc(data))
        };
        AppStateDescriptor {
            system_describe_crc,
            app_describe_crc,
            subscriptions_crc,
            protocol_flags: self.config.protocol_flags,
        }
    }

    fn device_initiated_describe(&self) -> bool {
        self.config.protocol_flags & flags::DEVICE_INITIATED_DESCRIBE != 0
    }

    fn next_token(&mut self) -> Token {
        let token = self.token_counter;
        self.token_counter = token.wrapping_add(1);
        token
    }

    fn hello(&mut self, ota_upgrade_successful: bool) -> Result<(), ProtocolError> {
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        let mut hello_flags =
            hello_flag::DIAGNOSTICS_SUPPORT | hello_flag::IMMEDIATE_UPDATES_SUPPORT;
        if ota_upgrade_successful {
            hello_flags |= hello_flag::OTA_UPGRADE_SUCCESSFUL;
        }
        if self.device_initiated_describe() {
            hello_flags |= hello_flag::DEVICE_INITIATED_DESCRIBE;
        }
        coap::hello(
            &mut msg,
            hello_flags,
            self.config.product_id,
            self.config.product_version,
        )?;
        msg.set_confirm_received(true);
        self.last_message_ms = self.callbacks.millis();
        self.channel.send(&mut msg)
    }

    fn idle(&mut self) -> Result<(), ProtocolError> {
        let now = self.callbacks.millis();
        {
            let Self { transfer, callbacks, .. } = self;
            transfer.tick(now, callbacks);
        }
        if !self.transfer.is_active() {
            let idle_ms = now.wrapping_sub(self.last_message_ms);
            if self.pinger.poll(idle_ms)? == PingAction::SendPing {
                self.ping()?;
            }
        }
        Ok(())
    }

    fn handle_received_message(&mut self, message: &Message) -> Result<MessageKind, ProtocolError> {
        self.last_message_ms = self.callbacks.millis();
        self.pinger.message_received();

        let buf = message.bytes();
        let kind = coap::decode_kind(buf);
        let ctype = coap::msg_type(buf);
        let id = coap::message_id(buf);
        let mut response_code = coap::msg_code(buf);
        let token = match coap::token(buf) {
            TokenField::Token(token) => Some(token),
            TokenField::Absent => None,
            TokenField::Unsupported(len) => {
                error!("Unsupported token length: {len}");
                None
            }
        };

        if ctype.is_reply() {
            trace!("Reply received: type={ctype:?}, code={response_code}");
            if ctype == CoapType::Reset {
                // RST carries no code but is semantically a failure.
                trace!("Reset received, treating as internal server error");
                response_code = code::INTERNAL_SERVER_ERROR;
            }
            self.notify_message_complete(id, response_code);

            let acked = ctype == CoapType::Ack;
            if self.app_describe_id == Some(id) {
                self.app_describe_id = None;
                if acked {
                    self.persist_app_state(AppStateSelector::DescribeApp)?;
                }
            }
            if self.system_describe_id == Some(id) {
                self.system_describe_id = None;
                if acked {
                    self.persist_app_state(AppStateSelector::DescribeSystem)?;
                }
            }
            if self.subscriptions_id == Some(id) {
                self.subscriptions_id = None;
                if acked {
                    self.update_subscription_crc()?;
                }
            }
        }

        match kind {
            MessageKind::Describe => {
                let desc_flags = match coap::uri_query_byte(buf) {
                    Some(value) if value != 0 && value <= DESCRIBE_MAX => value,
                    Some(value) => {
                        warn!("Invalid DESCRIBE flags {value:#04x}");
                        describe::DESCRIBE_DEFAULT
                    }
                    None => describe::DESCRIBE_DEFAULT,
                };
                self.send_description_response(token, id, desc_flags)?;
            }
            MessageKind::FunctionCall => {
                let token = token.ok_or_else(|| {
                    error!("Missing request token");
                    ProtocolError::MissingRequestToken
                })?;
                self.handle_function_call(token, id, message)?;
            }
            MessageKind::VariableRequest => {
                let token = token.ok_or_else(|| {
                    error!("Missing request token");
                    ProtocolError::MissingRequestToken
                })?;
                self.handle_variable_request(token, id, message)?;
            }
            MessageKind::SaveBegin | MessageKind::UpdateBegin => {
                let Self { transfer, channel, callbacks, .. } = self;
                transfer.handle_begin(token, message, channel, callbacks)?;
            }
            MessageKind::Chunk => {
                let Self { transfer, channel, callbacks, .. } = self;
                transfer.handle_chunk(token, message, channel, callbacks)?;
            }
            MessageKind::UpdateDone => {
                let Self { transfer, channel, callbacks, .. } = self;
                transfer.handle_done(token, message, channel, callbacks)?;
            }
            MessageKind::Event => {
                let mut name: String<MAX_EVENT_NAME_LENGTH> = String::new();
                coap::resource_name(buf, &mut name)?;
                let data = coap::payload(buf).unwrap_or(&[]);
                let Self { subscriptions, descriptor, .. } = self;
                subscriptions.handle_event(descriptor, &name, data);
            }
            MessageKind::KeyChange => {
                self.handle_key_change(ctype, id, message)?;
            }
            MessageKind::SignalStart | MessageKind::SignalStop => {
                let mut msg = Message::new();
                self.channel.create(&mut msg)?;
                coap::coded_ack(&mut msg, token, code::CHANGED, id)?;
                self.callbacks.signal(kind == MessageKind::SignalStart);
                self.channel.send(&mut msg)?;
            }
            MessageKind::Hello => {
                if ctype == CoapType::Confirmable {
                    self.send_empty_ack(id)?;
                }
                self.descriptor.ota_upgrade_status_sent();
            }
            MessageKind::Time => {
                if let Some(payload) = coap::payload(buf) {
                    if payload.len() >= 4 {
                        let time =
                            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                        let now = self.callbacks.millis();
                        let Self { timesync, callbacks, .. } = self;
                        timesync.handle_response(time, now, |value| callbacks.set_time(value));
                    }
                }
            }
            MessageKind::Ping => {
                self.send_empty_ack(id)?;
            }
            MessageKind::None
            | MessageKind::EmptyAck
            | MessageKind::Error => {
                // Bare acknowledgements were handled above; anything
                // unrecognized is dropped on the floor.
            }
        }

        Ok(kind)
    }

    fn notify_message_complete(&mut self, id: MessageId, response_code: u8) {
        info!(
            "Message id {id} complete with code {}.{:02}",
            code::class(response_code),
            code::detail(response_code)
        );
        let Self { ack_handlers, callbacks, .. } = self;
        if let Some(token) = ack_handlers.take(id) {
            let result = if code::is_success(response_code) {
                Ok(())
            } else {
                Err(match code::class(response_code) {
                    4 => CompletionError::Coap4xx,
                    5 => CompletionError::Coap5xx,
                    _ => CompletionError::Coap,
                })
            };
            callbacks.send_complete(token, result);
        }
    }

    /// Persist one describe fingerprint, bracketing the store access in
    /// session save/load so the channel observes a consistent snapshot.
    fn persist_app_state(&mut self, selector: AppStateSelector) -> Result<(), ProtocolError> {
        self.channel.command(ChannelCommand::SaveSession)?;
        self.descriptor.app_state(selector, AppStateOp::ComputeAndPersist);
        self.channel.command(ChannelCommand::LoadSession)
    }

    fn update_subscription_crc(&mut self) -> Result<(), ProtocolError> {
        let crc = {
            let Self { subscriptions, callbacks, .. } = self;
            subscriptions.checksum(|data| callbacks.calculate_crc(data))
        };
        self.channel.command(ChannelCommand::SaveSession)?;
        self.descriptor
            .app_state(AppStateSelector::Subscriptions, AppStateOp::Persist(crc));
        self.channel.command(ChannelCommand::LoadSession)
    }

    fn update_protocol_flags(&mut self) -> Result<(), ProtocolError> {
        self.channel.command(ChannelCommand::SaveSession)?;
        self.descriptor.app_state(
            AppStateSelector::ProtocolFlags,
            AppStateOp::Persist(self.config.protocol_flags),
        );
        self.channel.command(ChannelCommand::LoadSession)
    }

    fn send_empty_ack(&mut self, id: MessageId) -> Result<(), ProtocolError> {
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        coap::empty_ack(&mut msg, id)?;
        self.channel.send(&mut msg)
    }

    fn send_description_response(
        &mut self,
        token: Option<Token>,
        request_id: MessageId,
        desc_flags: u8,
    ) -> Result<(), ProtocolError> {
        self.send_empty_ack(request_id)?;
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        coap::description_response(&mut msg, token.unwrap_or(0))?;
        self.generate_and_send_description(&mut msg, desc_flags)
    }

    /// Serialize the manifest into `msg` and send it, recording the message
    /// id so the matching acknowledgement persists the fingerprints.
    fn generate_and_send_description(
        &mut self,
        msg: &mut Message,
        desc_flags: u8,
    ) -> Result<(), ProtocolError> {
        let overflow = {
            let mut appender = MessageAppender { msg, overflow: 0 };
            describe::build_describe(&mut appender, &mut self.descriptor, desc_flags);
            appender.overflow
        };
        if overflow > 0 {
            // Shipping a truncated manifest would strand the device in a
            // reconnect loop, so this is fatal rather than best-effort.
            error!("Describe message overflowed by {overflow} bytes");
            return Err(ProtocolError::InsufficientStorage);
        }

        info!(
            "Posting '{}{}{}' describe message",
            if desc_flags & DESCRIBE_SYSTEM != 0 { "S" } else { "" },
            if desc_flags & DESCRIBE_APPLICATION != 0 { "A" } else { "" },
            if desc_flags & DESCRIBE_METRICS != 0 { "M" } else { "" },
        );

        self.channel.send(msg)?;
        let msg_id = msg.id();
        if desc_flags & DESCRIBE_APPLICATION != 0 {
            self.app_describe_id = Some(msg_id);
        }
        if desc_flags & DESCRIBE_SYSTEM != 0 {
            self.system_describe_id = Some(msg_id);
        }
        Ok(())
    }

    fn handle_function_call(
        &mut self,
        token: Token,
        request_id: MessageId,
        message: &Message,
    ) -> Result<(), ProtocolError> {
        let mut key: String<MAX_FUNCTION_KEY_LENGTH> = String::new();
        coap::resource_name(message.bytes(), &mut key)?;
        let args = coap::payload(message.bytes()).unwrap_or(&[]);
        let args = core::str::from_utf8(args).unwrap_or("");

        // Acknowledge receipt before running user code; the result travels in
        // a separate response.
        self.send_empty_ack(request_id)?;

        let result = self.descriptor.call_function(&key, args);
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        match result {
            Ok(value) => {
                coap::separate_response(&mut msg, token, code::CHANGED)?;
                msg.push(0xff)?;
                msg.extend(&value.to_be_bytes())?;
            }
            Err(err) => {
                warn!("Function '{key}' failed: {err}");
                coap::separate_response(&mut msg, token, code::INTERNAL_SERVER_ERROR)?;
            }
        }
        self.channel.send(&mut msg)
    }

    fn handle_variable_request(
        &mut self,
        token: Token,
        request_id: MessageId,
        message: &Message,
    ) -> Result<(), ProtocolError> {
        let mut key: String<MAX_VARIABLE_KEY_LENGTH> = String::new();
        coap::resource_name(message.bytes(), &mut key)?;

        let mut value = VariableValue::new();
        let result = self.descriptor.get_variable(&key, &mut value);
        let mut msg = Message::new();
        self.channel.create(&mut msg)?;
        match result {
            Ok(_) => {
                coap::content_ack(&mut msg, Some(token), request_id)?;
                if !value.is_empty() {
                    msg.push(0xff)?;
                    msg.extend(&value)?;
                }
            }
            Err(err) => {
                warn!("Variable '{key}' unavailable: {err}");
                coap::coded_ack(&mut msg, Some(token), code::NOT_FOUND, request_id)?;
            }
        }
        self.channel.send(&mut msg)
    }

    fn handle_key_change(
        &mut self,
        ctype: CoapType,
        request_id: MessageId,
        message: &Message,
    ) -> Result<(), ProtocolError> {
        if ctype == CoapType::Confirmable {
            let mut response = Message::new();
            self.channel.response(message, &mut response)?;
            coap::empty_ack(&mut response, request_id)?;
            self.channel.send(&mut response)?;
        }
        if coap::parameter_byte(message.bytes()) == Some(1) {
            info!("Discarding session keys after key change");
            self.channel.command(ChannelCommand::DiscardSession)?;
        }
        Ok(())
    }
}

/// Appender that serializes straight into an outgoing frame, counting bytes
/// that did not fit instead of failing mid-walk.
struct MessageAppender<'a> {
    msg: &'a mut Message,
    overflow: usize,
}

impl Appender for MessageAppender<'_> {
    fn append(&mut self, bytes: &[u8]) {
        if self.msg.extend(bytes).is_err() {
            self.overflow += bytes.len();
        }
    }
}
