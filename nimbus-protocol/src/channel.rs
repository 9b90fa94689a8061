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

//! Secure message channel capability.
//!
//! The channel owns the encrypted transport, the session keys, and the
//! persisted session state. The engine drives it through this trait and never
//! sees key material or the persistence format.

use nimbus_common::{AppStateDescriptor, ProtocolError};

use crate::message::Message;

/// Result of establishing the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishOutcome {
    /// A full handshake was performed.
    New,
    /// A prior session was restored from cached keys.
    Resumed,
}

/// Session control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Snapshot the session state before persistent writes.
    SaveSession,
    /// Reload the session state after persistent writes.
    LoadSession,
    /// Invalidate cached keys after a key-change notification.
    DiscardSession,
    /// Relocate a restored session to the current endpoint.
    MoveSession,
}

/// Capability set the engine requires from its transport.
pub trait MessageChannel {
    /// Perform the secure handshake, possibly restoring a prior session.
    fn establish(&mut self) -> Result<EstablishOutcome, ProtocolError>;

    /// Prepare a blank outgoing message carrying the next message id.
    fn create(&mut self, msg: &mut Message) -> Result<(), ProtocolError>;

    /// Prepare a response message for `request` carrying a fresh message id.
    fn response(&mut self, request: &Message, msg: &mut Message) -> Result<(), ProtocolError>;

    /// Transmit a frame. The channel encodes `msg.id()` into header bytes
    /// 2..4 before encrypting. When `msg.confirm_received()` is set, the call
    /// blocks until transport-level acknowledgement or fails.
    ///
    /// The engine treats its send buffer as invalidated after this returns.
    fn send(&mut self, msg: &mut Message) -> Result<(), ProtocolError>;

    /// Non-blocking read. An empty `msg` after return means no data was
    /// available.
    fn receive(&mut self, msg: &mut Message) -> Result<(), ProtocolError>;

    /// Issue a session control command.
    fn command(&mut self, cmd: ChannelCommand) -> Result<(), ProtocolError>;

    /// Fingerprints persisted by the previous session.
    fn cached_app_state_descriptor(&self) -> AppStateDescriptor;

    /// Called once the engine considers the handshake complete.
    fn notify_established(&mut self);
}
