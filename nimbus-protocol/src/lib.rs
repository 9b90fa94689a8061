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

#![no_std]

//! nimbus device cloud protocol engine.
//!
//! A sans-IO CoAP session driver for constrained endpoints: handshake with
//! fingerprint-based state reconciliation, capability describes, remote
//! function and variable dispatch, pub/sub events, chunked firmware transfer,
//! time sync, keep-alive and bounded acknowledgement tracking. Single
//! cooperative thread, fixed-capacity storage throughout.
//!
//! The host supplies the secure transport as a [`channel::MessageChannel`]
//! and its platform/application capabilities as [`callbacks::Callbacks`] and
//! [`callbacks::Descriptor`]; the [`protocol::Protocol`] driver owns
//! everything else and is advanced one `event_loop()` tick at a time.

#[cfg(test)]
extern crate std;

pub mod ack;
pub mod callbacks;
pub mod channel;
pub mod coap;
pub mod describe;
pub mod message;
pub mod pinger;
pub mod protocol;
pub mod subscriptions;
pub mod timesync;
pub mod transfer;

pub use callbacks::{
    AppStateOp, AppStateSelector, Callbacks, CompletionToken, Descriptor, FileTransfer,
    VariableType, VariableValue,
};
pub use channel::{ChannelCommand, EstablishOutcome, MessageChannel};
pub use coap::MessageKind;
pub use message::Message;
pub use protocol::{Protocol, ProtocolConfig, SessionKind};
pub use subscriptions::SubscriptionScope;
