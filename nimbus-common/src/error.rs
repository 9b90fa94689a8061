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

//! Error types shared across nimbus protocol layers.

use core::fmt;

/// Errors surfaced by the protocol engine.
///
/// Receive-path errors are fatal to the current session: the driver cancels
/// any chunked transfer in progress and returns the error, and the supervisor
/// is expected to tear down and call `begin()` again. Application-level
/// failures travel through CoAP response codes instead and do not appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Transport-level I/O failure reported by the channel.
    Io,
    /// An operation was attempted in a state that does not permit it.
    InvalidState,
    /// A received frame could not be parsed.
    MalformedMessage,
    /// A request that requires a token arrived without one.
    MissingRequestToken,
    /// `wait_for` gave up before the expected message type arrived.
    MessageTimeout,
    /// The server did not answer a keep-alive ping in time.
    PingTimeout,
    /// A serialized payload did not fit its buffer. Fatal: the engine never
    /// transmits a truncated describe manifest.
    InsufficientStorage,
    /// A bounded table (ack handlers, subscriptions) is at capacity.
    NoMemory,
    /// The aggregate CRC of a completed firmware transfer did not match the
    /// value announced at the start of the transfer.
    TransferCrcMismatch,
    /// A firmware transfer was aborted before completion.
    UpdateAborted,
    /// Opaque transport error code surfaced unchanged from the channel.
    Transport(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "i/o error"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::MalformedMessage => write!(f, "malformed message"),
            Self::MissingRequestToken => write!(f, "missing request token"),
            Self::MessageTimeout => write!(f, "message timeout"),
            Self::PingTimeout => write!(f, "ping timeout"),
            Self::InsufficientStorage => write!(f, "insufficient storage"),
            Self::NoMemory => write!(f, "out of table capacity"),
            Self::TransferCrcMismatch => write!(f, "transfer CRC mismatch"),
            Self::UpdateAborted => write!(f, "update aborted"),
            Self::Transport(code) => write!(f, "transport error {code}"),
        }
    }
}

/// Outcome delivered to a registered acknowledgement completion handler when
/// the message could not be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionError {
    /// No acknowledgement arrived within the handler's timeout.
    Timeout,
    /// The session ended while the message was still in flight.
    Aborted,
    /// The server answered with a client error (4.xx).
    Coap4xx,
    /// The server answered with a server error (5.xx). A RST is delivered
    /// through this path as well, reinterpreted as 5.00.
    Coap5xx,
    /// The server answered with a non-success code outside 4.xx/5.xx.
    Coap,
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "acknowledgement timeout"),
            Self::Aborted => write!(f, "session ended"),
            Self::Coap4xx => write!(f, "CoAP 4.xx response"),
            Self::Coap5xx => write!(f, "CoAP 5.xx response"),
            Self::Coap => write!(f, "CoAP error response"),
        }
    }
}
