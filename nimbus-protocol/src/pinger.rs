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

//! Idle keep-alive cadence.
//!
//! The pinger watches the time since the last received message. Once the
//! idle interval elapses it asks the driver to send a ping; a ping send
//! resets the idle clock, so the reply window is measured from the send.
//! Any received message clears the expectation.

use nimbus_common::ProtocolError;

/// Default idle interval before a keep-alive is sent.
pub const DEFAULT_PING_INTERVAL_MS: u32 = 15_000;
/// Default window for the ping reply.
pub const DEFAULT_PING_TIMEOUT_MS: u32 = 10_000;

/// What the driver should do after polling the pinger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    None,
    SendPing,
}

#[derive(Debug)]
pub struct Pinger {
    interval_ms: u32,
    timeout_ms: u32,
    expecting_reply: bool,
}

impl Pinger {
    pub const fn new(interval_ms: u32, timeout_ms: u32) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            expecting_reply: false,
        }
    }

    pub fn reset(&mut self) {
        self.expecting_reply = false;
    }

    /// Any inbound message doubles as a ping reply.
    pub fn message_received(&mut self) {
        self.expecting_reply = false;
    }

    /// The driver sent a ping; expect a reply within the timeout.
    pub fn ping_sent(&mut self) {
        self.expecting_reply = true;
    }

    /// Poll with the time since the last received message (which the driver
    /// resets when it sends a ping).
    pub fn poll(&mut self, idle_ms: u32) -> Result<PingAction, ProtocolError> {
        if self.expecting_reply {
            if idle_ms > self.timeout_ms {
                return Err(ProtocolError::PingTimeout);
            }
            return Ok(PingAction::None);
        }
        if self.interval_ms != 0 && idle_ms > self.interval_ms {
            return Ok(PingAction::SendPing);
        }
        Ok(PingAction::None)
    }
}

impl Default for Pinger {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS)
    }
}
