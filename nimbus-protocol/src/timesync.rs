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

//! Clock synchronization bookkeeping.

use log::info;

/// Tracks the time-request/response exchange with the server.
#[derive(Debug, Default)]
pub struct TimeSync {
    request_pending: bool,
    last_request_ms: u32,
    last_sync_ms: Option<u32>,
}

impl TimeSync {
    pub const fn new() -> Self {
        Self {
            request_pending: false,
            last_request_ms: 0,
            last_sync_ms: None,
        }
    }

    pub fn reset(&mut self) {
        self.request_pending = false;
        self.last_sync_ms = None;
    }

    /// Note that a time request went out at `now`.
    pub fn request_sent(&mut self, now: u32) {
        self.request_pending = true;
        self.last_request_ms = now;
    }

    pub fn is_request_pending(&self) -> bool {
        self.request_pending
    }

    /// Millis timestamp of the last accepted response, if any.
    pub fn last_sync(&self) -> Option<u32> {
        self.last_sync_ms
    }

    /// Accept a time response and deliver it to the platform clock. Responses
    /// are accepted whether or not a request is pending; the server may push
    /// time unsolicited.
    pub fn handle_response(&mut self, time: u32, now: u32, set_time: impl FnOnce(u32)) {
        info!("Received time {time}");
        self.request_pending = false;
        self.last_sync_ms = Some(now);
        set_time(time);
    }
}
