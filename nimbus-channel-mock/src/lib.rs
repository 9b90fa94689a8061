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

//! Mock channel and host capabilities for testing the nimbus engine.
//!
//! Provides an in-memory [`MockChannel`], recording [`MockHost`] and
//! [`MockDescriptor`] capability records, and server-side frame builders in
//! [`frames`]. Cloned handles share state, so a test keeps one handle for
//! inspection while the engine owns another.
//!
//! # Example
//!
//! ```
//! use nimbus_channel_mock::{MockChannel, MockDescriptor, MockHost};
//! use nimbus_protocol::{Protocol, ProtocolConfig, SessionKind};
//!
//! let channel = MockChannel::new();
//! let host = MockHost::new();
//! let descriptor = MockDescriptor::new().with_function("reset");
//!
//! let mut protocol = Protocol::new(
//!     channel.clone(),
//!     host.clone(),
//!     descriptor,
//!     ProtocolConfig::default(),
//! );
//! assert_eq!(protocol.begin().unwrap(), SessionKind::New);
//! assert_eq!(channel.notify_established_count(), 1);
//! ```

mod channel;
pub mod frames;
mod host;

pub use channel::{MockChannel, SentFrame, SharedAppState};
pub use host::{DescriptorLog, MockDescriptor, MockHost};
