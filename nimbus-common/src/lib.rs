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

//! Common types shared across nimbus protocol layers.

pub mod app_state;
pub mod error;

pub use app_state::AppStateDescriptor;
pub use error::{CompletionError, ProtocolError};

/// CoAP message identifier (16-bit, assigned by the channel).
pub type MessageId = u16;

/// Request token. This system uses a fixed 4-byte token on the wire.
pub type Token = u32;

/// Number of token bytes carried in outgoing requests.
pub const TOKEN_LEN: usize = 4;

/// Maximum size of a single protocol frame, including header and payload.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Maximum length of a function key in the describe manifest.
pub const MAX_FUNCTION_KEY_LENGTH: usize = 64;

/// Maximum length of a variable key in the describe manifest.
pub const MAX_VARIABLE_KEY_LENGTH: usize = 64;

/// Maximum length of an event name or subscription prefix.
pub const MAX_EVENT_NAME_LENGTH: usize = 64;

/// Maximum length for a serialized variable value.
pub const MAX_VARIABLE_VALUE_SIZE: usize = 622;

/// Maximum number of event subscriptions held by the engine.
pub const MAX_SUBSCRIPTIONS: usize = 8;

/// Maximum number of in-flight acknowledgement completion handlers.
pub const MAX_ACK_HANDLERS: usize = 4;

/// Default timeout for an acknowledgement completion handler.
pub const DEFAULT_ACK_TIMEOUT_MS: u32 = 60_000;
