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

//! Application state fingerprints.
//!
//! The engine compares the currently computed fingerprints against the copy
//! the channel persisted during the previous session to decide whether a
//! resumed session needs to re-announce anything. Each fingerprint covers one
//! state category; the comparison mask selects which categories matter for a
//! given decision.

/// Fingerprint record for the device's announced state.
///
/// The channel carries a cached descriptor persisted across sessions; a field
/// here is only updated after the corresponding upload has been positively
/// acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppStateDescriptor {
    /// CRC of the last acknowledged system describe payload.
    pub system_describe_crc: u32,
    /// CRC of the last acknowledged application describe payload.
    pub app_describe_crc: u32,
    /// Checksum of the event subscription set.
    pub subscriptions_crc: u32,
    /// Protocol feature flags in effect when the state was persisted.
    pub protocol_flags: u32,
}

impl AppStateDescriptor {
    /// Mask bit selecting `system_describe_crc` for comparison.
    pub const SYSTEM_DESCRIBE_CRC: u32 = 0x01;
    /// Mask bit selecting `app_describe_crc` for comparison.
    pub const APP_DESCRIBE_CRC: u32 = 0x02;
    /// Mask bit selecting `subscriptions_crc` for comparison.
    pub const SUBSCRIPTIONS_CRC: u32 = 0x04;
    /// Mask bit selecting `protocol_flags` for comparison.
    pub const PROTOCOL_FLAGS: u32 = 0x08;
    /// All comparison bits.
    pub const ALL: u32 = 0x0f;

    /// Compare two descriptors on the fields selected by `mask`.
    pub fn equals_to(&self, other: &Self, mask: u32) -> bool {
        if mask & Self::SYSTEM_DESCRIBE_CRC != 0
            && self.system_describe_crc != other.system_describe_crc
        {
            return false;
        }
        if mask & Self::APP_DESCRIBE_CRC != 0 && self.app_describe_crc != other.app_describe_crc {
            return false;
        }
        if mask & Self::SUBSCRIPTIONS_CRC != 0
            && self.subscriptions_crc != other.subscriptions_crc
        {
            return false;
        }
        if mask & Self::PROTOCOL_FLAGS != 0 && self.protocol_flags != other.protocol_flags {
            return false;
        }
        true
    }
}
