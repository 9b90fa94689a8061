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

//! Shared test rig: a protocol engine wired to mock channel and host, with
//! observation handles kept outside.

// Each test binary uses a different subset of the rig helpers.
#![allow(dead_code)]

use nimbus_channel_mock::{DescriptorLog, MockChannel, MockDescriptor, MockHost, SharedAppState};
use nimbus_protocol::{Protocol, ProtocolConfig};

pub struct Rig {
    pub channel: MockChannel,
    pub host: MockHost,
    pub log: DescriptorLog,
    pub state: SharedAppState,
    pub protocol: Protocol<MockChannel, MockHost, MockDescriptor>,
}

/// A descriptor with a small typical application surface.
pub fn default_descriptor() -> MockDescriptor {
    MockDescriptor::new()
        .with_function("reset")
        .with_variable("temp", nimbus_protocol::VariableType::Int, b"42")
        .with_system_info("\"p\":12")
}

pub fn rig_with(
    channel: MockChannel,
    descriptor: MockDescriptor,
    protocol_flags: u32,
) -> Rig {
    let host = MockHost::new();
    let state = SharedAppState::new();
    let channel = channel.with_app_state(state.clone());
    let descriptor = descriptor.with_app_state(state.clone());
    let log = descriptor.log();

    let mut config = ProtocolConfig::default();
    config.protocol_flags = protocol_flags;
    config.product_id = 0x000c;
    config.product_version = 0x0101;

    let protocol = Protocol::new(channel.clone(), host.clone(), descriptor, config);
    Rig { channel, host, log, state, protocol }
}

pub fn rig() -> Rig {
    rig_with(MockChannel::new(), default_descriptor(), 0)
}

/// Tick the event loop until the channel's inbox is drained.
pub fn pump(rig: &mut Rig) {
    for _ in 0..64 {
        rig.protocol.event_loop().expect("event loop failed while pumping");
    }
}
