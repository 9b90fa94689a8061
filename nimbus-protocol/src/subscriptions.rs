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

//! Event subscriptions.
//!
//! The table holds `(prefix, scope)` pairs, deduplicated. Inbound events are
//! dispatched to user code when any prefix matches. The set's checksum is an
//! XOR fold of the per-entry CRC, so it is independent of insertion order:
//! two devices holding the same subscriptions always agree.

use heapless::{String, Vec};
use log::info;
use nimbus_common::{
    MessageId, ProtocolError, Token, MAX_EVENT_NAME_LENGTH, MAX_SUBSCRIPTIONS,
};

use crate::callbacks::Descriptor;
use crate::channel::MessageChannel;
use crate::coap;
use crate::message::Message;

/// Breadth of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Events published by devices belonging to this account/product.
    MyDevices,
    /// The full public event stream matching the prefix.
    Firehose,
}

impl SubscriptionScope {
    fn canonical_byte(self) -> u8 {
        match self {
            Self::MyDevices => b'u',
            Self::Firehose => b'*',
        }
    }
}

struct Subscription {
    prefix: String<MAX_EVENT_NAME_LENGTH>,
    scope: SubscriptionScope,
}

/// Bounded, deduplicated subscription table.
#[derive(Default)]
pub struct Subscriptions {
    entries: Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

impl Subscriptions {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add a subscription. Adding an existing `(prefix, scope)` pair is a
    /// no-op.
    pub fn add(&mut self, prefix: &str, scope: SubscriptionScope) -> Result<(), ProtocolError> {
        if self
            .entries
            .iter()
            .any(|entry| entry.scope == scope && entry.prefix.as_str() == prefix)
        {
            return Ok(());
        }
        let mut owned = String::new();
        owned
            .push_str(prefix)
            .map_err(|()| ProtocolError::InsufficientStorage)?;
        self.entries
            .push(Subscription { prefix: owned, scope })
            .map_err(|_| ProtocolError::NoMemory)
    }

    /// Whether any subscription prefix matches the event name.
    pub fn matches(&self, event_name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| event_name.starts_with(entry.prefix.as_str()))
    }

    /// Dispatch an inbound event to user code if a prefix matches.
    pub fn handle_event<D: Descriptor>(
        &self,
        descriptor: &mut D,
        event_name: &str,
        data: &[u8],
    ) {
        if self.matches(event_name) {
            descriptor.call_event_handler(event_name, data);
        }
    }

    /// Checksum of the subscription set.
    ///
    /// XOR fold of `crc(scope byte ‖ prefix)` per entry. The fold makes the
    /// value order-independent, which keeps it stable for fingerprint
    /// comparison across sessions and devices.
    pub fn checksum(&self, mut crc: impl FnMut(&[u8]) -> u32) -> u32 {
        let mut sum = 0;
        for entry in &self.entries {
            let mut canonical: Vec<u8, { MAX_EVENT_NAME_LENGTH + 1 }> = Vec::new();
            // Capacity is prefix capacity plus the scope byte; pushes cannot
            // fail.
            let _ = canonical.push(entry.scope.canonical_byte());
            let _ = canonical.extend_from_slice(entry.prefix.as_bytes());
            sum ^= crc(&canonical);
        }
        sum
    }

    /// Announce every subscription to the server. Returns the message id of
    /// the last request so the caller can track its acknowledgement.
    pub fn send_subscriptions<C: MessageChannel>(
        &self,
        channel: &mut C,
        mut next_token: impl FnMut() -> Token,
    ) -> Result<Option<MessageId>, ProtocolError> {
        let mut last_id = None;
        let mut msg = Message::new();
        for entry in &self.entries {
            channel.create(&mut msg)?;
            coap::subscription(
                &mut msg,
                next_token(),
                entry.prefix.as_str(),
                entry.scope == SubscriptionScope::MyDevices,
            )?;
            let id = msg.id();
            channel.send(&mut msg)?;
            info!("Sent subscription '{}' id={}", entry.prefix.as_str(), id);
            last_id = Some(id);
        }
        Ok(last_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_crc(data: &[u8]) -> u32 {
        // Cheap stand-in with the mixing this test needs.
        data.iter()
            .fold(0x811c_9dc5u32, |acc, b| (acc ^ u32::from(*b)).wrapping_mul(0x0100_0193))
    }

    #[test]
    fn duplicate_pairs_are_ignored() {
        let mut subs = Subscriptions::new();
        subs.add("temp", SubscriptionScope::MyDevices).unwrap();
        subs.add("temp", SubscriptionScope::MyDevices).unwrap();
        subs.add("temp", SubscriptionScope::Firehose).unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn checksum_is_order_independent() {
        let mut a = Subscriptions::new();
        a.add("temp", SubscriptionScope::MyDevices).unwrap();
        a.add("door", SubscriptionScope::Firehose).unwrap();

        let mut b = Subscriptions::new();
        b.add("door", SubscriptionScope::Firehose).unwrap();
        b.add("temp", SubscriptionScope::MyDevices).unwrap();

        assert_eq!(a.checksum(test_crc), b.checksum(test_crc));
    }

    #[test]
    fn checksum_distinguishes_scope() {
        let mut a = Subscriptions::new();
        a.add("temp", SubscriptionScope::MyDevices).unwrap();
        let mut b = Subscriptions::new();
        b.add("temp", SubscriptionScope::Firehose).unwrap();
        assert_ne!(a.checksum(test_crc), b.checksum(test_crc));
    }

    #[test]
    fn empty_set_checksum_is_zero() {
        assert_eq!(Subscriptions::new().checksum(test_crc), 0);
    }

    #[test]
    fn prefix_matching() {
        let mut subs = Subscriptions::new();
        subs.add("sensor/", SubscriptionScope::MyDevices).unwrap();
        assert!(subs.matches("sensor/temp"));
        assert!(!subs.matches("actuator/valve"));
    }

    #[test]
    fn capacity_limit_reports_no_memory() {
        let mut subs = Subscriptions::new();
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for name in names {
            subs.add(name, SubscriptionScope::Firehose).unwrap();
        }
        assert_eq!(
            subs.add("overflow", SubscriptionScope::Firehose),
            Err(ProtocolError::NoMemory)
        );
    }
}
