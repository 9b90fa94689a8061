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

//! Acknowledgement completion tracking.
//!
//! A bounded table of `(message id, handler, remaining timeout)` entries.
//! Every registered handler is delivered exactly once: by a matching reply,
//! by its timeout expiring, or by a session-ending `clear`. Entries are
//! removed before the handler is handed out, so double delivery is
//! impossible by construction.

use heapless::Vec;
use nimbus_common::MessageId;

struct Entry<H> {
    id: MessageId,
    remaining_ms: u32,
    handler: H,
}

/// Bounded completion-handler table.
///
/// `H` is whatever the owner uses to route a completion; the engine stores
/// lightweight tokens and delivers them through its platform callbacks.
pub struct AckTracker<H, const N: usize> {
    entries: Vec<Entry<H>, N>,
}

impl<H, const N: usize> AckTracker<H, N> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a handler for `id`. Hands the handler back when the table is
    /// at capacity so the caller can fail its own operation.
    pub fn add(&mut self, id: MessageId, handler: H, timeout_ms: u32) -> Result<(), H> {
        match self.entries.push(Entry { id, remaining_ms: timeout_ms, handler }) {
            Ok(()) => Ok(()),
            Err(entry) => Err(entry.handler),
        }
    }

    /// Remove and return the handler registered for `id`, if any.
    pub fn take(&mut self, id: MessageId) -> Option<H> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index).handler)
    }

    /// Advance time by `dt_ms`. Handlers whose timeout elapses are removed
    /// and passed to `expired` in registration order.
    pub fn update(&mut self, dt_ms: u32, mut expired: impl FnMut(H)) {
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].remaining_ms <= dt_ms {
                let entry = self.entries.remove(index);
                expired(entry.handler);
            } else {
                self.entries[index].remaining_ms -= dt_ms;
                index += 1;
            }
        }
    }

    /// Abandon every entry, passing each handler to `aborted` in
    /// registration order. Called when a session ends.
    pub fn clear(&mut self, mut aborted: impl FnMut(H)) {
        while !self.entries.is_empty() {
            let entry = self.entries.remove(0);
            aborted(entry.handler);
        }
    }
}

impl<H, const N: usize> Default for AckTracker<H, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_the_entry() {
        let mut tracker: AckTracker<u32, 4> = AckTracker::new();
        tracker.add(7, 100, 1000).unwrap();
        assert_eq!(tracker.take(7), Some(100));
        assert_eq!(tracker.take(7), None);
    }

    #[test]
    fn capacity_exhaustion_returns_the_handler() {
        let mut tracker: AckTracker<u32, 2> = AckTracker::new();
        tracker.add(1, 10, 1000).unwrap();
        tracker.add(2, 20, 1000).unwrap();
        assert_eq!(tracker.add(3, 30, 1000), Err(30));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn update_expires_in_registration_order() {
        let mut tracker: AckTracker<u32, 4> = AckTracker::new();
        tracker.add(1, 10, 500).unwrap();
        tracker.add(2, 20, 1500).unwrap();
        tracker.add(3, 30, 400).unwrap();

        let mut fired = heapless::Vec::<u32, 4>::new();
        tracker.update(600, |h| fired.push(h).unwrap());
        assert_eq!(fired.as_slice(), &[10, 30]);
        assert_eq!(tracker.len(), 1);

        fired.clear();
        tracker.update(900, |h| fired.push(h).unwrap());
        assert_eq!(fired.as_slice(), &[20]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn exactly_one_delivery_per_id() {
        // Success, timeout and clear are mutually exclusive per entry.
        let mut tracker: AckTracker<u32, 4> = AckTracker::new();
        tracker.add(1, 10, 1000).unwrap();
        tracker.add(2, 20, 1000).unwrap();
        tracker.add(3, 30, 100).unwrap();

        let taken = tracker.take(1);
        assert_eq!(taken, Some(10));

        let mut expired = heapless::Vec::<u32, 4>::new();
        tracker.update(100, |h| expired.push(h).unwrap());
        assert_eq!(expired.as_slice(), &[30]);

        let mut cleared = heapless::Vec::<u32, 4>::new();
        tracker.clear(|h| cleared.push(h).unwrap());
        assert_eq!(cleared.as_slice(), &[20]);

        // Nothing left to deliver through any path.
        assert_eq!(tracker.take(2), None);
        tracker.update(10_000, |_| panic!("no entries may expire twice"));
    }
}
