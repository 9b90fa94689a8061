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

//! Protocol frame buffer.

use heapless::Vec;
use nimbus_common::{MessageId, ProtocolError, MAX_MESSAGE_SIZE};

/// A single protocol frame plus its channel-level metadata.
///
/// The buffer holds the raw CoAP bytes. The message id is kept alongside the
/// buffer because the channel assigns ids: builders write a zero placeholder
/// into header bytes 2..4 and the channel patches in `id()` at send time.
#[derive(Debug, Default)]
pub struct Message {
    buf: Vec<u8, MAX_MESSAGE_SIZE>,
    id: MessageId,
    confirm_received: bool,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw frame bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable view of the frame bytes. Channels use this to patch the
    /// message id into header bytes 2..4 at send time.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remaining capacity in bytes.
    pub fn available(&self) -> usize {
        MAX_MESSAGE_SIZE - self.buf.len()
    }

    /// Drop the current contents and metadata, keeping the storage.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.id = 0;
        self.confirm_received = false;
    }

    /// Drop the frame bytes but keep the id and confirm flag, so a message
    /// prepared by the channel can be filled by a frame builder.
    pub fn clear_bytes(&mut self) {
        self.buf.clear();
    }

    /// Append bytes to the frame.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|()| ProtocolError::InsufficientStorage)
    }

    /// Append a single byte to the frame.
    pub fn push(&mut self, byte: u8) -> Result<(), ProtocolError> {
        self.buf.push(byte).map_err(|_| ProtocolError::InsufficientStorage)
    }

    /// Replace the frame contents.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.buf.clear();
        self.extend(bytes)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn set_id(&mut self, id: MessageId) {
        self.id = id;
    }

    /// Whether `send` must block until transport-level acknowledgement.
    pub fn confirm_received(&self) -> bool {
        self.confirm_received
    }

    pub fn set_confirm_received(&mut self, confirm: bool) {
        self.confirm_received = confirm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_clear() {
        let mut msg = Message::new();
        msg.extend(&[0x40, 0x00, 0x12, 0x34]).unwrap();
        msg.set_id(0x1234);
        msg.set_confirm_received(true);
        assert_eq!(msg.len(), 4);
        assert_eq!(msg.id(), 0x1234);
        assert!(msg.confirm_received());

        msg.clear();
        assert!(msg.is_empty());
        assert_eq!(msg.id(), 0);
        assert!(!msg.confirm_received());
    }

    #[test]
    fn extend_past_capacity_reports_storage() {
        let mut msg = Message::new();
        let filler = [0u8; MAX_MESSAGE_SIZE];
        msg.extend(&filler).unwrap();
        assert_eq!(msg.push(0), Err(ProtocolError::InsufficientStorage));
    }
}
