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

//! Chunked firmware transfer.
//!
//! A strict state machine driving `BEGIN → CHUNK* → DONE`. Each chunk is
//! written to flash through the host's transfer capability and folded into a
//! running CRC; completion verifies the aggregate CRC announced at begin
//! before committing. Flash access goes through a narrow adapter trait so the
//! machine holds no reference back into the engine.

use log::{error, info, warn};
use nimbus_common::{ProtocolError, Token};

use crate::callbacks::{Callbacks, FileTransfer};
use crate::channel::MessageChannel;
use crate::coap::{self, code};
use crate::message::Message;

/// Transfer inactivity timeout. A transfer that sees no message for this long
/// is abandoned.
pub const TRANSFER_TIMEOUT_MS: u32 = 90_000;

/// Flash and clock access the transfer machine needs from the host.
///
/// Blanket-implemented for every [`Callbacks`] so the engine passes its
/// platform record straight through.
pub trait TransferCallbacks {
    fn prepare(&mut self, tx: &mut FileTransfer) -> Result<(), ProtocolError>;

    fn save_chunk(
        &mut self,
        tx: &FileTransfer,
        offset: u32,
        chunk: &[u8],
    ) -> Result<(), ProtocolError>;

    fn finish(&mut self, tx: &mut FileTransfer, commit: bool) -> Result<(), ProtocolError>;

    fn crc_update(&mut self, running: u32, data: &[u8]) -> u32;

    fn millis(&mut self) -> u32;
}

impl<T: Callbacks> TransferCallbacks for T {
    fn prepare(&mut self, tx: &mut FileTransfer) -> Result<(), ProtocolError> {
        self.prepare_for_firmware_update(tx)
    }

    fn save_chunk(
        &mut self,
        tx: &FileTransfer,
        offset: u32,
        chunk: &[u8],
    ) -> Result<(), ProtocolError> {
        self.save_firmware_chunk(tx, offset, chunk)
    }

    fn finish(&mut self, tx: &mut FileTransfer, commit: bool) -> Result<(), ProtocolError> {
        self.finish_firmware_update(tx, commit)
    }

    fn crc_update(&mut self, running: u32, data: &[u8]) -> u32 {
        Callbacks::crc_update(self, running, data)
    }

    fn millis(&mut self) -> u32 {
        Callbacks::millis(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Receiving,
    /// CRC verified; commit in progress.
    CompletePending,
    Failed,
}

/// Firmware transfer state machine.
pub struct ChunkedTransfer {
    state: TransferState,
    file: FileTransfer,
    next_chunk: u32,
    running_crc: u32,
    last_activity_ms: u32,
}

impl ChunkedTransfer {
    pub const fn new() -> Self {
        Self {
            state: TransferState::Idle,
            file: FileTransfer {
                file_length: 0,
                chunk_size: 0,
                flags: 0,
                file_crc: 0,
            },
            next_chunk: 0,
            running_crc: 0,
            last_activity_ms: 0,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TransferState::Receiving | TransferState::CompletePending)
    }

    /// Forget everything without touching flash. Used at session begin,
    /// before any transfer could have started.
    pub fn reset(&mut self) {
        self.state = TransferState::Idle;
        self.next_chunk = 0;
        self.running_crc = 0;
    }

    /// Abort the transfer and release flash resources. Called on any
    /// driver-level error.
    pub fn cancel(&mut self, callbacks: &mut dyn TransferCallbacks) {
        if self.is_active() {
            warn!("Cancelling firmware transfer");
            let _ = callbacks.finish(&mut self.file, false);
        }
        self.reset();
    }

    /// Abandon a transfer that has seen no traffic for the inactivity
    /// timeout. The session itself stays up.
    pub fn tick(&mut self, now: u32, callbacks: &mut dyn TransferCallbacks) {
        if self.state == TransferState::Receiving
            && now.wrapping_sub(self.last_activity_ms) > TRANSFER_TIMEOUT_MS
        {
            warn!("Firmware transfer timed out");
            self.cancel(callbacks);
        }
    }

    /// `UPDATE_BEGIN` / `SAVE_BEGIN`: open the transfer.
    ///
    /// Payload: file length (u32), chunk size (u16), file CRC (u32), flags.
    /// A begin received mid-transfer aborts the current transfer and starts
    /// fresh.
    pub fn handle_begin<C: MessageChannel>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        callbacks: &mut dyn TransferCallbacks,
    ) -> Result<(), ProtocolError> {
        let request_id = coap::message_id(message.bytes());
        let payload = coap::payload(message.bytes()).unwrap_or(&[]);
        if payload.len() < 11 {
            warn!("Short update begin payload: {} bytes", payload.len());
            return self.respond(channel, token, request_id, false);
        }

        if self.is_active() {
            warn!("Update begin during active transfer; restarting");
            self.cancel(callbacks);
        }

        self.file = FileTransfer {
            file_length: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            chunk_size: u16::from_be_bytes([payload[4], payload[5]]),
            flags: payload[10],
            file_crc: u32::from_be_bytes([payload[6], payload[7], payload[8], payload[9]]),
        };
        if self.file.chunk_size == 0 {
            warn!("Update begin with zero chunk size");
            return self.respond(channel, token, request_id, false);
        }

        if let Err(err) = callbacks.prepare(&mut self.file) {
            error!("Could not prepare for firmware update: {err}");
            self.state = TransferState::Failed;
            return self.respond(channel, token, request_id, false);
        }

        info!(
            "Starting firmware transfer: {} bytes in {}-byte chunks",
            self.file.file_length, self.file.chunk_size
        );
        self.state = TransferState::Receiving;
        self.next_chunk = 0;
        self.running_crc = 0;
        self.last_activity_ms = callbacks.millis();
        self.respond(channel, token, request_id, true)
    }

    /// `CHUNK`: write one piece. Payload: chunk index (u16) then data.
    ///
    /// Out-of-order chunks are reported missed so the server retransmits in
    /// order. Chunks outside an active transfer are discarded.
    pub fn handle_chunk<C: MessageChannel>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        callbacks: &mut dyn TransferCallbacks,
    ) -> Result<(), ProtocolError> {
        if self.state != TransferState::Receiving {
            warn!("Dropping chunk outside active transfer");
            return Ok(());
        }
        let request_id = coap::message_id(message.bytes());
        let payload = coap::payload(message.bytes()).unwrap_or(&[]);
        if payload.len() < 3 {
            warn!("Short chunk payload");
            return self.respond(channel, token, request_id, false);
        }
        self.last_activity_ms = callbacks.millis();

        let index = u32::from(u16::from_be_bytes([payload[0], payload[1]]));
        let data = &payload[2..];
        if index != self.next_chunk {
            warn!("Chunk {index} received, expected {}", self.next_chunk);
            return self.respond(channel, token, request_id, false);
        }

        let offset = index * u32::from(self.file.chunk_size);
        callbacks.save_chunk(&self.file, offset, data)?;
        self.running_crc = callbacks.crc_update(self.running_crc, data);
        self.next_chunk += 1;
        self.respond(channel, token, request_id, true)
    }

    /// `UPDATE_DONE`: verify the aggregate CRC and commit.
    pub fn handle_done<C: MessageChannel>(
        &mut self,
        token: Option<Token>,
        message: &Message,
        channel: &mut C,
        callbacks: &mut dyn TransferCallbacks,
    ) -> Result<(), ProtocolError> {
        if self.state != TransferState::Receiving {
            warn!("Dropping update done outside active transfer");
            return Ok(());
        }
        let request_id = coap::message_id(message.bytes());

        if self.running_crc != self.file.file_crc {
            error!(
                "Transfer CRC mismatch: computed {:08x}, announced {:08x}",
                self.running_crc, self.file.file_crc
            );
            self.state = TransferState::Failed;
            let _ = callbacks.finish(&mut self.file, false);
            self.respond(channel, token, request_id, false)?;
            return Err(ProtocolError::TransferCrcMismatch);
        }

        self.state = TransferState::CompletePending;
        // Leave CompletePending before propagating so a failed commit cannot
        // be finished a second time by the error-path cancel.
        if let Err(err) = callbacks.finish(&mut self.file, true) {
            error!("Firmware commit failed: {err}");
            self.state = TransferState::Failed;
            self.respond(channel, token, request_id, false)?;
            return Err(err);
        }
        info!("Firmware transfer complete: {} bytes", self.file.file_length);
        self.state = TransferState::Idle;
        self.respond(channel, token, request_id, true)
    }

    fn respond<C: MessageChannel>(
        &mut self,
        channel: &mut C,
        token: Option<Token>,
        request_id: u16,
        ok: bool,
    ) -> Result<(), ProtocolError> {
        let ack_code = if ok { code::CHANGED } else { code::BAD_REQUEST };
        let mut msg = Message::new();
        channel.create(&mut msg)?;
        coap::coded_ack(&mut msg, token, ack_code, request_id)?;
        channel.send(&mut msg)
    }
}

impl Default for ChunkedTransfer {
    fn default() -> Self {
        Self::new()
    }
}
