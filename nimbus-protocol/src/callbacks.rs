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

//! Host capability records.
//!
//! The host supplies two capability sets: [`Callbacks`] for platform services
//! (clock, CRC, flash, signaling) and [`Descriptor`] for application-level
//! dispatch (functions, variables, events, system info, app-state
//! persistence). Both are owned by value inside the engine; anything the host
//! wants to observe afterwards needs shared interior state.

use heapless::Vec;
use nimbus_common::{CompletionError, ProtocolError, MAX_VARIABLE_VALUE_SIZE};

use crate::describe::Appender;

/// Opaque handle a host attaches to a tracked outbound message; handed back
/// through [`Callbacks::send_complete`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionToken(pub u32);

/// Firmware transfer descriptor passed to the flash writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTransfer {
    /// Total file length in bytes, announced at transfer begin.
    pub file_length: u32,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u16,
    /// Transfer flags announced at begin.
    pub flags: u8,
    /// CRC announced at begin, verified over the whole file on completion.
    pub file_crc: u32,
}

/// Selector naming one persisted app-state category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStateSelector {
    DescribeApp,
    DescribeSystem,
    Subscriptions,
    ProtocolFlags,
}

/// Operation requested from the app-state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStateOp {
    /// Compute the current fingerprint without persisting.
    Compute,
    /// Persist the given value as the fingerprint.
    Persist(u32),
    /// Compute the current fingerprint and persist it.
    ComputeAndPersist,
}

/// Data type of a cloud-readable variable.
///
/// The discriminants are wire values: the describe manifest encodes a
/// variable's type as the ASCII digit `'0' + discriminant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VariableType {
    Bool = 1,
    Int = 2,
    String = 4,
    Double = 9,
}

/// Buffer a variable value is serialized into.
pub type VariableValue = Vec<u8, MAX_VARIABLE_VALUE_SIZE>;

/// Platform capability record.
pub trait Callbacks {
    /// Monotonic milliseconds. Wraparound is tolerated by the engine.
    fn millis(&mut self) -> u32;

    /// Yield to the platform for roughly `ms` milliseconds.
    fn sleep(&mut self, ms: u32);

    /// Set the realtime clock from a cloud time response (UNIX seconds).
    fn set_time(&mut self, time: u32);

    /// Cloud-requested signaling (e.g. an identification LED), on or off.
    fn signal(&mut self, on: bool);

    /// One-shot CRC over a buffer. Used for subscription checksums.
    fn calculate_crc(&mut self, data: &[u8]) -> u32;

    /// Fold more data into a running CRC accumulator. `running` is either 0
    /// or a previous return value of this method.
    fn crc_update(&mut self, running: u32, data: &[u8]) -> u32;

    /// Seed for the token counter, from a cryptographic random source.
    fn random_token_seed(&mut self) -> u32;

    /// Delivery edge of the ack tracker. Called exactly once per registered
    /// token, with the final outcome of the tracked message. The handler must
    /// not re-enter the engine's event loop.
    fn send_complete(&mut self, token: CompletionToken, result: Result<(), CompletionError>);

    /// Open the flash region for an incoming firmware file.
    fn prepare_for_firmware_update(&mut self, tx: &mut FileTransfer) -> Result<(), ProtocolError>;

    /// Write one received chunk at the given file offset.
    fn save_firmware_chunk(
        &mut self,
        tx: &FileTransfer,
        offset: u32,
        chunk: &[u8],
    ) -> Result<(), ProtocolError>;

    /// Close the transfer. `commit` is false when the transfer was aborted or
    /// failed verification; the writer must release resources either way.
    fn finish_firmware_update(
        &mut self,
        tx: &mut FileTransfer,
        commit: bool,
    ) -> Result<(), ProtocolError>;
}

/// Application capability record.
pub trait Descriptor {
    fn num_functions(&self) -> usize;

    fn function_key(&self, index: usize) -> Option<&str>;

    /// Invoke a cloud function. Returns the function's integer result.
    fn call_function(&mut self, key: &str, args: &str) -> Result<i32, ProtocolError>;

    fn num_variables(&self) -> usize;

    fn variable_key(&self, index: usize) -> Option<&str>;

    fn variable_type(&self, key: &str) -> Option<VariableType>;

    /// Serialize the variable's current value into `out`.
    fn get_variable(&mut self, key: &str, out: &mut VariableValue)
        -> Result<VariableType, ProtocolError>;

    /// Deliver a subscribed event to user code.
    fn call_event_handler(&mut self, name: &str, data: &[u8]);

    /// Append the system-info section of the describe manifest (raw
    /// key-value text, no surrounding braces). Returns false when the
    /// platform has none.
    fn append_system_info(&mut self, out: &mut dyn Appender) -> bool;

    /// Append binary diagnostics. Returns false when unsupported.
    fn append_metrics(&mut self, _out: &mut dyn Appender, _flags: u32, _page: u32) -> bool {
        false
    }

    fn was_ota_upgrade_successful(&self) -> bool;

    /// The cloud has been told about the update status (via hello exchange).
    fn ota_upgrade_status_sent(&mut self);

    /// App-state store access. Returns the computed value for `Compute` and
    /// `ComputeAndPersist`; the persisted value for `Persist`.
    fn app_state(&mut self, selector: AppStateSelector, op: AppStateOp) -> u32;
}
