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

//! Recording host capability implementations.

use std::sync::{Arc, Mutex};

use nimbus_common::{CompletionError, ProtocolError};
use nimbus_protocol::callbacks::{
    AppStateOp, AppStateSelector, Callbacks, CompletionToken, Descriptor, FileTransfer,
    VariableType, VariableValue,
};
use nimbus_protocol::describe::{
    build_describe, Appender, BufferAppender, DESCRIBE_APPLICATION, DESCRIBE_SYSTEM,
};
use tracing::trace;

use crate::channel::SharedAppState;

struct HostInner {
    now_ms: u32,
    /// Milliseconds the clock advances per `millis()` call, so polling loops
    /// always make progress.
    auto_tick_ms: u32,
    token_seed: u32,
    time_set: Vec<u32>,
    signals: Vec<bool>,
    completions: Vec<(CompletionToken, Result<(), CompletionError>)>,
    prepared: Vec<FileTransfer>,
    finished: Vec<bool>,
    firmware: Vec<u8>,
    prepare_error: Option<ProtocolError>,
    finish_error: Option<ProtocolError>,
}

impl Default for HostInner {
    fn default() -> Self {
        Self {
            now_ms: 1,
            auto_tick_ms: 1,
            token_seed: 0x1000_0001,
            time_set: Vec::new(),
            signals: Vec::new(),
            completions: Vec::new(),
            prepared: Vec::new(),
            finished: Vec::new(),
            firmware: Vec::new(),
            prepare_error: None,
            finish_error: None,
        }
    }
}

/// Recording platform capability record.
///
/// Clones share state; keep one handle in the test and move another into the
/// engine.
#[derive(Clone, Default)]
pub struct MockHost {
    inner: Arc<Mutex<HostInner>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the clock from advancing on its own.
    pub fn freeze_clock(self) -> Self {
        self.inner.lock().unwrap().auto_tick_ms = 0;
        self
    }

    pub fn advance(&self, ms: u32) {
        self.inner.lock().unwrap().now_ms += ms;
    }

    pub fn now(&self) -> u32 {
        self.inner.lock().unwrap().now_ms
    }

    /// Clock values delivered through `set_time`.
    pub fn time_set(&self) -> Vec<u32> {
        self.inner.lock().unwrap().time_set.clone()
    }

    pub fn signals(&self) -> Vec<bool> {
        self.inner.lock().unwrap().signals.clone()
    }

    /// Completion deliveries, in order.
    pub fn completions(&self) -> Vec<(CompletionToken, Result<(), CompletionError>)> {
        self.inner.lock().unwrap().completions.clone()
    }

    pub fn prepared_transfers(&self) -> Vec<FileTransfer> {
        self.inner.lock().unwrap().prepared.clone()
    }

    /// `finish_firmware_update` commit flags, in order.
    pub fn finishes(&self) -> Vec<bool> {
        self.inner.lock().unwrap().finished.clone()
    }

    /// Bytes written to flash so far.
    pub fn firmware(&self) -> Vec<u8> {
        self.inner.lock().unwrap().firmware.clone()
    }

    pub fn fail_next_prepare(&self, err: ProtocolError) {
        self.inner.lock().unwrap().prepare_error = Some(err);
    }

    pub fn fail_next_finish(&self, err: ProtocolError) {
        self.inner.lock().unwrap().finish_error = Some(err);
    }
}

impl Callbacks for MockHost {
    fn millis(&mut self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now_ms;
        inner.now_ms += inner.auto_tick_ms;
        now
    }

    fn sleep(&mut self, ms: u32) {
        self.inner.lock().unwrap().now_ms += ms;
    }

    fn set_time(&mut self, time: u32) {
        trace!(time, "set_time");
        self.inner.lock().unwrap().time_set.push(time);
    }

    fn signal(&mut self, on: bool) {
        self.inner.lock().unwrap().signals.push(on);
    }

    fn calculate_crc(&mut self, data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    fn crc_update(&mut self, running: u32, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(running);
        hasher.update(data);
        hasher.finalize()
    }

    fn random_token_seed(&mut self) -> u32 {
        self.inner.lock().unwrap().token_seed
    }

    fn send_complete(&mut self, token: CompletionToken, result: Result<(), CompletionError>) {
        trace!(?token, ?result, "send_complete");
        self.inner.lock().unwrap().completions.push((token, result));
    }

    fn prepare_for_firmware_update(&mut self, tx: &mut FileTransfer) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.prepare_error.take() {
            return Err(err);
        }
        inner.prepared.push(*tx);
        inner.firmware.clear();
        Ok(())
    }

    fn save_firmware_chunk(
        &mut self,
        _tx: &FileTransfer,
        offset: u32,
        chunk: &[u8],
    ) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        let offset = offset as usize;
        if inner.firmware.len() < offset + chunk.len() {
            inner.firmware.resize(offset + chunk.len(), 0);
        }
        inner.firmware[offset..offset + chunk.len()].copy_from_slice(chunk);
        Ok(())
    }

    fn finish_firmware_update(
        &mut self,
        _tx: &mut FileTransfer,
        commit: bool,
    ) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        inner.finished.push(commit);
        if let Some(err) = inner.finish_error.take() {
            return Err(err);
        }
        Ok(())
    }
}

/// Shared observation log for a [`MockDescriptor`].
#[derive(Clone, Default)]
pub struct DescriptorLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Default)]
struct LogInner {
    calls: Vec<(String, String)>,
    events: Vec<(String, Vec<u8>)>,
    ota_status_sent: usize,
}

impl DescriptorLog {
    /// Function invocations as `(key, args)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Events delivered to user code as `(name, data)`.
    pub fn events(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn ota_status_sent(&self) -> usize {
        self.inner.lock().unwrap().ota_status_sent
    }
}

/// Configurable application capability record.
///
/// Functions, variables and system info are fixed at construction (the
/// engine borrows keys from the record); observations go to a shared
/// [`DescriptorLog`] the test keeps a handle to.
pub struct MockDescriptor {
    functions: Vec<String>,
    variables: Vec<(String, VariableType, Vec<u8>)>,
    system_info: Option<String>,
    metrics: Vec<u8>,
    ota_successful: bool,
    function_return: i32,
    app_state: SharedAppState,
    log: DescriptorLog,
}

impl MockDescriptor {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            variables: Vec::new(),
            system_info: None,
            metrics: Vec::new(),
            ota_successful: false,
            function_return: 0,
            app_state: SharedAppState::new(),
            log: DescriptorLog::default(),
        }
    }

    pub fn with_function(mut self, key: &str) -> Self {
        self.functions.push(key.to_string());
        self
    }

    pub fn with_variable(mut self, key: &str, var_type: VariableType, value: &[u8]) -> Self {
        self.variables.push((key.to_string(), var_type, value.to_vec()));
        self
    }

    /// Raw system-info text appended to the manifest (no surrounding braces).
    pub fn with_system_info(mut self, raw: &str) -> Self {
        self.system_info = Some(raw.to_string());
        self
    }

    pub fn with_metrics(mut self, blob: &[u8]) -> Self {
        self.metrics = blob.to_vec();
        self
    }

    pub fn with_ota_successful(mut self, successful: bool) -> Self {
        self.ota_successful = successful;
        self
    }

    pub fn with_function_return(mut self, value: i32) -> Self {
        self.function_return = value;
        self
    }

    /// Share the persisted fingerprint store with a channel.
    pub fn with_app_state(mut self, state: SharedAppState) -> Self {
        self.app_state = state;
        self
    }

    pub fn log(&self) -> DescriptorLog {
        self.log.clone()
    }

    /// CRC of the manifest this record currently produces for `flags`;
    /// what the app-state store computes when asked to persist.
    pub fn describe_crc(&mut self, flags: u8) -> u32 {
        let mut buf = [0u8; 1024];
        let mut appender = BufferAppender::new(&mut buf);
        build_describe(&mut appender, self, flags);
        let len = appender.len();
        crc32fast::hash(&buf[..len])
    }
}

impl Default for MockDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor for MockDescriptor {
    fn num_functions(&self) -> usize {
        self.functions.len()
    }

    fn function_key(&self, index: usize) -> Option<&str> {
        self.functions.get(index).map(String::as_str)
    }

    fn call_function(&mut self, key: &str, args: &str) -> Result<i32, ProtocolError> {
        if !self.functions.iter().any(|f| f == key) {
            return Err(ProtocolError::InvalidState);
        }
        self.log
            .inner
            .lock()
            .unwrap()
            .calls
            .push((key.to_string(), args.to_string()));
        Ok(self.function_return)
    }

    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn variable_key(&self, index: usize) -> Option<&str> {
        self.variables.get(index).map(|(key, _, _)| key.as_str())
    }

    fn variable_type(&self, key: &str) -> Option<VariableType> {
        self.variables
            .iter()
            .find(|(name, _, _)| name == key)
            .map(|(_, var_type, _)| *var_type)
    }

    fn get_variable(
        &mut self,
        key: &str,
        out: &mut VariableValue,
    ) -> Result<VariableType, ProtocolError> {
        let (_, var_type, value) = self
            .variables
            .iter()
            .find(|(name, _, _)| name == key)
            .ok_or(ProtocolError::InvalidState)?;
        out.extend_from_slice(value)
            .map_err(|()| ProtocolError::InsufficientStorage)?;
        Ok(*var_type)
    }

    fn call_event_handler(&mut self, name: &str, data: &[u8]) {
        self.log
            .inner
            .lock()
            .unwrap()
            .events
            .push((name.to_string(), data.to_vec()));
    }

    fn append_system_info(&mut self, out: &mut dyn Appender) -> bool {
        match &self.system_info {
            Some(info) => {
                out.append(info.as_bytes());
                true
            }
            None => false,
        }
    }

    fn append_metrics(&mut self, out: &mut dyn Appender, _flags: u32, _page: u32) -> bool {
        if self.metrics.is_empty() {
            return false;
        }
        out.append(&self.metrics);
        true
    }

    fn was_ota_upgrade_successful(&self) -> bool {
        self.ota_successful
    }

    fn ota_upgrade_status_sent(&mut self) {
        self.log.inner.lock().unwrap().ota_status_sent += 1;
    }

    fn app_state(&mut self, selector: AppStateSelector, op: AppStateOp) -> u32 {
        let computed = match selector {
            AppStateSelector::DescribeApp => self.describe_crc(DESCRIBE_APPLICATION),
            AppStateSelector::DescribeSystem => self.describe_crc(DESCRIBE_SYSTEM),
            AppStateSelector::Subscriptions | AppStateSelector::ProtocolFlags => 0,
        };
        match op {
            AppStateOp::Compute => computed,
            AppStateOp::Persist(value) => {
                self.app_state.update(|state| match selector {
                    AppStateSelector::DescribeApp => state.app_describe_crc = value,
                    AppStateSelector::DescribeSystem => state.system_describe_crc = value,
                    AppStateSelector::Subscriptions => state.subscriptions_crc = value,
                    AppStateSelector::ProtocolFlags => state.protocol_flags = value,
                });
                value
            }
            AppStateOp::ComputeAndPersist => {
                self.app_state.update(|state| match selector {
                    AppStateSelector::DescribeApp => state.app_describe_crc = computed,
                    AppStateSelector::DescribeSystem => state.system_describe_crc = computed,
                    AppStateSelector::Subscriptions => state.subscriptions_crc = computed,
                    AppStateSelector::ProtocolFlags => state.protocol_flags = computed,
                });
                computed
            }
        }
    }
}
