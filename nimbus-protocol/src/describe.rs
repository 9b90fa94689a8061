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

//! Capability manifest serialization.
//!
//! The describe payload announces the device's functions, variables and
//! system attributes. It is serialized through an [`Appender`] sink so the
//! same walk can fill a network buffer or merely count bytes (measure-only
//! mode, used to report the required buffer size to callers).
//!
//! Overflow during serialization is fatal to the engine: a truncated manifest
//! must never reach the wire, since the server would keep asking for it and
//! the device would reconnect forever.

use nimbus_common::{MAX_FUNCTION_KEY_LENGTH, MAX_VARIABLE_KEY_LENGTH};

/// Describe content selector: application section (functions + variables).
pub const DESCRIBE_APPLICATION: u8 = 1 << 0;
/// Describe content selector: system-info section.
pub const DESCRIBE_SYSTEM: u8 = 1 << 1;
/// Describe content selector: binary diagnostics.
pub const DESCRIBE_METRICS: u8 = 1 << 2;
/// Default for requests that carry no flag byte.
pub const DESCRIBE_DEFAULT: u8 = DESCRIBE_APPLICATION | DESCRIBE_SYSTEM;
/// Highest valid flag combination.
pub const DESCRIBE_MAX: u8 = 0x07;

/// Byte sink for manifest serialization. Implementations record overflow
/// instead of failing mid-write so the builder can run to completion and the
/// caller can judge the full required size.
pub trait Appender {
    fn append(&mut self, bytes: &[u8]);

    fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }
}

/// Appender backed by a caller-owned buffer.
pub struct BufferAppender<'a> {
    buf: &'a mut [u8],
    written: usize,
    overflow: usize,
}

impl<'a> BufferAppender<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0, overflow: 0 }
    }

    /// Bytes successfully written.
    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Bytes that did not fit. Non-zero means the output is unusable.
    pub fn overflowed(&self) -> usize {
        self.overflow
    }
}

impl Appender for BufferAppender<'_> {
    fn append(&mut self, bytes: &[u8]) {
        let room = self.buf.len() - self.written;
        let take = bytes.len().min(room);
        self.buf[self.written..self.written + take].copy_from_slice(&bytes[..take]);
        self.written += take;
        self.overflow += bytes.len() - take;
    }
}

/// Appender that only counts bytes; nothing is stored.
#[derive(Debug, Default)]
pub struct CountingAppender {
    count: usize,
}

impl CountingAppender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Appender for CountingAppender {
    fn append(&mut self, bytes: &[u8]) {
        self.count += bytes.len();
    }
}

/// Wraps a sink and writes the pending section separator only once the
/// section actually produces bytes. A provider that reports no content
/// (`append_system_info` returning false with nothing appended) must not
/// leave a dangling comma in the manifest.
struct SeparatedSection<'a> {
    out: &'a mut dyn Appender,
    comma_pending: bool,
}

impl Appender for SeparatedSection<'_> {
    fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.comma_pending {
            self.comma_pending = false;
            self.out.append_byte(b',');
        }
        self.out.append(bytes);
    }
}

/// Size report for a describe payload, from measure-only serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescribeData {
    /// Bytes the manifest currently needs.
    pub current_size: usize,
    /// Conservative transmit ceiling after encryption overhead.
    pub maximum_size: usize,
}

/// Transmit ceiling reported by [`describe_data`], accounting for transport
/// encryption overhead on top of the frame budget.
const DESCRIBE_MAX_TRANSMIT: usize = 768;

/// Packet-type tag in the binary metrics prefix.
const METRICS_PACKET_TYPE: u8 = 0x02;

fn truncate_key(key: &str, max: usize) -> &str {
    if key.len() <= max {
        return key;
    }
    let mut end = max;
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    &key[..end]
}

/// Serialize the manifest selected by `flags` into `out`.
///
/// Binary diagnostics are produced only when `METRICS` is requested in
/// isolation; any other combination yields the text manifest.
pub fn build_describe<D: crate::callbacks::Descriptor + ?Sized>(
    out: &mut dyn Appender,
    descriptor: &mut D,
    flags: u8,
) {
    if flags == DESCRIBE_METRICS {
        // Null lead byte marks binary data; the next two bytes tag the packet
        // type.
        out.append(&[0x00, METRICS_PACKET_TYPE, 0x00]);
        descriptor.append_metrics(out, 1, 0);
        return;
    }

    out.append_byte(b'{');
    let mut has_content = false;

    if flags & DESCRIBE_APPLICATION != 0 {
        has_content = true;
        out.append(b"\"f\":[");
        for index in 0..descriptor.num_functions() {
            if index > 0 {
                out.append_byte(b',');
            }
            out.append_byte(b'"');
            if let Some(key) = descriptor.function_key(index) {
                out.append(truncate_key(key, MAX_FUNCTION_KEY_LENGTH).as_bytes());
            }
            out.append_byte(b'"');
        }
        out.append(b"],\"v\":{");
        for index in 0..descriptor.num_variables() {
            if index > 0 {
                out.append_byte(b',');
            }
            out.append_byte(b'"');
            let mut type_digit = b'0';
            if let Some(key) = descriptor.variable_key(index) {
                out.append(truncate_key(key, MAX_VARIABLE_KEY_LENGTH).as_bytes());
                if let Some(var_type) = descriptor.variable_type(key) {
                    type_digit = b'0' + var_type as u8;
                }
            }
            out.append(b"\":");
            out.append_byte(type_digit);
        }
        out.append_byte(b'}');
    }

    if flags & DESCRIBE_SYSTEM != 0 {
        let mut section = SeparatedSection { out: &mut *out, comma_pending: has_content };
        descriptor.append_system_info(&mut section);
    }
    out.append_byte(b'}');
}

/// Measure-only run of the builder.
pub fn describe_data<D: crate::callbacks::Descriptor + ?Sized>(
    descriptor: &mut D,
    flags: u8,
) -> DescribeData {
    let mut counter = CountingAppender::new();
    build_describe(&mut counter, descriptor, flags);
    DescribeData {
        current_size: counter.count(),
        maximum_size: DESCRIBE_MAX_TRANSMIT,
    }
}
