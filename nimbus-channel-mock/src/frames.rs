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

//! Server-side frame builders for tests.
//!
//! These construct the frames a cloud endpoint would send, independently of
//! the engine's own codec, so tests do not verify the codec against itself.

const CON: u8 = 0x40;
const NON: u8 = 0x50;
const ACK: u8 = 0x60;
const RST: u8 = 0x70;

const GET: u8 = 0x01;
const POST: u8 = 0x02;
const PUT: u8 = 0x03;
const CONTENT: u8 = 0x45;

fn header(type_bits: u8, code: u8, id: u16, token: Option<u32>) -> Vec<u8> {
    let tkl = if token.is_some() { 4 } else { 0 };
    let mut frame = vec![type_bits | tkl, code, (id >> 8) as u8, id as u8];
    if let Some(token) = token {
        frame.extend_from_slice(&token.to_be_bytes());
    }
    frame
}

fn push_option(frame: &mut Vec<u8>, last_number: &mut u16, number: u16, value: &[u8]) {
    let delta = number - *last_number;
    *last_number = number;
    assert!(delta < 13, "test frames only use small option deltas");
    let (len_nibble, len_ext) = if value.len() < 13 {
        (value.len() as u8, None)
    } else {
        (13, Some((value.len() - 13) as u8))
    };
    frame.push((delta as u8) << 4 | len_nibble);
    if let Some(ext) = len_ext {
        frame.push(ext);
    }
    frame.extend_from_slice(value);
}

/// Empty acknowledgement for the device message with `id`.
pub fn empty_ack(id: u16) -> Vec<u8> {
    header(ACK, 0x00, id, None)
}

/// Reset for the device message with `id`.
pub fn rst(id: u16) -> Vec<u8> {
    header(RST, 0x00, id, None)
}

/// Acknowledgement carrying a response code.
pub fn coded_ack(id: u16, code: u8) -> Vec<u8> {
    header(ACK, code, id, None)
}

/// Server keep-alive ping.
pub fn ping(id: u16) -> Vec<u8> {
    header(CON, 0x00, id, None)
}

/// Server hello (the response to the device's hello).
pub fn hello(id: u16) -> Vec<u8> {
    let mut frame = header(CON, POST, id, None);
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"h");
    frame
}

/// Describe request; `flags` rides in a Uri-Query byte when present.
pub fn describe_request(id: u16, token: u32, flags: Option<u8>) -> Vec<u8> {
    let mut frame = header(CON, GET, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"d");
    if let Some(flags) = flags {
        push_option(&mut frame, &mut last, 15, &[flags]);
    }
    frame
}

/// Describe request with a 2-byte token, which the engine must tolerate.
pub fn describe_request_short_token(id: u16) -> Vec<u8> {
    let mut frame = vec![CON | 2, GET, (id >> 8) as u8, id as u8, 0xaa, 0xbb];
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"d");
    frame
}

/// Function invocation.
pub fn function_call(id: u16, token: u32, key: &str, args: &str) -> Vec<u8> {
    let mut frame = header(CON, POST, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"f");
    push_option(&mut frame, &mut last, 11, key.as_bytes());
    if !args.is_empty() {
        frame.push(0xff);
        frame.extend_from_slice(args.as_bytes());
    }
    frame
}

/// Function invocation without any token.
pub fn function_call_tokenless(id: u16, key: &str) -> Vec<u8> {
    let mut frame = header(CON, POST, id, None);
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"f");
    push_option(&mut frame, &mut last, 11, key.as_bytes());
    frame
}

/// Variable read request.
pub fn variable_request(id: u16, token: u32, key: &str) -> Vec<u8> {
    let mut frame = header(CON, GET, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"v");
    push_option(&mut frame, &mut last, 11, key.as_bytes());
    frame
}

/// Published event delivered to the device.
pub fn event(id: u16, name: &str, data: &[u8]) -> Vec<u8> {
    let mut frame = header(NON, POST, id, None);
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"e");
    push_option(&mut frame, &mut last, 11, name.as_bytes());
    if !data.is_empty() {
        frame.push(0xff);
        frame.extend_from_slice(data);
    }
    frame
}

/// Time response carrying big-endian UNIX seconds.
pub fn time_response(id: u16, token: u32, time: u32) -> Vec<u8> {
    let mut frame = header(NON, CONTENT, id, Some(token));
    frame.push(0xff);
    frame.extend_from_slice(&time.to_be_bytes());
    frame
}

/// Key-change notification; `parameter` value 1 asks the device to discard
/// its session.
pub fn key_change(id: u16, parameter: u8) -> Vec<u8> {
    let mut frame = header(CON, PUT, id, None);
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"k");
    push_option(&mut frame, &mut last, 12, &[parameter]);
    frame
}

/// Signal start/stop request.
pub fn signal(id: u16, token: u32, on: bool) -> Vec<u8> {
    let mut frame = header(CON, PUT, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, if on { b"s" } else { b"S" });
    frame
}

/// Firmware transfer begin.
pub fn update_begin(
    id: u16,
    token: u32,
    file_length: u32,
    chunk_size: u16,
    file_crc: u32,
    flags: u8,
) -> Vec<u8> {
    let mut frame = header(CON, POST, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"u");
    frame.push(0xff);
    frame.extend_from_slice(&file_length.to_be_bytes());
    frame.extend_from_slice(&chunk_size.to_be_bytes());
    frame.extend_from_slice(&file_crc.to_be_bytes());
    frame.push(flags);
    frame
}

/// One firmware chunk.
pub fn chunk(id: u16, token: u32, index: u16, data: &[u8]) -> Vec<u8> {
    let mut frame = header(CON, POST, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"c");
    frame.push(0xff);
    frame.extend_from_slice(&index.to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Firmware transfer completion.
pub fn update_done(id: u16, token: u32) -> Vec<u8> {
    let mut frame = header(CON, PUT, id, Some(token));
    let mut last = 0;
    push_option(&mut frame, &mut last, 11, b"u");
    frame
}
