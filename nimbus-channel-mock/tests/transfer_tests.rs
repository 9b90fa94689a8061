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

//! Chunked firmware transfer scenarios.

mod common;

use common::rig;
use nimbus_channel_mock::frames;
use nimbus_common::ProtocolError;
use nimbus_protocol::coap::{self, code, MessageKind};

const TOKEN: u32 = 0x0fee_dfac;

fn chunks_of(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    data.chunks(chunk_size).collect()
}

#[test]
fn complete_transfer_commits_verified_firmware() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    let firmware = b"firmware-image-bytes";
    let crc = crc32fast::hash(firmware);

    rig.channel.push_incoming(&frames::update_begin(
        0x3000,
        TOKEN,
        firmware.len() as u32,
        4,
        crc,
        0,
    ));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::UpdateBegin);

    let begin_ack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&begin_ack.bytes), code::CHANGED);
    assert_eq!(rig.host.prepared_transfers().len(), 1);
    assert_eq!(rig.host.prepared_transfers()[0].file_length, firmware.len() as u32);

    for (index, piece) in chunks_of(firmware, 4).into_iter().enumerate() {
        rig.channel.push_incoming(&frames::chunk(
            0x3001 + index as u16,
            TOKEN,
            index as u16,
            piece,
        ));
        assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Chunk);
        let ack = rig.channel.take_sent().pop().unwrap();
        assert_eq!(coap::msg_code(&ack.bytes), code::CHANGED);
    }

    rig.channel.push_incoming(&frames::update_done(0x3010, TOKEN));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::UpdateDone);

    let done_ack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&done_ack.bytes), code::CHANGED);
    assert_eq!(rig.host.firmware(), firmware);
    assert_eq!(rig.host.finishes(), vec![true]);
}

#[test]
fn out_of_order_chunk_is_reported_missed() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::update_begin(0x3100, TOKEN, 8, 4, 0, 0));
    rig.protocol.event_loop().unwrap();
    rig.channel.take_sent();

    // Chunk 1 arrives before chunk 0.
    rig.channel
        .push_incoming(&frames::chunk(0x3101, TOKEN, 1, b"late"));
    rig.protocol.event_loop().unwrap();

    let nack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&nack.bytes), code::BAD_REQUEST);
    assert!(rig.host.firmware().is_empty(), "nothing was written");

    // The retransmitted in-order chunk is accepted.
    rig.channel
        .push_incoming(&frames::chunk(0x3102, TOKEN, 0, b"good"));
    rig.protocol.event_loop().unwrap();
    let ack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&ack.bytes), code::CHANGED);
    assert_eq!(rig.host.firmware(), b"good");
}

#[test]
fn crc_mismatch_fails_the_transfer() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel.push_incoming(&frames::update_begin(
        0x3200,
        TOKEN,
        4,
        4,
        0xdead_beef, // wrong
        0,
    ));
    rig.protocol.event_loop().unwrap();
    rig.channel
        .push_incoming(&frames::chunk(0x3201, TOKEN, 0, b"data"));
    rig.protocol.event_loop().unwrap();
    rig.channel.take_sent();

    rig.channel.push_incoming(&frames::update_done(0x3202, TOKEN));
    assert_eq!(
        rig.protocol.event_loop(),
        Err(ProtocolError::TransferCrcMismatch)
    );

    let nack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&nack.bytes), code::BAD_REQUEST);
    // The writer released the transfer without committing.
    assert_eq!(rig.host.finishes(), vec![false]);
}

#[test]
fn failed_commit_surfaces_without_a_second_finish() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    let firmware = b"data";
    let crc = crc32fast::hash(firmware);
    rig.channel.push_incoming(&frames::update_begin(
        0x3500,
        TOKEN,
        firmware.len() as u32,
        4,
        crc,
        0,
    ));
    rig.protocol.event_loop().unwrap();
    rig.channel
        .push_incoming(&frames::chunk(0x3501, TOKEN, 0, firmware));
    rig.protocol.event_loop().unwrap();
    rig.channel.take_sent();

    // The flash writer rejects the commit after a clean CRC check.
    rig.host.fail_next_finish(ProtocolError::Io);
    rig.channel.push_incoming(&frames::update_done(0x3502, TOKEN));
    assert_eq!(rig.protocol.event_loop(), Err(ProtocolError::Io));

    // The writer saw exactly one finish (the failed commit); the error-path
    // cancel must not finish the same transfer again.
    assert_eq!(rig.host.finishes(), vec![true]);
    let nack = rig.channel.take_sent().pop().unwrap();
    assert_eq!(coap::msg_code(&nack.bytes), code::BAD_REQUEST);
}

#[test]
fn chunks_outside_a_transfer_are_discarded() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::chunk(0x3300, TOKEN, 0, b"stray"));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Chunk);
    assert!(rig.channel.sent().is_empty(), "stray chunk gets no response");
    assert!(rig.host.firmware().is_empty());
}

#[test]
fn begin_during_a_transfer_aborts_and_restarts() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::update_begin(0x3400, TOKEN, 8, 4, 0, 0));
    rig.protocol.event_loop().unwrap();
    rig.channel
        .push_incoming(&frames::chunk(0x3401, TOKEN, 0, b"half"));
    rig.protocol.event_loop().unwrap();

    // A fresh begin abandons the half-finished transfer.
    let firmware = b"redo";
    let crc = crc32fast::hash(firmware);
    rig.channel.push_incoming(&frames::update_begin(
        0x3402,
        TOKEN,
        firmware.len() as u32,
        4,
        crc,
        0,
    ));
    rig.protocol.event_loop().unwrap();

    assert_eq!(rig.host.finishes(), vec![false], "first transfer was released");
    assert_eq!(rig.host.prepared_transfers().len(), 2);
    rig.channel.take_sent();

    // The restarted transfer counts chunks from zero again.
    rig.channel
        .push_incoming(&frames::chunk(0x3403, TOKEN, 0, firmware));
    rig.protocol.event_loop().unwrap();
    rig.channel.push_incoming(&frames::update_done(0x3404, TOKEN));
    rig.protocol.event_loop().unwrap();
    assert_eq!(rig.host.firmware(), firmware);
    assert_eq!(rig.host.finishes(), vec![false, true]);
}
