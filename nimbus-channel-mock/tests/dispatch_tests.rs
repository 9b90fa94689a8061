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

//! Message dispatch scenarios.

mod common;

use common::{default_descriptor, rig, rig_with};
use nimbus_channel_mock::{frames, MockChannel};
use nimbus_common::{CompletionError, ProtocolError};
use nimbus_protocol::coap::{self, code, CoapType, MessageKind, TokenField};
use nimbus_protocol::{ChannelCommand, CompletionToken, SubscriptionScope};

#[test]
fn time_response_sets_the_clock_exactly_once() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::time_response(0x0a01, 0x5a5a5a5a, 0x6000_0000));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Time);
    assert_eq!(rig.host.time_set(), vec![0x6000_0000]);
}

#[test]
fn key_change_with_parameter_one_discards_the_session() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel.push_incoming(&frames::key_change(0x0b01, 1));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::KeyChange);

    // Confirmable notification gets an empty ack.
    let sent = rig.channel.sent();
    assert_eq!(&sent[0].bytes[..], &frames::empty_ack(0x0b01)[..]);

    let discards = rig
        .channel
        .commands()
        .iter()
        .filter(|cmd| **cmd == ChannelCommand::DiscardSession)
        .count();
    assert_eq!(discards, 1);
}

#[test]
fn key_change_with_parameter_zero_keeps_the_session() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();

    rig.channel.push_incoming(&frames::key_change(0x0b02, 0));
    rig.protocol.event_loop().unwrap();
    assert!(!rig
        .channel
        .commands()
        .contains(&ChannelCommand::DiscardSession));
}

#[test]
fn server_ping_gets_an_empty_ack() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel.push_incoming(&frames::ping(0x0c01));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Ping);
    let sent = rig.channel.sent();
    assert_eq!(&sent[0].bytes[..], &frames::empty_ack(0x0c01)[..]);
}

#[test]
fn signal_requests_toggle_and_are_acknowledged() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel.push_incoming(&frames::signal(0x0d01, 0x0111_1111, true));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::SignalStart);
    rig.channel.push_incoming(&frames::signal(0x0d02, 0x0222_2222, false));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::SignalStop);

    assert_eq!(rig.host.signals(), vec![true, false]);

    let sent = rig.channel.sent();
    assert_eq!(sent.len(), 2);
    for (frame, token) in sent.iter().zip([0x0111_1111u32, 0x0222_2222]) {
        assert_eq!(coap::msg_type(&frame.bytes), CoapType::Ack);
        assert_eq!(coap::msg_code(&frame.bytes), code::CHANGED);
        assert_eq!(coap::token(&frame.bytes), TokenField::Token(token));
    }
}

#[test]
fn events_reach_matching_subscriptions_only() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.protocol
        .subscribe("sensor", SubscriptionScope::MyDevices)
        .unwrap();

    rig.channel
        .push_incoming(&frames::event(0x0e01, "sensor/temp", b"21"));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Event);
    rig.channel
        .push_incoming(&frames::event(0x0e02, "actuator/valve", b"open"));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Event);

    let events = rig.log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "sensor/temp");
    assert_eq!(events[0].1, b"21");
}

#[test]
fn function_call_acks_then_responds_separately() {
    let mut rig = rig_with(
        MockChannel::new(),
        default_descriptor().with_function_return(7),
        0,
    );
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::function_call(0x0f01, 0x0123_4567, "reset", "now"));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::FunctionCall);

    assert_eq!(rig.log.calls(), vec![("reset".to_string(), "now".to_string())]);

    let sent = rig.channel.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0].bytes[..], &frames::empty_ack(0x0f01)[..]);

    let response = &sent[1];
    assert_eq!(coap::msg_type(&response.bytes), CoapType::Confirmable);
    assert_eq!(coap::msg_code(&response.bytes), code::CHANGED);
    assert_eq!(coap::token(&response.bytes), TokenField::Token(0x0123_4567));
    assert_eq!(coap::payload(&response.bytes), Some(&[0, 0, 0, 7][..]));
}

#[test]
fn function_call_without_token_is_a_protocol_error() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();

    rig.channel
        .push_incoming(&frames::function_call_tokenless(0x0f02, "reset"));
    assert_eq!(
        rig.protocol.event_loop(),
        Err(ProtocolError::MissingRequestToken)
    );
}

#[test]
fn variable_request_returns_the_value_piggybacked() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::variable_request(0x1001, 0x0abc_def0, "temp"));
    assert_eq!(
        rig.protocol.event_loop().unwrap(),
        MessageKind::VariableRequest
    );

    let sent = rig.channel.sent();
    assert_eq!(sent.len(), 1);
    let response = &sent[0];
    assert_eq!(coap::msg_type(&response.bytes), CoapType::Ack);
    assert_eq!(coap::msg_code(&response.bytes), code::CONTENT);
    assert_eq!(coap::token(&response.bytes), TokenField::Token(0x0abc_def0));
    assert_eq!(coap::payload(&response.bytes), Some(&b"42"[..]));
}

#[test]
fn unknown_variable_is_not_found() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.channel
        .push_incoming(&frames::variable_request(0x1002, 0x0abc_def0, "missing"));
    rig.protocol.event_loop().unwrap();

    let sent = rig.channel.sent();
    assert_eq!(coap::msg_code(&sent[0].bytes), code::NOT_FOUND);
}

#[test]
fn unsupported_token_length_is_treated_as_absent() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    // A describe with a 2-byte token still gets its response; the engine just
    // cannot echo the token.
    rig.channel
        .push_incoming(&frames::describe_request_short_token(0x1101));
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Describe);

    let sent = rig.channel.sent();
    assert_eq!(sent.len(), 2, "empty ack plus describe response");
    assert_eq!(coap::token(&sent[1].bytes), TokenField::Token(0));
}

#[test]
fn ack_completes_a_tracked_event() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.protocol
        .send_event("state", b"on", 60, true, Some(CompletionToken(11)))
        .unwrap();
    let event_id = rig.channel.sent()[0].id;

    rig.channel.push_incoming(&frames::empty_ack(event_id));
    rig.protocol.event_loop().unwrap();

    assert_eq!(
        rig.host.completions(),
        vec![(CompletionToken(11), Ok(()))]
    );
}

#[test]
fn rst_is_indistinguishable_from_a_5xx_response() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.protocol
        .send_event("state", b"on", 60, true, Some(CompletionToken(12)))
        .unwrap();
    let event_id = rig.channel.sent()[0].id;

    rig.channel.push_incoming(&frames::rst(event_id));
    rig.protocol.event_loop().unwrap();

    assert_eq!(
        rig.host.completions(),
        vec![(CompletionToken(12), Err(CompletionError::Coap5xx))]
    );
}

#[test]
fn client_error_response_is_classified_as_4xx() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.protocol
        .send_event("state", b"on", 60, true, Some(CompletionToken(13)))
        .unwrap();
    let event_id = rig.channel.sent()[0].id;

    rig.channel
        .push_incoming(&frames::coded_ack(event_id, code::NOT_FOUND));
    rig.protocol.event_loop().unwrap();

    assert_eq!(
        rig.host.completions(),
        vec![(CompletionToken(13), Err(CompletionError::Coap4xx))]
    );
}

#[test]
fn unanswered_completion_times_out() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    rig.protocol
        .send_event("state", b"on", 60, true, Some(CompletionToken(14)))
        .unwrap();

    rig.host.advance(61_000);
    rig.protocol.event_loop().unwrap();

    assert_eq!(
        rig.host.completions(),
        vec![(CompletionToken(14), Err(CompletionError::Timeout))]
    );
}

#[test]
fn unknown_frames_are_dropped_silently() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();
    rig.channel.take_sent();

    // POST to an unknown route.
    rig.channel
        .push_incoming(&[0x40, 0x02, 0x12, 0x01, 0xb1, b'z']);
    assert_eq!(rig.protocol.event_loop().unwrap(), MessageKind::Error);
    assert!(rig.channel.sent().is_empty());
}

#[test]
fn receive_errors_end_the_session() {
    let mut rig = rig();
    rig.protocol.begin().unwrap();

    rig.channel.fail_next_receive(ProtocolError::Io);
    assert_eq!(rig.protocol.event_loop(), Err(ProtocolError::Io));
}
