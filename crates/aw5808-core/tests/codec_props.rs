//! Property tests for the serial frame codec.

use aw5808_core::protocol::{Command, decode, encode};
use proptest::prelude::*;

fn command_id() -> impl Strategy<Value = u8> {
    prop_oneof![
        prop::sample::select(Command::ALL.map(Command::request_id).to_vec()),
        prop::sample::select(Command::ALL.map(Command::inbound_id).to_vec()),
        any::<u8>(),
    ]
}

proptest! {
    #[test]
    fn test_decode_returns_what_was_encoded(
        command in command_id(),
        payload in prop::collection::vec(any::<u8>(), 0..=60),
    ) {
        let frame = encode(command, &payload).unwrap();
        prop_assert_eq!(frame.len(), payload.len() + 5);

        let decoded = decode(&frame).unwrap();
        prop_assert_eq!(decoded.consumed, frame.len());
        let got = decoded.frame.unwrap();
        prop_assert_eq!(got.command, command);
        prop_assert_eq!(got.payload, &payload[..]);
    }

    #[test]
    fn test_partial_frame_consumes_nothing(
        command in command_id(),
        payload in prop::collection::vec(any::<u8>(), 0..=60),
        split in any::<prop::sample::Index>(),
    ) {
        let frame = encode(command, &payload).unwrap();
        let cut = split.index(frame.len());

        let decoded = decode(&frame[..cut]).unwrap();
        prop_assert!(decoded.need_more());

        let decoded = decode(&frame).unwrap();
        prop_assert_eq!(decoded.consumed, frame.len());
    }

    #[test]
    fn test_one_garbage_byte_costs_one_byte(
        garbage in any::<u8>().prop_filter("not a preamble", |b| *b != 0x55),
        payload in prop::collection::vec(any::<u8>(), 0..=8),
    ) {
        let mut input = vec![garbage];
        input.extend(encode(0xD1, &payload).unwrap());

        let skipped = decode(&input).unwrap();
        prop_assert!(skipped.frame.is_none());
        prop_assert_eq!(skipped.consumed, 1);

        let decoded = decode(&input[1..]).unwrap();
        prop_assert_eq!(decoded.frame.unwrap().payload, &payload[..]);
    }
}
