//! Property tests for the ABI codec and event decoding.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use bytes::Bytes;
use certledger_core::LedgerId;
use certledger_gateway::{
    Address, B256, LogEntry,
    abi::{self, ParamType, Token},
    decode_issued, events,
};
use proptest::prelude::*;

fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

proptest! {
    #[test]
    fn strings_and_words_survive_encoding(
        id in any::<u64>(),
        text in ".{0,80}",
        other in ".{0,80}",
        flag in any::<bool>(),
        who in address(),
    ) {
        let tokens = vec![
            Token::Uint(id),
            Token::String(text),
            Token::Bool(flag),
            Token::Address(who),
            Token::String(other),
        ];
        let types = [
            ParamType::Uint,
            ParamType::String,
            ParamType::Bool,
            ParamType::Address,
            ParamType::String,
        ];
        let encoded = abi::encode(&tokens);
        prop_assert_eq!(encoded.len() % 32, 0);
        prop_assert_eq!(abi::decode(&types, &encoded).unwrap(), tokens);
    }

    #[test]
    fn issued_events_decode_to_their_fields(
        id in 1u64..u64::MAX,
        student in address(),
        issuer in address(),
        student_id in "[A-Z0-9-]{1,16}",
        content_id in "[a-z0-9]{1,64}",
    ) {
        let (topics, data) =
            events::encode_issued(LedgerId(id), student, &student_id, "Completion", &content_id, issuer);
        let log = LogEntry {
            address: Address::ZERO,
            topics,
            data: Bytes::from(data),
            block_number: 1,
            transaction_hash: B256::ZERO,
            log_index: 0,
        };
        let event = decode_issued(&log).unwrap();
        prop_assert_eq!(event.ledger_id, LedgerId(id));
        prop_assert_eq!(event.student_address, student);
        prop_assert_eq!(event.issuer, issuer);
        prop_assert_eq!(event.student_id, student_id);
        prop_assert_eq!(event.content_id, content_id);
    }

    #[test]
    fn truncated_data_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let _ = abi::decode(&[ParamType::String, ParamType::Uint, ParamType::String], &bytes);
    }
}
