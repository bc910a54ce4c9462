//! Property tests for certificate number formatting.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use certledger_coordinator::format_number;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

proptest! {
    #[test]
    fn number_encodes_timestamp_and_suffix(
        millis in 0i64..4_102_444_800_000,
        suffix in any::<[u8; 3]>(),
    ) {
        let now = Utc.timestamp_millis_opt(millis).unwrap();
        let number = format_number(now, suffix);

        let parts: Vec<&str> = number.split('-').collect();
        prop_assert_eq!(parts.len(), 3);
        prop_assert_eq!(parts[0], "CERT");
        prop_assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        prop_assert_eq!(u64::from_str_radix(parts[1], 36).unwrap(), millis as u64);
        prop_assert_eq!(parts[2], hex::encode_upper(suffix));
    }

    #[test]
    fn numbers_sort_by_issue_time(
        a in 1_600_000_000_000i64..2_000_000_000_000,
        b in 1_600_000_000_000i64..2_000_000_000_000,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let first = format_number(Utc.timestamp_millis_opt(lo).unwrap(), [0; 3]);
        let second = format_number(Utc.timestamp_millis_opt(hi).unwrap(), [0; 3]);
        prop_assert!(first <= second);
    }
}
