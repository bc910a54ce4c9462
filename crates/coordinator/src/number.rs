//! Certificate number generation.
//!
//! Numbers look like `CERT-LXYZ1A2B-3F9A0C`: the issuance time in
//! milliseconds as uppercase base 36, then three random bytes as uppercase
//! hex. Nothing checks the registry beforehand; the registry's unique
//! constraint rejects collisions and the coordinator regenerates.

use chrono::{DateTime, Utc};
use rand::RngCore;

/// Source of certificate numbers.
pub trait NumberSource: Send + Sync {
    /// Produces a candidate number for a certificate issued at `now`.
    fn next_number(&self, now: DateTime<Utc>) -> String;
}

/// Generates numbers from the clock and the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNumberSource;

impl NumberSource for RandomNumberSource {
    fn next_number(&self, now: DateTime<Utc>) -> String {
        let mut suffix = [0u8; 3];
        rand::rng().fill_bytes(&mut suffix);
        format_number(now, suffix)
    }
}

/// Formats a number from its timestamp and random suffix.
#[must_use]
pub fn format_number(now: DateTime<Utc>, suffix: [u8; 3]) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    format!("CERT-{}-{}", to_base36(millis), hex::encode_upper(suffix))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
