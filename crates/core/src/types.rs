//! Strongly typed identifiers.
//!
//! Registry row ids are `i64` (they map onto SQLite `INTEGER PRIMARY KEY`);
//! the chain-assigned ledger id is a `u64` sequence number.

/// Defines a newtype wrapper around `i64` with the standard trait set.
///
/// Each generated type is `Copy`, ordered, hashable, serializes
/// transparently, converts to and from `i64`, and displays its inner value.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Registry-assigned certificate identifier. Stable and never reused.
    ///
    /// ```
    /// use certledger_core::CertificateId;
    ///
    /// let id = CertificateId::from(42);
    /// assert_eq!(i64::from(id), 42);
    /// assert_eq!(id.to_string(), "42");
    /// ```
    CertificateId
);

define_id!(
    /// Identifier of a student, issuer or administrator.
    ActorId
);

define_id!(
    /// Identifier of a certificate type.
    CertificateTypeId
);

define_id!(
    /// Identifier of a blockchain network configuration row.
    NetworkConfigId
);

define_id!(
    /// Identifier of an appended verification record.
    VerificationId
);

/// Chain-assigned certificate sequence number.
///
/// The contract numbers certificates from 1, so `LedgerId(0)` never refers
/// to an issued certificate.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct LedgerId(pub u64);

impl From<u64> for LedgerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LedgerId> for u64 {
    fn from(id: LedgerId) -> Self {
        id.0
    }
}

impl std::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&CertificateId(9)).ok();
        assert_eq!(json.as_deref(), Some("9"));
        let json = serde_json::to_string(&LedgerId(3)).ok();
        assert_eq!(json.as_deref(), Some("3"));
    }

    #[test]
    fn test_distinct_id_types_do_not_mix() {
        let actor = ActorId::from(1);
        let cert = CertificateId::from(1);
        assert_eq!(i64::from(actor), i64::from(cert));
    }
}
