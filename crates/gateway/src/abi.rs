//! Minimal Solidity ABI codec.
//!
//! Covers exactly the shapes the certificate contract uses: 256-bit words
//! holding `u64` values, addresses, bools, `bytes32`, UTF-8 strings and
//! tuples of those. Encoding follows the standard head/tail layout, so
//! output is byte-compatible with any conforming encoder.

use alloy_primitives::{Address, B256, keccak256};
use certledger_core::CertError;
use thiserror::Error;

const WORD: usize = 32;

/// ABI decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    /// Data ended before a word could be read.
    #[error("abi data too short: need {needed} bytes at offset {offset}, have {available}")]
    ShortData {
        /// Offset of the read.
        offset: usize,
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// A word did not fit the declared type.
    #[error("abi word is not a valid {expected}")]
    InvalidWord {
        /// Declared type.
        expected: &'static str,
    },
    /// A string was not UTF-8.
    #[error("abi string is not valid utf-8")]
    InvalidUtf8,
    /// A log did not match the expected event.
    #[error("log does not match event {event}: {reason}")]
    EventMismatch {
        /// Event name.
        event: &'static str,
        /// What did not match.
        reason: String,
    },
}

impl From<AbiError> for CertError {
    fn from(err: AbiError) -> Self {
        CertError::internal_with_source("abi codec failure", err)
    }
}

/// A decoded or to-be-encoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `uint256` restricted to the `u64` range.
    Uint(u64),
    /// `address`.
    Address(Address),
    /// `bool`.
    Bool(bool),
    /// `bytes32`.
    FixedBytes(B256),
    /// `string`.
    String(String),
    /// Tuple or struct.
    Tuple(Vec<Token>),
}

/// Declared type of a value to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// `uint256`.
    Uint,
    /// `address`.
    Address,
    /// `bool`.
    Bool,
    /// `bytes32`.
    FixedBytes,
    /// `string`.
    String,
    /// Tuple or struct.
    Tuple(Vec<ParamType>),
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        match self {
            Self::String => true,
            Self::Tuple(inner) => inner.iter().any(Self::is_dynamic),
            _ => false,
        }
    }

    /// Head size in bytes.
    fn head_len(&self) -> usize {
        match self {
            Self::Tuple(inner) if !self.is_dynamic() => inner.iter().map(Self::head_len).sum(),
            _ => WORD,
        }
    }
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Self::String(_) => true,
            Self::Tuple(inner) => inner.iter().any(Self::is_dynamic),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            Self::Tuple(inner) if !self.is_dynamic() => inner.iter().map(Self::head_len).sum(),
            _ => WORD,
        }
    }

    /// Returns the `u64` value of a `Uint` token.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the address of an `Address` token.
    #[must_use]
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// Returns the value of a `Bool` token.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Consumes a `String` token.
    #[must_use]
    pub fn into_string(self) -> Option<String> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Consumes a `Tuple` token.
    #[must_use]
    pub fn into_tuple(self) -> Option<Vec<Token>> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }
}

/// Left-pads a `u64` into a word.
#[must_use]
pub fn u64_word(value: u64) -> B256 {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    B256::from(word)
}

/// Left-pads an address into a word, as used for indexed topics.
#[must_use]
pub fn address_word(address: Address) -> B256 {
    address.into_word()
}

/// Reads a `u64` from a word whose upper 24 bytes are zero.
///
/// # Errors
///
/// [`AbiError::InvalidWord`] if the value exceeds `u64`.
pub fn word_to_u64(word: &B256) -> Result<u64, AbiError> {
    let bytes = word.as_slice();
    if bytes[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidWord { expected: "uint64" });
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&bytes[WORD - 8..]);
    Ok(u64::from_be_bytes(tail))
}

/// Reads an address from a left-padded word.
///
/// # Errors
///
/// [`AbiError::InvalidWord`] if the upper 12 bytes are not zero.
pub fn word_to_address(word: &B256) -> Result<Address, AbiError> {
    let bytes = word.as_slice();
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::InvalidWord { expected: "address" });
    }
    Ok(Address::from_slice(&bytes[12..]))
}

/// Four-byte function selector for a canonical signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Event topic for a canonical signature.
#[must_use]
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// Encodes a function call: selector followed by the encoded arguments.
#[must_use]
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode(args));
    out
}

/// Encodes a sequence of values with the head/tail layout.
#[must_use]
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(u64_word((head_len + tail.len()) as u64).as_slice());
            tail.extend_from_slice(&encode_dynamic(token));
        } else {
            encode_static(token, &mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn encode_static(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Uint(v) => out.extend_from_slice(u64_word(*v).as_slice()),
        Token::Address(a) => out.extend_from_slice(address_word(*a).as_slice()),
        Token::Bool(b) => out.extend_from_slice(u64_word(u64::from(*b)).as_slice()),
        Token::FixedBytes(w) => out.extend_from_slice(w.as_slice()),
        Token::Tuple(inner) => {
            for t in inner {
                encode_static(t, out);
            }
        },
        Token::String(_) => out.extend_from_slice(&encode_dynamic(token)),
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::String(s) => {
            let bytes = s.as_bytes();
            let padded = bytes.len().div_ceil(WORD) * WORD;
            let mut out = Vec::with_capacity(WORD + padded);
            out.extend_from_slice(u64_word(bytes.len() as u64).as_slice());
            out.extend_from_slice(bytes);
            out.resize(WORD + padded, 0);
            out
        },
        Token::Tuple(inner) => encode(inner),
        other => {
            let mut out = Vec::with_capacity(WORD);
            encode_static(other, &mut out);
            out
        },
    }
}

fn read_word(data: &[u8], offset: usize) -> Result<B256, AbiError> {
    let end = offset.checked_add(WORD);
    end.and_then(|end| data.get(offset..end)).map(B256::from_slice).ok_or(AbiError::ShortData {
        offset,
        needed: WORD,
        available: data.len().saturating_sub(offset),
    })
}

fn read_offset(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let value = word_to_u64(&read_word(data, offset)?)?;
    usize::try_from(value).map_err(|_| AbiError::InvalidWord { expected: "offset" })
}

/// Decodes a sequence of values laid out with the head/tail encoding.
///
/// # Errors
///
/// Returns [`AbiError`] on truncated data, out-of-range words or invalid UTF-8.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    let mut cursor = 0;
    let mut out = Vec::with_capacity(types.len());
    for ty in types {
        if ty.is_dynamic() {
            let offset = read_offset(data, cursor)?;
            let slice = data.get(offset..).ok_or(AbiError::ShortData {
                offset,
                needed: WORD,
                available: 0,
            })?;
            out.push(decode_dynamic(ty, slice)?);
        } else {
            out.push(decode_static(ty, data, cursor)?);
        }
        cursor += ty.head_len();
    }
    Ok(out)
}

fn decode_static(ty: &ParamType, data: &[u8], offset: usize) -> Result<Token, AbiError> {
    match ty {
        ParamType::Uint => Ok(Token::Uint(word_to_u64(&read_word(data, offset)?)?)),
        ParamType::Address => Ok(Token::Address(word_to_address(&read_word(data, offset)?)?)),
        ParamType::Bool => match word_to_u64(&read_word(data, offset)?) {
            Ok(0) => Ok(Token::Bool(false)),
            Ok(1) => Ok(Token::Bool(true)),
            _ => Err(AbiError::InvalidWord { expected: "bool" }),
        },
        ParamType::FixedBytes => Ok(Token::FixedBytes(read_word(data, offset)?)),
        ParamType::Tuple(inner) => {
            let slice = data.get(offset..).unwrap_or_default();
            Ok(Token::Tuple(decode(inner, slice)?))
        },
        ParamType::String => Err(AbiError::InvalidWord { expected: "static type" }),
    }
}

fn decode_dynamic(ty: &ParamType, data: &[u8]) -> Result<Token, AbiError> {
    match ty {
        ParamType::String => {
            let len = read_offset(data, 0)?;
            let end = WORD.checked_add(len);
            let bytes = end.and_then(|end| data.get(WORD..end)).ok_or(AbiError::ShortData {
                offset: WORD,
                needed: len,
                available: data.len().saturating_sub(WORD),
            })?;
            String::from_utf8(bytes.to_vec()).map(Token::String).map_err(|_| AbiError::InvalidUtf8)
        },
        ParamType::Tuple(inner) => Ok(Token::Tuple(decode(inner, data)?)),
        other => decode_static(other, data, 0),
    }
}
