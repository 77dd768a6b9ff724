//! Helpers for fixed-width hexadecimal identifiers.
//!
//! Every identifier that crosses an ingestion boundary (decoded logs, the
//! events cache, the target configuration) is compared in one canonical
//! form: lowercase and `0x`-prefixed.

use alloy_primitives::{
    Address,
    B256,
    hex,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytesError {
    #[error("Invalid hex string length {0}: expected an even number of hex digits")]
    OddLength(usize),
    #[error("Slice [{start}, {end}) is out of bounds for {len} bytes")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("Expected a {expected}-byte word, got {got} bytes")]
    InvalidWordLength { expected: usize, got: usize },
}

/// Lowercases the string and ensures the `0x` prefix.
pub fn normalize(bytes: &str) -> String {
    prefix_0x(&bytes.to_lowercase())
}

pub fn prefix_0x(bytes: &str) -> String {
    if is_0x_prefixed(bytes) {
        bytes.to_string()
    } else {
        format!("0x{bytes}")
    }
}

pub fn strip_0x(bytes: &str) -> &str {
    bytes.strip_prefix("0x").unwrap_or(bytes)
}

pub fn is_0x_prefixed(bytes: &str) -> bool {
    bytes.starts_with("0x")
}

/// Concatenates hex strings into one prefixed string.
pub fn join<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let joined: String = parts.into_iter().map(strip_0x).collect();
    prefix_0x(&joined)
}

/// Number of bytes encoded by the hex string.
pub fn byte_length(bytes: &str) -> Result<usize, BytesError> {
    let digits = strip_0x(bytes).len();
    if digits % 2 == 1 {
        return Err(BytesError::OddLength(digits));
    }
    Ok(digits / 2)
}

/// Returns bytes `[start, end)` as a normalized hex string. `end = None`
/// slices to the end.
pub fn slice(bytes: &str, start: usize, end: Option<usize>) -> Result<String, BytesError> {
    let len = byte_length(bytes)?;
    let end = end.unwrap_or(len);
    if start > end || end > len {
        return Err(BytesError::OutOfBounds { start, end, len });
    }
    let digits = strip_0x(bytes);
    Ok(normalize(&digits[start * 2..end * 2]))
}

/// Canonical text form of an address.
pub fn address_to_hex(address: &Address) -> String {
    hex::encode_prefixed(address)
}

/// Canonical text form of a 32-byte identifier.
pub fn word_to_hex(word: &B256) -> String {
    hex::encode_prefixed(word)
}

/// An ABI-encoded address occupies the low 20 bytes of a 32-byte word.
pub fn word_to_address(word: &B256) -> Address {
    Address::from_word(*word)
}

/// An ABI-encoded bool is true iff the word is non-zero.
pub fn word_to_bool(word: &B256) -> bool {
    !word.is_zero()
}

/// Reads the `index`-th 32-byte word of an ABI data blob.
pub fn data_word(data: &[u8], index: usize) -> Result<B256, BytesError> {
    let start = index * 32;
    let end = start + 32;
    data.get(start..end)
        .map(B256::from_slice)
        .ok_or(BytesError::InvalidWordLength {
            expected: end,
            got: data.len(),
        })
}

/// `0x123456..9abcdef0` form used to display unlabeled addresses.
pub fn shorten_address(address: &Address) -> String {
    let full = address_to_hex(address);
    let head = full.get(..8).unwrap_or(&full);
    let tail = full.get(full.len().saturating_sub(8)..).unwrap_or(&full);
    format!("{head}..{tail}")
}

/// Serde adapter writing addresses in canonical form and accepting any case
/// on input.
pub mod canonical_address {
    use super::address_to_hex;
    use alloy_primitives::Address;
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
    };
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&address_to_hex(address))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_str(&super::normalize(&raw)).map_err(D::Error::custom)
    }
}

/// Same as [`canonical_address`] for optional addresses.
pub mod canonical_address_opt {
    use super::address_to_hex;
    use alloy_primitives::Address;
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
    };
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(
        address: &Option<Address>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match address {
            Some(address) => serializer.serialize_some(&address_to_hex(address)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Address>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| Address::from_str(&super::normalize(&raw)).map_err(D::Error::custom))
            .transpose()
    }
}
