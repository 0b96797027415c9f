//! [`ChainAccount`] and the free functions behind it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::IdentifierError;
use crate::config::{
    ADDRESS_BYTES, ADDRESS_HEX_LENGTH, CAIP_NAMESPACE, SHORT_FORM_PREFIX, SHORT_FORM_SUFFIX,
};

// ---------------------------------------------------------------------------
// Free Functions
// ---------------------------------------------------------------------------

/// Derive the canonical `eip155:<chain>:<address>` identifier.
///
/// Pure and deterministic. The address keeps its input casing.
///
/// # Errors
///
/// [`IdentifierError::InvalidAddress`] if the address is not well-formed,
/// [`IdentifierError::InvalidChainId`] if `chain_id` is zero.
pub fn derive_canonical(address: &str, chain_id: u64) -> Result<String, IdentifierError> {
    validate_address(address)?;
    validate_chain_id(chain_id)?;
    Ok(format!("{}:{}:{}", CAIP_NAMESPACE, chain_id, address))
}

/// Parse a canonical identifier back into `(address, chain_id)`.
///
/// # Errors
///
/// [`IdentifierError::MalformedIdentifier`] if the string is not three
/// colon-separated parts with the `eip155` namespace and a numeric chain.
/// Well-formed strings carrying a bad address or a non-positive chain
/// report those more specific errors instead.
pub fn parse_canonical(id: &str) -> Result<(String, u64), IdentifierError> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() != 3 {
        return Err(IdentifierError::MalformedIdentifier(format!(
            "expected 'namespace:chain:address', got '{id}'"
        )));
    }

    if parts[0] != CAIP_NAMESPACE {
        return Err(IdentifierError::MalformedIdentifier(format!(
            "unsupported namespace '{}'",
            parts[0]
        )));
    }

    let chain: i64 = parts[1].parse().map_err(|_| {
        IdentifierError::MalformedIdentifier(format!("chain id '{}' is not numeric", parts[1]))
    })?;
    if chain <= 0 {
        return Err(IdentifierError::InvalidChainId(chain));
    }

    validate_address(parts[2])?;
    Ok((parts[2].to_string(), chain as u64))
}

/// First 6 and last 4 characters joined by an ellipsis. Display only.
///
/// Inputs too short to shorten are returned unchanged.
pub fn short_form(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= SHORT_FORM_PREFIX + SHORT_FORM_SUFFIX {
        return address.to_string();
    }
    let head: String = chars[..SHORT_FORM_PREFIX].iter().collect();
    let tail: String = chars[chars.len() - SHORT_FORM_SUFFIX..].iter().collect();
    format!("{head}...{tail}")
}

fn validate_address(address: &str) -> Result<(), IdentifierError> {
    let well_formed = address.len() == ADDRESS_HEX_LENGTH
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(IdentifierError::InvalidAddress(address.to_string()))
    }
}

fn validate_chain_id(chain_id: u64) -> Result<(), IdentifierError> {
    if chain_id == 0 {
        return Err(IdentifierError::InvalidChainId(0));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ChainAccount
// ---------------------------------------------------------------------------

/// An EVM address bound to a chain id.
///
/// Construct with [`ChainAccount::new`] or parse a canonical string with
/// [`ChainAccount::parse`]. Serializes as the canonical string.
#[derive(Debug, Clone)]
pub struct ChainAccount {
    address: String,
    chain_id: u64,
}

impl ChainAccount {
    /// Validate and bind `address` to `chain_id`.
    pub fn new(address: impl Into<String>, chain_id: u64) -> Result<Self, IdentifierError> {
        let address = address.into();
        validate_address(&address)?;
        validate_chain_id(chain_id)?;
        Ok(Self { address, chain_id })
    }

    /// Parse an `eip155:<chain>:<address>` string.
    pub fn parse(id: &str) -> Result<Self, IdentifierError> {
        let (address, chain_id) = parse_canonical(id)?;
        Ok(Self { address, chain_id })
    }

    /// The address as supplied at creation.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The numeric chain id.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Canonical CAIP-10 identifier, re-derived on every call.
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", CAIP_NAMESPACE, self.chain_id, self.address)
    }

    /// Lowercase address. Used for storage keys and comparisons.
    pub fn normalized_address(&self) -> String {
        self.address.to_ascii_lowercase()
    }

    /// Raw 20 address bytes.
    pub fn address_bytes(&self) -> [u8; ADDRESS_BYTES] {
        let mut out = [0u8; ADDRESS_BYTES];
        // Validated at construction, so decoding cannot fail.
        if let Ok(bytes) = hex::decode(&self.address[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }

    /// Display form, e.g. `0xAbCd...Ef01`.
    pub fn short(&self) -> String {
        short_form(&self.address)
    }

    /// Case-insensitive address match, ignoring chain.
    pub fn same_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl PartialEq for ChainAccount {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id && self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for ChainAccount {}

impl Hash for ChainAccount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain_id.hash(state);
        self.normalized_address().hash(state);
    }
}

impl fmt::Display for ChainAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ChainAccount {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChainAccount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for ChainAccount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
