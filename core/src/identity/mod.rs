//! # Identity Module
//!
//! Chain-qualified account identifiers. Every address-like field in the
//! core (vault accounts, members, approvers, recipients) is a
//! [`ChainAccount`]: an EVM address bound to a numeric chain id, with a
//! canonical CAIP-10 string form.
//!
//! ## Canonical Form
//!
//! ```text
//! eip155:<chainId>:<address>
//! ```
//!
//! Example: `eip155:84532:0xAbCdEf0123456789aBcDeF0123456789AbCdEf01`
//!
//! The canonical string preserves the casing the address was created with,
//! but equality and hashing ignore hex-digit casing. Two accounts that differ
//! only in checksum casing are the same account.

pub mod account;

pub use account::{derive_canonical, parse_canonical, short_form, ChainAccount};

use thiserror::Error;

/// Errors that can occur while deriving or parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The address is not `0x` followed by 40 hex digits.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The chain id is zero or negative.
    #[error("invalid chain id: {0}")]
    InvalidChainId(i64),

    /// The string does not follow the `namespace:chain:address` grammar.
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
}
