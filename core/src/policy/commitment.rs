//! Commitment roots over authorized address sets.
//!
//! A policy publishes `roles_root` (guardians) and `owners_root` (owners) so
//! an on-chain verifier can check membership proofs without seeing the full
//! lists. The tree matches the common sorted-pair construction:
//!
//! - leaf = `keccak256(address_bytes)`, leaves sorted ascending and deduplicated
//! - node = `keccak256(min(a, b) ‖ max(a, b))`
//! - an odd node at the end of a level is promoted unchanged
//! - the empty set commits to 32 zero bytes

use alloy_primitives::{keccak256, B256};

use crate::identity::ChainAccount;

/// Merkle root over the given accounts, as `0x`-prefixed lowercase hex.
///
/// Order and address casing of the input do not affect the result.
pub fn address_set_root(accounts: &[ChainAccount]) -> String {
    format!("0x{}", hex::encode(merkle_root(accounts).as_slice()))
}

fn merkle_root(accounts: &[ChainAccount]) -> B256 {
    let mut level: Vec<B256> = accounts
        .iter()
        .map(|account| keccak256(account.address_bytes()))
        .collect();
    level.sort();
    level.dedup();

    if level.is_empty() {
        return B256::ZERO;
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            match pair {
                [a, b] => next.push(hash_pair(a, b)),
                [odd] => next.push(*odd),
                _ => {}
            }
        }
        level = next;
    }

    level[0]
}

fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}
