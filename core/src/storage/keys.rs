//! Key layout.
//!
//! | Tree       | Key                                   | Value                 |
//! |------------|---------------------------------------|-----------------------|
//! | `vaults`   | `vault:{id}`                          | `json(Vault)`         |
//! | `vaults`   | `members:{vault}`                     | `json(Vec<Member>)`   |
//! | `policies` | `policy:{id}`                         | `json(Policy)`        |
//! | `escrows`  | `escrow:{id}`                         | `json(Escrow)`        |
//! | `escrows`  | `approvals:{escrow}`                  | `json(Vec<Approval>)` |
//! | `indexes`  | `sequence`                            | last id (8B BE)       |
//! | `indexes`  | `vault-account:{chain}:{address}`     | vault id (8B BE)      |
//! | `indexes`  | `vault-uuid:{uuid}`                   | vault id              |
//! | `indexes`  | `chain-vault:{chain}:{vault}`         | vault id              |
//! | `indexes`  | `member-vault:{address}:{vault}`      | vault id              |
//! | `indexes`  | `vault-policy:{vault}:{policy}`       | policy id             |
//! | `indexes`  | `vault-escrow:{vault}:{escrow}`       | escrow id             |
//! | `audit`    | `timestamp_micros ‖ id` (16B BE)      | `json(AuditLogEntry)` |
//!
//! Numeric ids inside string keys are zero-padded to 20 digits so lexical
//! order matches numeric order. Addresses are lowercased.

use chrono::{DateTime, Utc};

pub(crate) const ESCROW_PREFIX: &str = "escrow:";

/// Last id handed out, shared by every record type and the audit ledger.
pub(crate) const SEQUENCE: &[u8] = b"sequence";

pub(crate) fn vault(id: u64) -> Vec<u8> {
    format!("vault:{id:020}").into_bytes()
}

pub(crate) fn members(vault_id: u64) -> Vec<u8> {
    format!("members:{vault_id:020}").into_bytes()
}

pub(crate) fn policy(id: u64) -> Vec<u8> {
    format!("policy:{id:020}").into_bytes()
}

pub(crate) fn escrow(id: u64) -> Vec<u8> {
    format!("{ESCROW_PREFIX}{id:020}").into_bytes()
}

pub(crate) fn approvals(escrow_id: u64) -> Vec<u8> {
    format!("approvals:{escrow_id:020}").into_bytes()
}

pub(crate) fn vault_by_account(chain_id: u64, address: &str) -> Vec<u8> {
    format!("vault-account:{chain_id}:{}", address.to_ascii_lowercase()).into_bytes()
}

pub(crate) fn vault_by_uuid(uuid: &uuid::Uuid) -> Vec<u8> {
    format!("vault-uuid:{}", uuid.as_hyphenated()).into_bytes()
}

pub(crate) fn chain_vaults(chain_id: u64) -> Vec<u8> {
    format!("chain-vault:{chain_id:020}:").into_bytes()
}

pub(crate) fn chain_vault(chain_id: u64, vault_id: u64) -> Vec<u8> {
    let mut key = chain_vaults(chain_id);
    key.extend_from_slice(format!("{vault_id:020}").as_bytes());
    key
}

pub(crate) fn member_vaults(address: &str) -> Vec<u8> {
    format!("member-vault:{}:", address.to_ascii_lowercase()).into_bytes()
}

pub(crate) fn member_vault(address: &str, vault_id: u64) -> Vec<u8> {
    let mut key = member_vaults(address);
    key.extend_from_slice(format!("{vault_id:020}").as_bytes());
    key
}

pub(crate) fn vault_policies(vault_id: u64) -> Vec<u8> {
    format!("vault-policy:{vault_id:020}:").into_bytes()
}

pub(crate) fn vault_policy(vault_id: u64, policy_id: u64) -> Vec<u8> {
    let mut key = vault_policies(vault_id);
    key.extend_from_slice(format!("{policy_id:020}").as_bytes());
    key
}

pub(crate) fn vault_escrows(vault_id: u64) -> Vec<u8> {
    format!("vault-escrow:{vault_id:020}:").into_bytes()
}

pub(crate) fn vault_escrow(vault_id: u64, escrow_id: u64) -> Vec<u8> {
    let mut key = vault_escrows(vault_id);
    key.extend_from_slice(format!("{escrow_id:020}").as_bytes());
    key
}

/// Microseconds since the epoch, clamped at zero.
pub(crate) fn micros(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp_micros()).unwrap_or(0)
}

pub(crate) fn audit(at: DateTime<Utc>, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&micros(at).to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Smallest audit key at or after `at`.
pub(crate) fn audit_lower_bound(at: DateTime<Utc>) -> [u8; 16] {
    audit(at, 0)
}

pub(crate) fn encode_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn decode_id(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn padded_ids_sort_numerically() {
        assert!(vault_escrow(1, 9) < vault_escrow(1, 10));
        assert!(vault_escrow(1, 10).starts_with(&vault_escrows(1)));
        assert!(!vault_escrow(11, 1).starts_with(&vault_escrows(1)));
    }

    #[test]
    fn audit_keys_sort_by_time_then_id() {
        let t = Utc::now();
        assert!(audit(t, 5) < audit(t + Duration::microseconds(1), 0));
        assert!(audit(t, 1) < audit(t, 2));
        assert!(audit_lower_bound(t) <= audit(t, 0));
    }

    #[test]
    fn id_codec() {
        assert_eq!(decode_id(&encode_id(42)), Some(42));
        assert_eq!(decode_id(&[1, 2, 3]), None);
    }
}
