//! # Escrow Engine
//!
//! An escrow is one funds-movement request against a vault:
//!
//! - **payment**: one recipient, released once enough distinct committed
//!   approvers have signed off and any timelock has run out.
//! - **collection**: many participants each owing an allocation, tracked
//!   until everyone has paid or the deadline passes.
//!
//! ```text
//!            submit            threshold           mark_on_chain        complete
//!   draft ----------> submitted ---------> approved -------------> on-chain ------> completed
//!     |                  |                    |
//!     +------------------+--------------------+--> cancelled
//!     +---------------- deadline passed -------------------------------------> expired
//! ```
//!
//! Collection escrows skip the approval leg: payments are recorded while
//! `submitted`, and the escrow completes when the last allocation is paid
//! (or by an explicit `complete` if the policy does not auto-complete).
//!
//! Amounts are unsigned 256-bit integers in the token's smallest unit and
//! cross every boundary as decimal strings.

pub mod amount;
pub mod engine;
pub mod types;

pub use amount::Amount;
pub use engine::ApprovalEngine;
pub use types::{
    Approval, ApprovalProgress, CollectionProgress, Escrow, EscrowDetails, EscrowKind,
    EscrowStatus, NewCollectionEscrow, NewParticipant, NewPaymentEscrow, OnChainSubmission,
    Participant, ParticipantStatus,
};
