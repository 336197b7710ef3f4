//! # Ballot
//!
//! Single-use code redemption for a small election. Each voter redeems a
//! code issued by their class teacher, binds it to their own contact, and
//! casts exactly one vote. All state lives in a spreadsheet-like row store.
//!
//! ## Core Concepts
//!
//! The voting flow separates **decisions** from **IO**:
//! - [`VoterSession`] is a pure machine: it takes a [`SessionEvent`] and
//!   decides the next [`SessionCommand`], either a [`Reply`] or a
//!   [`LedgerCommand`].
//! - [`LedgerEffect`] runs ledger commands against the [`CodeLedger`] and
//!   turns the outcome back into an event.
//! - [`Engine`] owns one session per voter and loops decide → execute until
//!   the machine has something to say.
//!
//! ## Architecture
//!
//! ```text
//! Gateway (webhook)
//!     │
//!     ▼ handle(InboundEvent)
//! Engine ── per-voter session (mutex) ─────────────┐
//!     │                                            │
//!     ▼                                            │
//! VoterSession.decide() ─► Reply ─► back to gateway│
//!     │                                            │
//!     └─► LedgerCommand                            │
//!             │                                    │
//!             ▼                                    │
//!       LedgerEffect.execute() ─► CodeLedger ─► RowStore
//!             │                                    │
//!             └─► SessionEvent ────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One vote per code** - `Is_Used=TRUE` is written before the vote row
//! 2. **One vote per voter session** - a session ends after its vote
//! 3. **Contacts are bound** - only the sender's own contact claims a code
//! 4. **Retired sessions stay quiet** - a replaced, cancelled or expired
//!    session issues no further store writes
//!
//! The store has no transactions. A failed vote append after a successful
//! claim leaves a claimed code with no vote; it is logged as a partial
//! commit for manual reconciliation.

pub mod codegen;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod machine;
pub mod record;
pub mod reply;
pub mod store;
pub mod tally;

pub use codegen::{generate_codes, GenerationConsent, GenerationSummary};
pub use config::{Candidate, ClaimPolicy, ClassQuota, ElectionConfig};
pub use effect::{Effect, LedgerEffect};
pub use engine::{Engine, Replies};
pub use error::{
    Categorizable, ConfigError, ErrorCategory, GenerationError, LedgerError, StoreError,
};
pub use event::{InboundEvent, VoterId};
pub use ledger::{CodeLedger, LookupOutcome};
pub use machine::{
    LedgerCommand, Machine, SessionCommand, SessionEvent, SessionOutcome, SessionState,
    VoterSession,
};
pub use record::{ClaimedCode, CodeRecord, CodeSnapshot, VoteRecord, VoterIdentity};
pub use reply::Reply;
pub use store::{
    within_deadline, InMemoryRowStore, Row, RowPosition, RowStore, RowStoreAdmin, Table,
};
pub use tally::{CandidateTally, TallyEngine, TallyReport};

// Re-export async_trait for store implementations
pub use async_trait::async_trait;
