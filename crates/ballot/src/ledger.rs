//! The code ledger: lookup, claim, and vote append.
//!
//! The store offers no transactions, so redemption commits in two steps:
//!
//! 1. **claim**: write the voter's identity into the code row, then flip
//!    `Is_Used` to `TRUE`. The `Is_Used` cell is the commit point; once it is
//!    written the code is consumed for good.
//! 2. **record_vote**: append one row to `Votes`.
//!
//! A crash between the two steps leaves a claimed code without a vote. That
//! state is terminal and auditable, never rolled back automatically.
//!
//! ## Concurrent claims
//!
//! Two sessions can both see a code as unused and both proceed to claim it.
//! The store cannot detect this. Under [`ClaimPolicy::Serialized`] the ledger
//! keeps an in-process reservation per code: the first claimant takes it,
//! later claimants (and later lookups) see the code as used. Under
//! [`ClaimPolicy::Unserialized`] there is no reservation and the last claim
//! write wins, so two racing sessions can each append a vote. Reservations
//! only cover one process; running several instances against one sheet
//! reopens the window.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::{Candidate, ClaimPolicy, ElectionConfig};
use crate::error::{LedgerError, StoreError};
use crate::event::VoterId;
use crate::record::{
    bool_cell, normalize_code, ClaimedCode, CodeColumn, CodeRecord, CodeSnapshot, VoteRecord,
    VoterIdentity,
};
use crate::store::{within_deadline, RowPosition, RowStore, Table};

/// Result of looking a code up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    NotFound,
    Unused(CodeSnapshot),
    AlreadyUsed(CodeSnapshot),
}

/// Timestamp format of the `Votes` table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// In-process claim reservations, keyed by normalized code.
#[derive(Debug, Default)]
struct Reservations {
    held: DashMap<String, VoterId>,
}

impl Reservations {
    /// Take the reservation for `code`. Fails if anyone already holds it.
    fn reserve(&self, code: &str, voter: &VoterId) -> bool {
        match self.held.entry(code.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(voter.clone());
                true
            }
        }
    }

    fn release(&self, code: &str) {
        self.held.remove(code);
    }

    fn is_held(&self, code: &str) -> bool {
        self.held.contains_key(code)
    }
}

/// Owner of the at-most-once redemption invariant.
pub struct CodeLedger {
    store: Arc<dyn RowStore>,
    config: Arc<ElectionConfig>,
    reservations: Reservations,
}

impl CodeLedger {
    pub fn new(store: Arc<dyn RowStore>, config: Arc<ElectionConfig>) -> Self {
        Self {
            store,
            config,
            reservations: Reservations::default(),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Find `code` by scanning the codes table.
    ///
    /// The input is normalized before comparison. Callers are expected to
    /// have checked the format already; an ill-formed code simply matches
    /// nothing.
    pub async fn lookup(&self, code: &str) -> Result<LookupOutcome, LedgerError> {
        let code = normalize_code(code);
        let scan = self.store.scan(Table::Codes);
        let rows = within_deadline(self.config.store_timeout(), scan).await?;

        let found = rows.iter().enumerate().find(|(_, row)| {
            row.get(CodeColumn::UniqueCode.index())
                .is_some_and(|cell| normalize_code(cell) == code)
        });

        let Some((index, row)) = found else {
            debug!(code = %code, scanned = rows.len(), "code not found");
            return Ok(LookupOutcome::NotFound);
        };

        let snapshot = CodeSnapshot {
            position: RowPosition(index),
            record: CodeRecord::from_row(row),
        };

        if snapshot.record.is_used || self.reservations.is_held(&code) {
            debug!(code = %code, row = index, "code already used");
            Ok(LookupOutcome::AlreadyUsed(snapshot))
        } else {
            debug!(code = %code, row = index, "code available");
            Ok(LookupOutcome::Unused(snapshot))
        }
    }

    /// Bind the code at `snapshot.position` to `identity`.
    ///
    /// Identity cells are written first and `Is_Used` last. A failure before
    /// the last write leaves the code unused; a failure on the last write is
    /// ambiguous and keeps the reservation so this process never hands the
    /// code out again.
    pub async fn claim(
        &self,
        snapshot: &CodeSnapshot,
        identity: &VoterIdentity,
    ) -> Result<ClaimedCode, LedgerError> {
        let code = snapshot.record.code.clone();
        let serialized = self.config.claim_policy == ClaimPolicy::Serialized;

        if serialized && !self.reservations.reserve(&code, &identity.voter_id) {
            warn!(code = %code, voter = %identity.voter_id, "claim refused, code reserved by another session");
            return Err(LedgerError::AlreadyClaimed { code });
        }

        let identity_cells = [
            (CodeColumn::VoterId, identity.voter_id.as_str()),
            (CodeColumn::Phone, identity.phone.as_str()),
            (CodeColumn::FullName, identity.full_name.as_str()),
        ];
        for (column, value) in identity_cells {
            if let Err(e) = self.write_code_cell(snapshot, column, value).await {
                if serialized {
                    self.reservations.release(&code);
                }
                error!(code = %code, row = %snapshot.position, error = %e, "claim failed before commit");
                return Err(e.into());
            }
        }

        if let Err(e) = self
            .write_code_cell(snapshot, CodeColumn::IsUsed, bool_cell(true))
            .await
        {
            error!(
                code = %code,
                row = %snapshot.position,
                error = %e,
                "claim commit write failed, outcome unknown"
            );
            return Err(e.into());
        }

        info!(code = %code, row = %snapshot.position, voter = %identity.voter_id, "code claimed");

        let mut record = snapshot.record.clone();
        record.is_used = true;
        record.voter_id = Some(identity.voter_id.clone());
        record.phone = Some(identity.phone.clone());
        record.full_name = Some(identity.full_name.clone());

        Ok(ClaimedCode {
            snapshot: CodeSnapshot {
                position: snapshot.position,
                record,
            },
            identity: identity.clone(),
        })
    }

    /// Append the vote for a claimed code.
    ///
    /// Must be called at most once per claim. A failure here is a partial
    /// commit: the code stays consumed and the gap is left for an operator.
    pub async fn record_vote(
        &self,
        claimed: &ClaimedCode,
        candidate: &Candidate,
    ) -> Result<VoteRecord, LedgerError> {
        if !self.config.candidates.contains(candidate) {
            return Err(LedgerError::UnknownCandidate(candidate.key.clone()));
        }

        let offset = self.config.timestamp_offset();
        let vote = VoteRecord {
            timestamp: Utc::now()
                .with_timezone(&offset)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            class_name: claimed.snapshot.record.class_name.clone(),
            code: claimed.snapshot.record.code.clone(),
            voter_id: claimed.identity.voter_id.to_string(),
            handle: claimed
                .identity
                .handle
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            display_name: claimed.identity.full_name.clone(),
            candidate: candidate.label.clone(),
        };

        let append = self.store.append_row(Table::Votes, vote.to_row());
        match within_deadline(self.config.store_timeout(), append).await {
            Ok(()) => {
                info!(code = %vote.code, candidate = %candidate.key, "vote recorded");
                Ok(vote)
            }
            Err(source) => {
                error!(
                    code = %vote.code,
                    row = %claimed.snapshot.position,
                    voter = %vote.voter_id,
                    candidate = %candidate.key,
                    error = %source,
                    "PARTIAL COMMIT: code claimed but vote not recorded, manual reconciliation required"
                );
                Err(LedgerError::PartialCommit {
                    code: vote.code,
                    row: claimed.snapshot.position.0,
                    source,
                })
            }
        }
    }

    async fn write_code_cell(
        &self,
        snapshot: &CodeSnapshot,
        column: CodeColumn,
        value: &str,
    ) -> Result<(), StoreError> {
        let write = self
            .store
            .write_cell(Table::Codes, snapshot.position, column.index(), value);
        within_deadline(self.config.store_timeout(), write).await
    }
}
