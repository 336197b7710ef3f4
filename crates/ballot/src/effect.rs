//! Effects: the IO side of the session machine.
//!
//! An effect takes one command, performs it against the store, and returns
//! the resulting event. Failures that the machine knows how to handle are
//! returned as events, not errors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ledger::CodeLedger;
use crate::machine::{LedgerCommand, SessionEvent};

/// Executes commands of type `C`.
#[async_trait]
pub trait Effect<C>: Send + Sync {
    type Event;

    async fn execute(&self, cmd: C) -> anyhow::Result<Self::Event>;
}

/// Runs [`LedgerCommand`]s against a [`CodeLedger`].
pub struct LedgerEffect {
    ledger: Arc<CodeLedger>,
}

impl LedgerEffect {
    pub fn new(ledger: Arc<CodeLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Effect<LedgerCommand> for LedgerEffect {
    type Event = SessionEvent;

    async fn execute(&self, cmd: LedgerCommand) -> anyhow::Result<SessionEvent> {
        Ok(match cmd {
            LedgerCommand::Lookup { code } => {
                SessionEvent::LookupFinished(self.ledger.lookup(&code).await)
            }
            LedgerCommand::Claim { snapshot, identity } => {
                SessionEvent::ClaimFinished(self.ledger.claim(&snapshot, &identity).await)
            }
            LedgerCommand::RecordVote { claimed, candidate } => {
                let result = self
                    .ledger
                    .record_vote(&claimed, &candidate)
                    .await
                    .map(|_| ());
                SessionEvent::VoteFinished { candidate, result }
            }
        })
    }
}
