//! The per-voter session state machine.
//!
//! The machine is pure: it never touches the store. Every input is a
//! [`SessionEvent`]; every decision is at most one [`SessionCommand`], either a
//! reply for the voter or a ledger operation. Ledger results come back as
//! events, so the whole protocol is visible in [`VoterSession::decide`].
//!
//! ```text
//! Start ──Initiated──► AwaitingCode ──Unused──► AwaitingContact ──claimed──► AwaitingChoice ──► Done
//!                        ▲    │                        │
//!                        └────┘ malformed / not found  └── claim failed ─────────────────────► Done
//!                               / already used
//! any non-terminal ──Cancel──► Cancelled
//! any non-terminal ──Expired─► TimedOut
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Candidate, ElectionConfig};
use crate::error::{Categorizable, ErrorCategory, LedgerError};
use crate::event::VoterId;
use crate::ledger::LookupOutcome;
use crate::record::{is_well_formed, normalize_code, ClaimedCode, CodeSnapshot, VoterIdentity};
use crate::reply::Reply;

/// A pure decision-maker.
///
/// Machines hold their own state, take events, and return the next command.
/// They do no IO.
pub trait Machine: Send + 'static {
    type Event;
    type Command;

    fn decide(&mut self, event: &Self::Event) -> Option<Self::Command>;
}

/// Why a session reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Voted,
    ClaimFailed,
    VoteFailed,
    StoreUnavailable,
}

/// Where a voter's conversation stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Start,
    AwaitingCode,
    AwaitingContact { snapshot: CodeSnapshot },
    AwaitingChoice { claimed: ClaimedCode },
    Done(SessionOutcome),
    Cancelled,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done(_) | SessionState::Cancelled | SessionState::TimedOut
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Start => "start",
            SessionState::AwaitingCode => "awaiting_code",
            SessionState::AwaitingContact { .. } => "awaiting_contact",
            SessionState::AwaitingChoice { .. } => "awaiting_choice",
            SessionState::Done(_) => "done",
            SessionState::Cancelled => "cancelled",
            SessionState::TimedOut => "timed_out",
        }
    }
}

/// Inputs to the session machine: voter actions and ledger results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Initiated {
        first_name: Option<String>,
    },
    Text(String),
    Contact {
        asserted: Option<VoterId>,
        phone: String,
        display_name: String,
        handle: Option<String>,
    },
    ChoiceSelected(String),
    CancelRequested,
    Expired,

    LookupFinished(Result<LookupOutcome, LedgerError>),
    ClaimFinished(Result<ClaimedCode, LedgerError>),
    VoteFinished {
        candidate: Candidate,
        result: Result<(), LedgerError>,
    },
}

/// Store operations requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    Lookup {
        code: String,
    },
    Claim {
        snapshot: CodeSnapshot,
        identity: VoterIdentity,
    },
    RecordVote {
        claimed: ClaimedCode,
        candidate: Candidate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Reply(Reply),
    Ledger(LedgerCommand),
}

/// One voter's conversation.
#[derive(Debug)]
pub struct VoterSession {
    voter: VoterId,
    config: Arc<ElectionConfig>,
    state: SessionState,
}

impl VoterSession {
    pub fn new(voter: VoterId, config: Arc<ElectionConfig>) -> Self {
        Self {
            voter,
            config,
            state: SessionState::Start,
        }
    }

    pub fn voter(&self) -> &VoterId {
        &self.voter
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn finish(&mut self, outcome: SessionOutcome, reply: Reply) -> Option<SessionCommand> {
        self.state = SessionState::Done(outcome);
        Some(SessionCommand::Reply(reply))
    }

    fn on_lookup(&mut self, result: &Result<LookupOutcome, LedgerError>) -> Option<SessionCommand> {
        match result {
            Ok(LookupOutcome::Unused(snapshot)) => {
                let reply = Reply::contact_request(&snapshot.record.class_name);
                self.state = SessionState::AwaitingContact {
                    snapshot: snapshot.clone(),
                };
                Some(SessionCommand::Reply(reply))
            }
            Ok(LookupOutcome::AlreadyUsed(snapshot)) => {
                // Deliberately not terminal: the session stays in
                // AwaitingCode instead of ending, so the voter can send their
                // own code without another /start.
                info!(voter = %self.voter, code = %snapshot.record.code, "voter offered a used code");
                Some(SessionCommand::Reply(Reply::code_already_used()))
            }
            Ok(LookupOutcome::NotFound) => Some(SessionCommand::Reply(Reply::code_not_found())),
            Err(e) => {
                warn!(voter = %self.voter, error = %e, "lookup failed");
                self.finish(SessionOutcome::StoreUnavailable, Reply::store_unavailable())
            }
        }
    }

    fn on_claim(&mut self, result: &Result<ClaimedCode, LedgerError>) -> Option<SessionCommand> {
        match result {
            Ok(claimed) => {
                self.state = SessionState::AwaitingChoice {
                    claimed: claimed.clone(),
                };
                Some(SessionCommand::Reply(Reply::candidate_prompt(&self.config)))
            }
            Err(e) => {
                warn!(voter = %self.voter, error = %e, "claim failed");
                let reply = match e.category() {
                    ErrorCategory::AlreadyClaimed => Reply::code_already_used(),
                    _ => Reply::claim_failed(),
                };
                self.finish(SessionOutcome::ClaimFailed, reply)
            }
        }
    }
}

impl Machine for VoterSession {
    type Event = SessionEvent;
    type Command = SessionCommand;

    fn decide(&mut self, event: &SessionEvent) -> Option<SessionCommand> {
        if self.state.is_terminal() {
            return None;
        }

        match (&self.state, event) {
            (_, SessionEvent::CancelRequested) => {
                self.state = SessionState::Cancelled;
                Some(SessionCommand::Reply(Reply::cancelled()))
            }
            (_, SessionEvent::Expired) => {
                self.state = SessionState::TimedOut;
                Some(SessionCommand::Reply(Reply::timed_out()))
            }

            (SessionState::Start, SessionEvent::Initiated { first_name }) => {
                self.state = SessionState::AwaitingCode;
                Some(SessionCommand::Reply(Reply::welcome(first_name.as_deref())))
            }

            (SessionState::AwaitingCode, SessionEvent::Text(text)) => {
                let code = normalize_code(text);
                if is_well_formed(&code) {
                    Some(SessionCommand::Ledger(LedgerCommand::Lookup { code }))
                } else {
                    Some(SessionCommand::Reply(Reply::malformed_code()))
                }
            }
            (SessionState::AwaitingCode, SessionEvent::LookupFinished(result)) => {
                self.on_lookup(result)
            }
            (
                SessionState::AwaitingCode,
                SessionEvent::Contact { .. } | SessionEvent::ChoiceSelected(_),
            ) => Some(SessionCommand::Reply(Reply::enter_code())),

            (
                SessionState::AwaitingContact { snapshot },
                SessionEvent::Contact {
                    asserted,
                    phone,
                    display_name,
                    handle,
                },
            ) => {
                if asserted.as_ref() != Some(&self.voter) {
                    warn!(voter = %self.voter, "contact not bound to sender");
                    return Some(SessionCommand::Reply(Reply::contact_not_bound()));
                }
                Some(SessionCommand::Ledger(LedgerCommand::Claim {
                    snapshot: snapshot.clone(),
                    identity: VoterIdentity {
                        voter_id: self.voter.clone(),
                        phone: phone.clone(),
                        full_name: display_name.trim().to_string(),
                        handle: handle.clone(),
                    },
                }))
            }
            (
                SessionState::AwaitingContact { .. },
                SessionEvent::Text(_) | SessionEvent::ChoiceSelected(_),
            ) => {
                Some(SessionCommand::Reply(Reply::contact_not_bound()))
            }
            (SessionState::AwaitingContact { .. }, SessionEvent::ClaimFinished(result)) => {
                self.on_claim(result)
            }

            (SessionState::AwaitingChoice { claimed }, SessionEvent::ChoiceSelected(key)) => {
                match self.config.candidate(key) {
                    Some(candidate) => Some(SessionCommand::Ledger(LedgerCommand::RecordVote {
                        claimed: claimed.clone(),
                        candidate: candidate.clone(),
                    })),
                    None => {
                        warn!(voter = %self.voter, key = %key, "unknown candidate selected");
                        Some(SessionCommand::Reply(Reply::unknown_candidate()))
                    }
                }
            }
            (
                SessionState::AwaitingChoice { .. },
                SessionEvent::Text(_) | SessionEvent::Contact { .. },
            ) => {
                Some(SessionCommand::Reply(Reply::use_buttons()))
            }
            (
                SessionState::AwaitingChoice { .. },
                SessionEvent::VoteFinished { candidate, result },
            ) => match result {
                Ok(()) => self.finish(SessionOutcome::Voted, Reply::vote_recorded(&candidate.label)),
                Err(_) => self.finish(SessionOutcome::VoteFailed, Reply::vote_failed()),
            },

            // Stale ledger results and repeated initiations.
            _ => None,
        }
    }
}
