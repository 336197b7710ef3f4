//! The engine: routes inbound events to per-voter sessions and runs their
//! ledger commands.
//!
//! Each voter has at most one live session. Events for one voter are handled
//! one at a time (the session is behind an async mutex); events for different
//! voters run concurrently and only meet inside the store and the ledger's
//! claim reservations.
//!
//! A session that is replaced by a new `/start`, cancelled, or expired is
//! *retired*. A retired session issues no further ledger commands, and the
//! outcome of a command that was already in flight is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use smallvec::{smallvec, SmallVec};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ElectionConfig;
use crate::effect::{Effect, LedgerEffect};
use crate::event::{InboundEvent, VoterId};
use crate::ledger::CodeLedger;
use crate::machine::{Machine, SessionCommand, SessionEvent, SessionState, VoterSession};
use crate::reply::Reply;
use crate::store::RowStore;
use crate::tally::TallyEngine;

/// Replies produced by one inbound event. Usually one.
pub type Replies = SmallVec<[Reply; 2]>;

struct SessionSlot {
    machine: VoterSession,
    last_seen: Instant,
}

struct SessionCell {
    retired: AtomicBool,
    slot: Mutex<SessionSlot>,
}

impl SessionCell {
    fn new(machine: VoterSession) -> Self {
        Self {
            retired: AtomicBool::new(false),
            slot: Mutex::new(SessionSlot {
                machine,
                last_seen: Instant::now(),
            }),
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

/// Entry point for the gateway.
pub struct Engine {
    config: Arc<ElectionConfig>,
    effect: LedgerEffect,
    tally: TallyEngine,
    sessions: DashMap<VoterId, Arc<SessionCell>>,
}

impl Engine {
    pub fn new(store: Arc<dyn RowStore>, config: Arc<ElectionConfig>) -> Self {
        let ledger = Arc::new(CodeLedger::new(store.clone(), config.clone()));
        Self {
            effect: LedgerEffect::new(ledger),
            tally: TallyEngine::new(store, config.clone()),
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Current state of a voter's live session, if any.
    pub async fn session_state(&self, voter: &VoterId) -> Option<SessionState> {
        let cell = self.sessions.get(voter).map(|entry| entry.value().clone())?;
        let slot = cell.slot.lock().await;
        Some(slot.machine.state().clone())
    }

    /// Handle one inbound event and return what to send back.
    pub async fn handle(&self, event: InboundEvent) -> Replies {
        let voter = event.voter().clone();
        match event {
            InboundEvent::InitiateSession { first_name, .. } => {
                let cell = Arc::new(SessionCell::new(VoterSession::new(
                    voter.clone(),
                    self.config.clone(),
                )));
                if let Some(previous) = self.sessions.insert(voter.clone(), cell.clone()) {
                    previous.retire();
                    info!(voter = %voter, "discarding previous incomplete session");
                }
                info!(voter = %voter, "session started");
                self.drive(&cell, SessionEvent::Initiated { first_name }).await
            }
            InboundEvent::CancelRequested { .. } => {
                let Some((_, cell)) = self.sessions.remove(&voter) else {
                    return smallvec![Reply::cancelled()];
                };
                cell.retire();
                // Never wait on a session that is inside a ledger call; once
                // retired it discards whatever that call returns.
                match cell.slot.try_lock() {
                    Ok(mut slot) => {
                        info!(voter = %voter, state = slot.machine.state().name(), "session cancelled");
                        slot.machine.decide(&SessionEvent::CancelRequested);
                    }
                    Err(_) => info!(voter = %voter, "session cancelled during a ledger call"),
                }
                smallvec![Reply::cancelled()]
            }
            InboundEvent::AdminResultsRequested { .. } => smallvec![self.results(&voter).await],
            InboundEvent::TextInput { text, .. } => {
                self.dispatch(&voter, SessionEvent::Text(text)).await
            }
            InboundEvent::ContactPayload {
                asserted,
                phone,
                display_name,
                handle,
                ..
            } => {
                self.dispatch(
                    &voter,
                    SessionEvent::Contact {
                        asserted,
                        phone,
                        display_name,
                        handle,
                    },
                )
                .await
            }
            InboundEvent::ChoiceSelected { candidate_key, .. } => {
                self.dispatch(&voter, SessionEvent::ChoiceSelected(candidate_key))
                    .await
            }
        }
    }

    /// Evict sessions idle for longer than the configured timeout.
    ///
    /// Returns a notice for each evicted voter. Sessions busy with a ledger
    /// call are active by definition and skipped; every store call has a
    /// deadline, so they become sweepable again once it passes.
    pub async fn sweep_expired(&self) -> Vec<(VoterId, Reply)> {
        let timeout = self.config.session_timeout();
        let cells: Vec<Arc<SessionCell>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut notices = Vec::new();
        for cell in cells {
            let Ok(mut slot) = cell.slot.try_lock() else {
                continue;
            };
            if slot.last_seen.elapsed() < timeout {
                continue;
            }
            let voter = slot.machine.voter().clone();
            self.evict(&voter, &cell);
            info!(voter = %voter, "session timed out");
            if let Some(SessionCommand::Reply(reply)) = slot.machine.decide(&SessionEvent::Expired)
            {
                notices.push((voter, reply));
            }
        }
        notices
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every`, forwarding
    /// notices to `notices` until the receiver goes away.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        notices: mpsc::UnboundedSender<(VoterId, Reply)>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                for notice in engine.sweep_expired().await {
                    if notices.send(notice).is_err() {
                        debug!("notice receiver closed, stopping sweeper");
                        return;
                    }
                }
            }
        })
    }

    async fn dispatch(&self, voter: &VoterId, event: SessionEvent) -> Replies {
        let Some(cell) = self.sessions.get(voter).map(|entry| entry.value().clone()) else {
            let reply = match event {
                SessionEvent::ChoiceSelected(_) => Reply::session_lost(),
                _ => Reply::no_session(),
            };
            return smallvec![reply];
        };
        self.drive(&cell, event).await
    }

    /// Feed `event` to the session and keep executing ledger commands until
    /// the machine produces a reply or has nothing more to do.
    async fn drive(&self, cell: &Arc<SessionCell>, event: SessionEvent) -> Replies {
        let mut slot = cell.slot.lock().await;
        let mut replies = Replies::new();
        if cell.is_retired() {
            return replies;
        }

        let voter = slot.machine.voter().clone();
        if slot.last_seen.elapsed() >= self.config.session_timeout() {
            self.evict(&voter, cell);
            info!(voter = %voter, "session timed out");
            if let Some(SessionCommand::Reply(reply)) = slot.machine.decide(&SessionEvent::Expired)
            {
                replies.push(reply);
            }
            return replies;
        }
        slot.last_seen = Instant::now();

        let mut next = Some(event);
        while let Some(event) = next.take() {
            match slot.machine.decide(&event) {
                None => {}
                Some(SessionCommand::Reply(reply)) => replies.push(reply),
                Some(SessionCommand::Ledger(cmd)) => {
                    if cell.is_retired() {
                        debug!(voter = %voter, "session retired, ledger command dropped");
                        break;
                    }
                    match self.effect.execute(cmd).await {
                        Ok(result) => next = Some(result),
                        Err(e) => {
                            error!(voter = %voter, error = %e, "ledger effect failed");
                            self.evict(&voter, cell);
                            replies.push(Reply::store_unavailable());
                            return replies;
                        }
                    }
                    if cell.is_retired() {
                        warn!(voter = %voter, "session retired while a ledger call was in flight, result discarded");
                        replies.clear();
                        return replies;
                    }
                }
            }
        }

        if slot.machine.is_terminal() {
            info!(voter = %voter, state = slot.machine.state().name(), "session finished");
            self.evict(&voter, cell);
        }
        replies
    }

    async fn results(&self, voter: &VoterId) -> Reply {
        if !self.config.is_admin(voter) {
            warn!(voter = %voter, "results requested by non-admin");
            return Reply::admin_only();
        }
        match self.tally.compute().await {
            Ok(report) => Reply::results(&report),
            Err(e) => {
                error!(error = %e, "failed to compute results");
                Reply::results_unavailable()
            }
        }
    }

    /// Remove `cell` from the session map if it is still the voter's current
    /// session, and retire it either way.
    fn evict(&self, voter: &VoterId, cell: &Arc<SessionCell>) {
        self.sessions
            .remove_if(voter, |_, current| Arc::ptr_eq(current, cell));
        cell.retire();
    }
}
