//! Vote counting.
//!
//! The tally is a single read-only scan of the `Votes` table. Rows whose
//! candidate cell matches no configured candidate are reported but never
//! counted, so percentages always sum to 100 over the counted votes.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Candidate, ElectionConfig};
use crate::error::StoreError;
use crate::record::VoteRecord;
use crate::store::{within_deadline, Row, RowStore, Table};

/// One line of the results table.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTally {
    pub candidate: Candidate,
    pub count: u64,
    pub percentage: f64,
}

/// Ranked election results.
#[derive(Debug, Clone, PartialEq)]
pub struct TallyReport {
    /// Descending by count; ties keep ballot order.
    pub rows: Vec<CandidateTally>,
    pub total_votes: u64,
    /// Rows naming no configured candidate.
    pub unrecognized: u64,
    /// Size of the class roster.
    pub eligible_voters: u64,
}

impl TallyReport {
    pub fn render(&self) -> String {
        let mut out = String::from("📈 Election results 📈\n\n");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{}: {:.2}% ({} votes)",
                row.candidate.label, row.percentage, row.count
            );
        }
        let _ = write!(
            out,
            "\n---\nTotal confirmed votes: {}\nTotal potential voters: {}",
            self.total_votes, self.eligible_voters
        );
        if self.unrecognized > 0 {
            let _ = write!(out, "\nUnrecognized vote rows: {}", self.unrecognized);
        }
        out
    }
}

/// Count `rows` of the votes table against `candidates`.
///
/// A row counts for the candidate whose label equals its candidate cell.
/// Rows written under a key instead of a label are matched by key only when
/// no label matches.
pub fn tally_rows(candidates: &[Candidate], rows: &[Row], eligible_voters: u64) -> TallyReport {
    let mut counts = vec![0u64; candidates.len()];
    let mut unrecognized = 0;

    for row in rows {
        let vote = VoteRecord::from_row(row);
        let by_label = candidates.iter().position(|c| c.label == vote.candidate);
        match by_label.or_else(|| candidates.iter().position(|c| c.key == vote.candidate)) {
            Some(index) => counts[index] += 1,
            None => unrecognized += 1,
        }
    }

    let total_votes: u64 = counts.iter().sum();
    let mut tallies: Vec<CandidateTally> = candidates
        .iter()
        .zip(counts)
        .map(|(candidate, count)| CandidateTally {
            candidate: candidate.clone(),
            count,
            percentage: if total_votes == 0 {
                0.0
            } else {
                100.0 * count as f64 / total_votes as f64
            },
        })
        .collect();
    // Stable sort keeps ballot order among equal counts.
    tallies.sort_by(|a, b| b.count.cmp(&a.count));

    TallyReport {
        rows: tallies,
        total_votes,
        unrecognized,
        eligible_voters,
    }
}

/// Computes results from the store.
pub struct TallyEngine {
    store: Arc<dyn RowStore>,
    config: Arc<ElectionConfig>,
}

impl TallyEngine {
    pub fn new(store: Arc<dyn RowStore>, config: Arc<ElectionConfig>) -> Self {
        Self { store, config }
    }

    pub async fn compute(&self) -> Result<TallyReport, StoreError> {
        let scan = self.store.scan(Table::Votes);
        let rows = within_deadline(self.config.store_timeout(), scan).await?;
        let report = tally_rows(&self.config.candidates, &rows, self.config.eligible_voters());
        if report.unrecognized > 0 {
            warn!(
                unrecognized = report.unrecognized,
                "votes table contains rows for unknown candidates"
            );
        }
        info!(total_votes = report.total_votes, "tally computed");
        Ok(report)
    }
}
