//! Typed views over code and vote rows.

use serde::{Deserialize, Serialize};

use crate::event::VoterId;
use crate::store::{Row, RowPosition};

/// Length of every issued code.
pub const CODE_LEN: usize = 8;

/// Columns of the `Codes` table, in header order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeColumn {
    Class = 0,
    StudentCount = 1,
    UniqueCode = 2,
    IsUsed = 3,
    VoterId = 4,
    Phone = 5,
    FullName = 6,
}

impl CodeColumn {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Upper-case and trim raw user input.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Whether `code` (already normalized) can be a valid code at all.
///
/// Checked before any store access so malformed input costs no round-trip.
pub fn is_well_formed(code: &str) -> bool {
    code.chars().count() == CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}

fn cell(row: &[String], column: usize) -> &str {
    row.get(column).map(|s| s.trim()).unwrap_or("")
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// One row of the `Codes` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub class_name: String,
    /// Informational only.
    pub student_count: u32,
    pub code: String,
    pub is_used: bool,
    pub voter_id: Option<VoterId>,
    pub phone: Option<String>,
    pub full_name: Option<String>,
}

impl CodeRecord {
    /// A freshly issued, unclaimed code.
    pub fn issued(class_name: impl Into<String>, student_count: u32, code: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            student_count,
            code: code.into(),
            is_used: false,
            voter_id: None,
            phone: None,
            full_name: None,
        }
    }

    /// Lenient parse: missing trailing cells read as empty, an unreadable
    /// student count reads as zero.
    pub fn from_row(row: &[String]) -> Self {
        let is_used = cell(row, CodeColumn::IsUsed.index());
        Self {
            class_name: cell(row, CodeColumn::Class.index()).to_string(),
            student_count: cell(row, CodeColumn::StudentCount.index())
                .parse()
                .unwrap_or(0),
            code: normalize_code(cell(row, CodeColumn::UniqueCode.index())),
            is_used: is_used.eq_ignore_ascii_case("true") || is_used == "1",
            voter_id: optional(cell(row, CodeColumn::VoterId.index())).map(VoterId::new),
            phone: optional(cell(row, CodeColumn::Phone.index())),
            full_name: optional(cell(row, CodeColumn::FullName.index())),
        }
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.class_name.clone(),
            self.student_count.to_string(),
            self.code.clone(),
            bool_cell(self.is_used).to_string(),
            self.voter_id
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            self.phone.clone().unwrap_or_default(),
            self.full_name.clone().unwrap_or_default(),
        ]
    }
}

pub(crate) fn bool_cell(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// A code record together with the row it was read from.
///
/// Claims are written to `position` directly; the table is never rescanned
/// between lookup and claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSnapshot {
    pub position: RowPosition,
    pub record: CodeRecord,
}

/// Who is redeeming a code, as established by the contact handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity {
    pub voter_id: VoterId,
    pub phone: String,
    pub full_name: String,
    /// Chat username, if the voter has one.
    pub handle: Option<String>,
}

/// A code whose claim write has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedCode {
    pub snapshot: CodeSnapshot,
    pub identity: VoterIdentity,
}

/// One row of the `Votes` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub timestamp: String,
    pub class_name: String,
    pub code: String,
    pub voter_id: String,
    pub handle: String,
    pub display_name: String,
    /// Candidate label.
    pub candidate: String,
}

impl VoteRecord {
    pub const CANDIDATE_COLUMN: usize = 6;
    pub const CODE_COLUMN: usize = 2;

    pub fn from_row(row: &[String]) -> Self {
        Self {
            timestamp: cell(row, 0).to_string(),
            class_name: cell(row, 1).to_string(),
            code: normalize_code(cell(row, Self::CODE_COLUMN)),
            voter_id: cell(row, 3).to_string(),
            handle: cell(row, 4).to_string(),
            display_name: cell(row, 5).to_string(),
            candidate: cell(row, Self::CANDIDATE_COLUMN).to_string(),
        }
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.timestamp.clone(),
            self.class_name.clone(),
            self.code.clone(),
            self.voter_id.clone(),
            self.handle.clone(),
            self.display_name.clone(),
            self.candidate.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn well_formed_codes() {
        assert!(is_well_formed("AB12CD34"));
        assert!(is_well_formed(&normalize_code("  ab12cd34 ")));
        assert!(!is_well_formed("AB12CD3"));
        assert!(!is_well_formed("AB12CD345"));
        assert!(!is_well_formed("AB12-D34"));
        assert!(!is_well_formed("АВ12СD34")); // Cyrillic look-alikes
        assert!(!is_well_formed(""));
    }

    #[test]
    fn parses_claimed_row() {
        let record = CodeRecord::from_row(&row(&[
            "7-А",
            "25",
            "ab12cd34",
            "TRUE",
            "12345",
            "+380501112233",
            "Ivan Franko",
        ]));

        assert_eq!(record.code, "AB12CD34");
        assert!(record.is_used);
        assert_eq!(record.voter_id, Some(VoterId::from(12345)));
        assert_eq!(record.full_name.as_deref(), Some("Ivan Franko"));
    }

    #[test]
    fn parses_short_unclaimed_row() {
        let record = CodeRecord::from_row(&row(&["7-А", "n/a", "AB12CD34", "FALSE"]));

        assert!(!record.is_used);
        assert_eq!(record.student_count, 0);
        assert_eq!(record.voter_id, None);
        assert_eq!(record.phone, None);
    }

    #[test]
    fn issued_record_serializes_in_header_order() {
        let record = CodeRecord::issued("6-Б", 28, "0A1B2C3D");
        assert_eq!(
            record.to_row(),
            row(&["6-Б", "28", "0A1B2C3D", "FALSE", "", "", ""])
        );
    }
}
