//! Issuing voting codes.
//!
//! Generation rewrites the whole `Codes` table and destroys every claim in
//! it, so it can only be called with a [`GenerationConsent`]. The voting flow
//! never holds a [`RowStoreAdmin`] and cannot reach this module.

use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use crate::config::ClassQuota;
use crate::error::GenerationError;
use crate::record::{CodeRecord, CODE_LEN};
use crate::store::{Row, RowStoreAdmin, Table};

/// Proof that the operator asked for the codes table to be wiped.
#[derive(Debug, Clone, Copy)]
pub struct GenerationConsent(());

impl GenerationConsent {
    /// The operator explicitly confirmed destroying the existing codes.
    pub fn confirmed_wipe() -> Self {
        Self(())
    }
}

/// What a generation run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    /// `(class, codes issued)` in roster order.
    pub per_class: Vec<(String, u32)>,
    pub total: u64,
}

/// A fresh code: the first [`CODE_LEN`] hex digits of a v4 UUID, uppercased.
pub fn new_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CODE_LEN);
    code.make_ascii_uppercase();
    code
}

/// Build the data rows for `roster`: `student_count` unused codes per class,
/// unique within the run.
pub fn issue_rows(roster: &[ClassQuota]) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for class in roster {
        for _ in 0..class.student_count {
            let code = loop {
                let candidate = new_code();
                if seen.insert(candidate.clone()) {
                    break candidate;
                }
            };
            rows.push(CodeRecord::issued(&class.class_name, class.student_count, code).to_row());
        }
    }
    rows
}

/// Wipe the codes table and issue new codes for `roster`.
pub async fn generate_codes(
    store: &dyn RowStoreAdmin,
    roster: &[ClassQuota],
    _consent: GenerationConsent,
) -> Result<GenerationSummary, GenerationError> {
    if roster.iter().all(|class| class.student_count == 0) {
        return Err(GenerationError::EmptyRoster);
    }

    let rows = issue_rows(roster);
    let total = rows.len() as u64;

    store.clear(Table::Codes).await?;
    store.append_row(Table::Codes, Table::Codes.header_row()).await?;
    store.append_rows(Table::Codes, rows).await?;

    let per_class: Vec<(String, u32)> = roster
        .iter()
        .map(|class| (class.class_name.clone(), class.student_count))
        .collect();
    for (class, count) in &per_class {
        info!(class = %class, count, "codes issued");
    }
    info!(total, "codes table regenerated");

    Ok(GenerationSummary { per_class, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::is_well_formed;
    use crate::store::{InMemoryRowStore, RowStore};

    fn roster() -> Vec<ClassQuota> {
        vec![
            ClassQuota {
                class_name: "7-А".into(),
                student_count: 3,
            },
            ClassQuota {
                class_name: "6-Б".into(),
                student_count: 2,
            },
        ]
    }

    #[test]
    fn codes_are_eight_uppercase_hex_digits() {
        for _ in 0..100 {
            let code = new_code();
            assert!(is_well_formed(&code), "{code}");
            assert!(code
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn rows_follow_the_roster() {
        let rows = issue_rows(&roster());
        assert_eq!(rows.len(), 5);

        let records: Vec<CodeRecord> = rows.iter().map(|r| CodeRecord::from_row(r)).collect();
        assert!(records[..3].iter().all(|r| r.class_name == "7-А" && r.student_count == 3));
        assert!(records[3..].iter().all(|r| r.class_name == "6-Б" && r.student_count == 2));
        assert!(records.iter().all(|r| !r.is_used && r.voter_id.is_none()));

        let unique: HashSet<_> = records.iter().map(|r| r.code.clone()).collect();
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn generation_replaces_existing_codes() {
        let mut used = CodeRecord::issued("5-А", 1, "OLDCODE1");
        used.is_used = true;
        let store = InMemoryRowStore::with_codes(vec![used.to_row()]);

        let summary = generate_codes(&store, &roster(), GenerationConsent::confirmed_wipe())
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(
            summary.per_class,
            vec![("7-А".to_string(), 3), ("6-Б".to_string(), 2)]
        );
        let rows = store.scan(Table::Codes).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r[2] != "OLDCODE1"));
    }

    #[tokio::test]
    async fn empty_roster_leaves_table_untouched() {
        let store = InMemoryRowStore::with_codes(vec![CodeRecord::issued("5-А", 1, "KEEPME12").to_row()]);

        let err = generate_codes(&store, &[], GenerationConsent::confirmed_wipe())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::EmptyRoster));
        assert_eq!(store.scan(Table::Codes).await.unwrap().len(), 1);
    }
}
