// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit log rows.
//!
//! Rows are append-only. The only mutation is the `reverted` flag, flipped by
//! [`claim_entry`] and undone by [`release_entry`].

use capstan_core::{AuditLogEntry, CapstanError};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use crate::database::{Database, json_column_opt, map_tr_err, to_json_text};

const AUDIT_COLUMNS: &str = "id, installation_id, run_id, action, target, before_state, \
     after_state, reversible, reverted, reverted_at, metadata, created_at";

/// Filter for [`query_entries`] and [`count_entries`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub installation_id: Option<String>,
    pub action: Option<String>,
    pub run_id: Option<String>,
    /// Only entries with `reversible = true`.
    pub reversible_only: bool,
    /// Only entries not yet reverted.
    pub pending_only: bool,
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        installation_id: row.get(1)?,
        run_id: row.get(2)?,
        action: row.get(3)?,
        target: row.get(4)?,
        before_state: json_column_opt(row, 5)?,
        after_state: json_column_opt(row, 6)?,
        reversible: row.get(7)?,
        reverted: row.get(8)?,
        reverted_at: row.get(9)?,
        metadata: json_column_opt(row, 10)?,
        created_at: row.get(11)?,
    })
}

const FILTER_CLAUSE: &str = "WHERE (?1 IS NULL OR installation_id = ?1)
       AND (?2 IS NULL OR action = ?2)
       AND (?3 IS NULL OR run_id = ?3)
       AND (?4 = 0 OR reversible = 1)
       AND (?5 = 0 OR reverted = 0)";

pub async fn insert_entry(db: &Database, entry: &AuditLogEntry) -> Result<(), CapstanError> {
    let entry = entry.clone();
    let json = |v: &Option<Value>| v.as_ref().map(to_json_text).transpose();
    let before = json(&entry.before_state)?;
    let after = json(&entry.after_state)?;
    let metadata = json(&entry.metadata)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO audit_log ({AUDIT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    entry.id,
                    entry.installation_id,
                    entry.run_id,
                    entry.action,
                    entry.target,
                    before,
                    after,
                    entry.reversible,
                    entry.reverted,
                    entry.reverted_at,
                    metadata,
                    entry.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_entry(db: &Database, id: &str) -> Result<Option<AuditLogEntry>, CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE id = ?1"),
                params![id],
                read_entry,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Matching entries, newest first.
pub async fn query_entries(
    db: &Database,
    filter: &AuditFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<AuditLogEntry>, CapstanError> {
    let filter = filter.clone();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log {FILTER_CLAUSE}
                 ORDER BY rowid DESC LIMIT ?6 OFFSET ?7"
            ))?;
            let rows = stmt.query_map(
                params![
                    filter.installation_id,
                    filter.action,
                    filter.run_id,
                    filter.reversible_only,
                    filter.pending_only,
                    limit,
                    offset,
                ],
                read_entry,
            )?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_entries(db: &Database, filter: &AuditFilter) -> Result<u64, CapstanError> {
    let filter = filter.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM audit_log {FILTER_CLAUSE}"),
                params![
                    filter.installation_id,
                    filter.action,
                    filter.run_id,
                    filter.reversible_only,
                    filter.pending_only,
                ],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| u64::try_from(n).unwrap_or(0))
        .map_err(map_tr_err)
}

/// Marks a reversible, unreverted entry as reverted.
///
/// Returns false if another caller already claimed it (or it is not
/// reversible), so each entry is reverted at most once.
pub async fn claim_entry(db: &Database, id: &str) -> Result<bool, CapstanError> {
    let id = id.to_string();
    let now = chrono::Utc::now().to_rfc3339();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE audit_log SET reverted = 1, reverted_at = ?2
                 WHERE id = ?1 AND reversible = 1 AND reverted = 0",
                params![id, now],
            )?;
            Ok(n == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Undoes a claim after a failed reversal.
pub async fn release_entry(db: &Database, id: &str) -> Result<(), CapstanError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE audit_log SET reverted = 0, reverted_at = NULL WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
