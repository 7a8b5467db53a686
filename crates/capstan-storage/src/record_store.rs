// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed implementation of the relational store contract.
//!
//! Each logical table is a set of JSON documents in the `records` table,
//! keyed by the row's `id` column. Filters are evaluated in process, inside
//! the same closure as the write, so every call is atomic.

use async_trait::async_trait;
use capstan_core::{CapstanError, DataStore, Filter, OrderBy, Row};
use rusqlite::params;
use serde_json::Value;
use tracing::debug;

use crate::database::{Database, map_tr_err};

/// Primary key column of every record table.
const ID_COLUMN: &str = "id";

/// Local relational store over the Capstan database.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// The storage key for a row id. Strings are used verbatim.
fn record_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn load_table(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt =
        conn.prepare("SELECT data FROM records WHERE table_name = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map(params![table], |row| {
        crate::database::json_column::<Row>(row, 0)
    })?;
    rows.collect()
}

fn write_row(conn: &rusqlite::Connection, table: &str, key: &str, row: &Row) -> rusqlite::Result<()> {
    let data = serde_json::to_string(row)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO records (table_name, record_id, data, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(table_name, record_id) DO UPDATE SET
            data = excluded.data, updated_at = excluded.updated_at",
        params![table, key, data, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn key_of(row: &Row) -> Option<String> {
    row.get(ID_COLUMN).and_then(record_key)
}

fn validate_table(table: &str) -> Result<(), CapstanError> {
    if table.is_empty() {
        return Err(CapstanError::Validation("table name must not be empty".into()));
    }
    Ok(())
}

/// Fills in a generated id when the row has none.
fn ensure_id(mut row: Row) -> (Row, String) {
    match key_of(&row) {
        Some(key) => (row, key),
        None => {
            let key = uuid::Uuid::new_v4().to_string();
            row.insert(ID_COLUMN.to_string(), Value::String(key.clone()));
            (row, key)
        }
    }
}

#[async_trait]
impl DataStore for SqliteRecordStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, CapstanError> {
        validate_table(table)?;
        let table = table.to_string();
        let filter = filter.clone();
        let order_by = order_by.cloned();
        self.db
            .connection()
            .call(move |conn| {
                let mut rows: Vec<Row> = load_table(conn, &table)?
                    .into_iter()
                    .filter(|row| filter.matches(row))
                    .collect();
                if let Some(order) = &order_by {
                    rows.sort_by(|a, b| order.compare(a, b));
                }
                if let Some(limit) = limit {
                    rows.truncate(limit);
                }
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, CapstanError> {
        validate_table(table)?;
        let (row, key) = ensure_id(row);
        let table_name = table.to_string();
        let (inserted, returned) = self
            .db
            .connection()
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM records WHERE table_name = ?1 AND record_id = ?2)",
                    params![table_name, key],
                    |r| r.get(0),
                )?;
                if exists {
                    return Ok((false, row));
                }
                write_row(conn, &table_name, &key, &row)?;
                Ok((true, row))
            })
            .await
            .map_err(map_tr_err)?;
        if !inserted {
            return Err(CapstanError::handler(format!(
                "duplicate key in table '{table}': a row with this id already exists"
            )));
        }
        debug!(table, "record inserted");
        Ok(returned)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filter: &Filter,
    ) -> Result<Vec<Row>, CapstanError> {
        validate_table(table)?;
        let table = table.to_string();
        let filter = filter.clone();
        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut updated = Vec::new();
                for mut row in load_table(&tx, &table)? {
                    if !filter.matches(&row) {
                        continue;
                    }
                    let Some(key) = key_of(&row) else { continue };
                    for (column, value) in &patch {
                        if column != ID_COLUMN {
                            row.insert(column.clone(), value.clone());
                        }
                    }
                    write_row(&tx, &table, &key, &row)?;
                    updated.push(row);
                }
                tx.commit()?;
                Ok(updated)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, CapstanError> {
        validate_table(table)?;
        let table = table.to_string();
        let filter = filter.clone();
        self.db
            .connection()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = Vec::new();
                for row in load_table(&tx, &table)? {
                    if !filter.matches(&row) {
                        continue;
                    }
                    if let Some(key) = key_of(&row) {
                        tx.execute(
                            "DELETE FROM records WHERE table_name = ?1 AND record_id = ?2",
                            params![table, key],
                        )?;
                        removed.push(row);
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn upsert(&self, table: &str, row: Row) -> Result<Row, CapstanError> {
        validate_table(table)?;
        let (row, key) = ensure_id(row);
        let table = table.to_string();
        self.db
            .connection()
            .call(move |conn| {
                write_row(conn, &table, &key, &row)?;
                Ok(row)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::FilterOp;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn insert_generates_id_and_rejects_duplicates() {
        let store = store().await;
        let inserted = store.insert("leads", row(json!({"name": "a"}))).await.unwrap();
        let id = inserted["id"].clone();
        assert!(id.is_string());

        let dup = store
            .insert("leads", row(json!({"id": id, "name": "b"})))
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn update_patches_matching_rows_only() {
        let store = store().await;
        store.insert("tasks", row(json!({"id": "x", "status": "open"}))).await.unwrap();
        store.insert("tasks", row(json!({"id": "y", "status": "open"}))).await.unwrap();

        let updated = store
            .update(
                "tasks",
                row(json!({"status": "done", "id": "hijack"})),
                &Filter::eq("id", json!("x")),
            )
            .await
            .unwrap();
        assert_eq!(updated, vec![row(json!({"id": "x", "status": "done"}))]);

        let open = store
            .select("tasks", &Filter::eq("status", json!("open")), None, None)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0]["id"], "y");
    }

    #[tokio::test]
    async fn delete_returns_removed_rows() {
        let store = store().await;
        for n in 1..=3 {
            store.insert("nums", row(json!({"id": n, "n": n}))).await.unwrap();
        }
        let removed = store
            .delete("nums", &Filter::new().and("n", FilterOp::Gte, json!(2)))
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        let left = store.select("nums", &Filter::new(), None, None).await.unwrap();
        assert_eq!(left, vec![row(json!({"id": 1, "n": 1}))]);
    }

    #[tokio::test]
    async fn select_orders_and_limits() {
        let store = store().await;
        for (id, score) in [("a", 3), ("b", 1), ("c", 2)] {
            store.insert("s", row(json!({"id": id, "score": score}))).await.unwrap();
        }
        let top = store
            .select("s", &Filter::new(), Some(&OrderBy::desc("score")), Some(2))
            .await
            .unwrap();
        assert_eq!(top[0]["id"], "a");
        assert_eq!(top[1]["id"], "c");
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_whole_row() {
        let store = store().await;
        store.upsert("kv", row(json!({"id": "k", "a": 1, "b": 2}))).await.unwrap();
        store.upsert("kv", row(json!({"id": "k", "a": 5}))).await.unwrap();
        let rows = store.select("kv", &Filter::new(), None, None).await.unwrap();
        assert_eq!(rows, vec![row(json!({"id": "k", "a": 5}))]);
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let store = store().await;
        store.insert("one", row(json!({"id": "x"}))).await.unwrap();
        assert!(store.select("two", &Filter::new(), None, None).await.unwrap().is_empty());
    }
}
