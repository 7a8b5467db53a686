// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data-store actions.
//!
//! Mutations read the affected rows before writing. The pre-image becomes the
//! before-state (an object for a single row, an array otherwise) and the
//! audit metadata carries the table and primary key column so the rollback
//! engine can address the rows again.

use std::sync::Arc;

use async_trait::async_trait;
use capstan_core::{ActionResult, CapstanError, DataStore, Filter, OrderBy, Row};
use serde_json::{Value, json};

use crate::registry::{Access, ActionContext, ActionHandler, optional_str, required_str};

pub const DEFAULT_PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOp {
    Query,
    Insert,
    Update,
    Delete,
    Upsert,
}

impl DbOp {
    pub const ALL: [Self; 5] = [
        Self::Query,
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::Upsert,
    ];

    pub fn action_type(self) -> &'static str {
        match self {
            Self::Query => "db:query",
            Self::Insert => "db:insert",
            Self::Update => "db:update",
            Self::Delete => "db:delete",
            Self::Upsert => "db:upsert",
        }
    }
}

/// Handler for the `db:*` action types.
pub struct DatabaseAction {
    op: DbOp,
    store: Arc<dyn DataStore>,
}

impl DatabaseAction {
    pub fn new(op: DbOp, store: Arc<dyn DataStore>) -> Self {
        Self { op, store }
    }
}

/// One row as an object, several as an array.
pub fn rows_state(rows: &[Row]) -> Value {
    match rows {
        [single] => Value::Object(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::Object).collect()),
    }
}

/// Rows held in a before/after state, whichever shape it was stored in.
pub fn state_rows(state: &Value) -> Vec<Row> {
    match state {
        Value::Object(row) => vec![row.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

fn data_row(config: &Value) -> Result<Row, CapstanError> {
    match config.get("data") {
        Some(Value::Object(row)) => Ok(row.clone()),
        _ => Err(CapstanError::Validation("'data' must be an object".into())),
    }
}

/// A mandatory, non-empty `where` clause.
fn required_filter(config: &Value, op: DbOp) -> Result<Filter, CapstanError> {
    let filter = config
        .get("where")
        .map(Filter::from_json)
        .transpose()?
        .unwrap_or_default();
    if filter.is_empty() {
        return Err(CapstanError::Validation(format!(
            "{} requires a non-empty 'where' clause",
            op.action_type()
        )));
    }
    Ok(filter)
}

#[async_trait]
impl ActionHandler for DatabaseAction {
    fn action_type(&self) -> &str {
        self.op.action_type()
    }

    fn description(&self) -> &str {
        match self.op {
            DbOp::Query => "Select rows from a table",
            DbOp::Insert => "Insert a row",
            DbOp::Update => "Update rows matching a where clause",
            DbOp::Delete => "Delete rows matching a where clause",
            DbOp::Upsert => "Insert or replace a row by primary key",
        }
    }

    fn is_mutating(&self) -> bool {
        self.op != DbOp::Query
    }

    fn access(&self, config: &Value) -> Result<Vec<Access>, CapstanError> {
        Ok(vec![Access::Table(required_str(config, "table")?.to_string())])
    }

    async fn execute(
        &self,
        _ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionResult, CapstanError> {
        let table = required_str(config, "table")?;
        let pk = optional_str(config, "primaryKey").unwrap_or(DEFAULT_PRIMARY_KEY);
        let keyed = |result: ActionResult| {
            result
                .with_target(table)
                .with_metadata("table", json!(table))
                .with_metadata("primaryKey", json!(pk))
        };

        match self.op {
            DbOp::Query => {
                let filter = config
                    .get("where")
                    .map(Filter::from_json)
                    .transpose()?
                    .unwrap_or_default();
                let order = config.get("orderBy").map(OrderBy::from_json).transpose()?;
                let limit = config
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize);
                let rows = self
                    .store
                    .select(table, &filter, order.as_ref(), limit)
                    .await?;
                Ok(ActionResult::ok(json!({"rows": rows, "count": rows.len()})).with_target(table))
            }
            DbOp::Insert => {
                let row = data_row(config)?;
                if let Some(id) = row.get(pk) {
                    let existing = self
                        .store
                        .select(table, &Filter::eq(pk, id.clone()), None, Some(1))
                        .await?;
                    if !existing.is_empty() {
                        return Err(CapstanError::handler(format!(
                            "Row with {pk}={id} already exists in {table}"
                        )));
                    }
                }
                let inserted = self.store.insert(table, row).await?;
                Ok(keyed(
                    ActionResult::ok(Value::Object(inserted.clone()))
                        .with_states(None, Some(Value::Object(inserted)))
                        .reversible(),
                ))
            }
            DbOp::Update => {
                let filter = required_filter(config, self.op)?;
                let patch = data_row(config)?;
                let before = self.store.select(table, &filter, None, None).await?;
                if before.is_empty() {
                    return Ok(ActionResult::ok(json!({"rows": [], "count": 0})).with_target(table));
                }
                let after = self.store.update(table, patch, &filter).await?;
                Ok(keyed(
                    ActionResult::ok(json!({"rows": after, "count": after.len()}))
                        .with_states(Some(rows_state(&before)), Some(rows_state(&after)))
                        .reversible(),
                ))
            }
            DbOp::Delete => {
                let filter = required_filter(config, self.op)?;
                let before = self.store.select(table, &filter, None, None).await?;
                if before.is_empty() {
                    return Ok(ActionResult::ok(json!({"deleted": 0})).with_target(table));
                }
                let removed = self.store.delete(table, &filter).await?;
                Ok(keyed(
                    ActionResult::ok(json!({"deleted": removed.len()}))
                        .with_states(Some(rows_state(&before)), None)
                        .reversible(),
                ))
            }
            DbOp::Upsert => {
                let row = data_row(config)?;
                let existing = match row.get(pk) {
                    Some(id) => self
                        .store
                        .select(table, &Filter::eq(pk, id.clone()), None, Some(1))
                        .await?
                        .into_iter()
                        .next(),
                    None => None,
                };
                let existed = existing.is_some();
                let stored = self.store.upsert(table, row).await?;
                Ok(keyed(
                    ActionResult::ok(Value::Object(stored.clone()))
                        .with_states(existing.map(Value::Object), Some(Value::Object(stored)))
                        .reversible()
                        .with_metadata("existed", json!(existed)),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::execution;
    use crate::staging::StagingArea;
    use capstan_test_utils::MockDataStore;

    async fn run(
        op: DbOp,
        store: &Arc<MockDataStore>,
        config: Value,
    ) -> Result<ActionResult, CapstanError> {
        let ctx = execution(&["database:*"]);
        let staging = StagingArea::new("run-1", "inst-1");
        let action_ctx = ActionContext {
            execution: &ctx,
            staging: &staging,
        };
        DatabaseAction::new(op, store.clone())
            .execute(&action_ctx, &config)
            .await
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn update_captures_single_row_pre_image() {
        let store = Arc::new(MockDataStore::new());
        store.seed("leads", vec![row(json!({"id": "x", "status": "open"}))]);

        let result = run(
            DbOp::Update,
            &store,
            json!({"table": "leads", "where": {"id": "x"}, "data": {"status": "done"}}),
        )
        .await
        .unwrap();
        assert!(result.reversible);
        assert_eq!(result.before_state.as_ref().unwrap()["status"], json!("open"));
        assert_eq!(result.after_state.as_ref().unwrap()["status"], json!("done"));
        assert_eq!(result.metadata["table"], json!("leads"));
        assert_eq!(result.target(), Some("leads"));
    }

    #[tokio::test]
    async fn update_and_delete_refuse_unconditional_mutation() {
        let store = Arc::new(MockDataStore::new());
        store.seed("leads", vec![row(json!({"id": "x"}))]);
        for op in [DbOp::Update, DbOp::Delete] {
            let err = run(op, &store, json!({"table": "leads", "where": {}, "data": {"a": 1}}))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("non-empty 'where'"));
        }
        assert_eq!(store.rows("leads").len(), 1);
    }

    #[tokio::test]
    async fn delete_captures_every_row() {
        let store = Arc::new(MockDataStore::new());
        store.seed(
            "leads",
            vec![
                row(json!({"id": "a", "status": "open"})),
                row(json!({"id": "b", "status": "open"})),
                row(json!({"id": "c", "status": "done"})),
            ],
        );
        let result = run(
            DbOp::Delete,
            &store,
            json!({"table": "leads", "where": {"status": "open"}}),
        )
        .await
        .unwrap();
        assert_eq!(result.before_state.unwrap().as_array().unwrap().len(), 2);
        assert_eq!(store.rows("leads").len(), 1);
    }

    #[tokio::test]
    async fn upsert_records_whether_the_row_existed() {
        let store = Arc::new(MockDataStore::new());
        store.seed("leads", vec![row(json!({"id": "x", "status": "open"}))]);

        let replaced = run(
            DbOp::Upsert,
            &store,
            json!({"table": "leads", "data": {"id": "x", "status": "won"}}),
        )
        .await
        .unwrap();
        assert_eq!(replaced.metadata["existed"], json!(true));
        assert_eq!(replaced.before_state.unwrap()["status"], json!("open"));

        let inserted = run(
            DbOp::Upsert,
            &store,
            json!({"table": "leads", "data": {"id": "y", "status": "new"}}),
        )
        .await
        .unwrap();
        assert_eq!(inserted.metadata["existed"], json!(false));
        assert!(inserted.before_state.is_none());
    }

    #[tokio::test]
    async fn insert_rejects_existing_ids_and_query_is_read_only() {
        let store = Arc::new(MockDataStore::new());
        let first = run(DbOp::Insert, &store, json!({"table": "leads", "data": {"id": "x", "n": 2}}))
            .await
            .unwrap();
        assert!(first.reversible);
        assert!(
            run(DbOp::Insert, &store, json!({"table": "leads", "data": {"id": "x"}}))
                .await
                .is_err()
        );

        let query = run(
            DbOp::Query,
            &store,
            json!({"table": "leads", "where": {"n": {"gt": 1}}, "orderBy": "n desc", "limit": 5}),
        )
        .await
        .unwrap();
        assert!(!query.reversible);
        assert_eq!(query.data.unwrap()["count"], json!(1));
        assert!(!DatabaseAction::new(DbOp::Query, store).is_mutating());
    }
}
