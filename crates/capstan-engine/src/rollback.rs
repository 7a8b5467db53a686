// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reversal of audited actions.
//!
//! Each reversible audit entry carries the pre-image its action replaced.
//! Reverting restores that pre-image, flips the entry to `reverted` and
//! appends a non-reversible `rollback:<action>` entry describing the
//! reversal. An entry is claimed before the reversal is applied and
//! released again if the reversal fails, so it is reverted at most once.
//!
//! File actions only ever write into their run's staging area. Once that
//! area has been discarded there is nothing left to undo, so reverting the
//! entry just records the reversal.

use std::sync::Arc;

use capstan_audit::{AuditLogger, AuditQuery, NewAuditEntry};
use capstan_core::{
    AuditLogEntry, CapstanError, DataStore, DeploymentProvider, Filter, FilterOp, JsonMap, Row,
};
use capstan_skill::StagingRegistry;
use capstan_skill::actions::database::{DEFAULT_PRIMARY_KEY, state_rows};
use capstan_storage::Database;
use capstan_storage::queries::installations;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why an audit entry could not be reverted.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("audit entry not found: {0}")]
    NotFound(String),

    #[error("audit entry {0} is not reversible")]
    NotReversible(String),

    #[error("audit entry {0} has already been reverted")]
    AlreadyReverted(String),

    #[error("cannot revert {action}: {reason}")]
    Unsupported { action: String, reason: String },

    #[error("reverting audit entry {entry_id} failed: {source}")]
    Failed {
        entry_id: String,
        #[source]
        source: CapstanError,
    },
}

impl RollbackError {
    fn failed(entry_id: &str, source: CapstanError) -> Self {
        Self::Failed {
            entry_id: entry_id.to_string(),
            source,
        }
    }

    fn unsupported(action: &str, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result of a batch reversal. Failures do not stop the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Ids of the entries that were reverted, in processing order.
    pub reverted: Vec<String>,
    /// Entry id and error message of every entry that was not.
    pub failed: Vec<(String, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A reversal, decided before anything is touched.
#[derive(Debug)]
enum Reversal {
    /// The staged write went away with its staging area.
    DiscardedStaging {
        run_id: String,
    },
    StagedFile {
        run_id: String,
        path: String,
        content: Option<String>,
    },
    DeleteRows {
        table: String,
        primary_key: String,
        ids: Vec<Value>,
    },
    PatchRows {
        table: String,
        primary_key: String,
        patches: Vec<Row>,
    },
    InsertRows {
        table: String,
        rows: Vec<Row>,
    },
    UpsertRow {
        table: String,
        row: Row,
    },
    DeleteProject {
        project_id: String,
    },
    RemoveDomain {
        project_id: String,
        domain: String,
    },
    RestoreConfig {
        installation_id: String,
        config: JsonMap,
    },
    RemoveEnv {
        installation_id: String,
        key: String,
    },
}

pub struct RollbackEngine {
    db: Database,
    audit: AuditLogger,
    staging: StagingRegistry,
    store: Option<Arc<dyn DataStore>>,
    deployments: Option<Arc<dyn DeploymentProvider>>,
}

impl RollbackEngine {
    pub fn new(db: Database, audit: AuditLogger, staging: StagingRegistry) -> Self {
        Self {
            db,
            audit,
            staging,
            store: None,
            deployments: None,
        }
    }

    /// Enables reversal of `db:*` entries.
    pub fn with_data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables reversal of `deploy:*` entries.
    pub fn with_deployments(mut self, deployments: Arc<dyn DeploymentProvider>) -> Self {
        self.deployments = Some(deployments);
        self
    }

    /// Reverts one entry and returns the `rollback:*` entry describing it.
    pub async fn revert(&self, entry_id: &str) -> Result<AuditLogEntry, RollbackError> {
        let result = self.revert_entry(entry_id).await;
        let outcome = match &result {
            Ok(_) => "reverted",
            Err(RollbackError::Failed { .. }) => "failed",
            Err(_) => "refused",
        };
        metrics::counter!("capstan_rollbacks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn revert_entry(&self, entry_id: &str) -> Result<AuditLogEntry, RollbackError> {
        let entry = self
            .audit
            .get(entry_id)
            .await
            .map_err(|e| RollbackError::failed(entry_id, e))?
            .ok_or_else(|| RollbackError::NotFound(entry_id.to_string()))?;
        if !entry.reversible {
            return Err(RollbackError::NotReversible(entry.id));
        }
        if entry.reverted {
            return Err(RollbackError::AlreadyReverted(entry.id));
        }

        let reversal = self.plan(&entry)?;
        let claimed = self
            .audit
            .mark_reverted(&entry.id)
            .await
            .map_err(|e| RollbackError::failed(&entry.id, e))?;
        if !claimed {
            return Err(RollbackError::AlreadyReverted(entry.id));
        }

        if let Err(e) = self.apply(reversal).await {
            warn!(entry_id = %entry.id, action = %entry.action, error = %e, "reversal failed");
            if let Err(release) = self.audit.release(&entry.id).await {
                warn!(entry_id = %entry.id, error = %release, "failed to release audit entry");
            }
            return Err(RollbackError::failed(&entry.id, e));
        }

        let secrets = self.secrets(&entry.installation_id).await;
        let record = NewAuditEntry {
            action: format!("rollback:{}", entry.action),
            target: entry.target.clone(),
            before_state: entry.after_state.clone(),
            after_state: entry.before_state.clone(),
            reversible: false,
            run_id: entry.run_id.clone(),
            metadata: Some(json!({"revertedEntryId": entry.id})),
        };
        let logged = self
            .audit
            .log(&entry.installation_id, record, &secrets)
            .await
            .map_err(|e| RollbackError::failed(&entry.id, e))?;
        info!(
            entry_id = %entry.id,
            action = %entry.action,
            target = entry.target.as_deref().unwrap_or(""),
            "audit entry reverted"
        );
        Ok(logged)
    }

    /// Reverts `entry_ids` in order, collecting failures.
    pub async fn revert_batch(&self, entry_ids: &[String]) -> RollbackReport {
        let mut report = RollbackReport::default();
        for id in entry_ids {
            match self.revert(id).await {
                Ok(_) => report.reverted.push(id.clone()),
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }
        report
    }

    /// Reverts every reversible, not yet reverted entry of an installation,
    /// newest first.
    pub async fn revert_all(&self, installation_id: &str) -> Result<RollbackReport, CapstanError> {
        let entries = self
            .audit
            .all(&AuditQuery {
                installation_id: Some(installation_id.to_string()),
                reversible_only: true,
                pending_only: true,
                ..AuditQuery::default()
            })
            .await?;
        let ids: Vec<String> = entries.into_iter().map(|e| e.id).collect();
        info!(installation_id, entries = ids.len(), "reverting installation history");
        Ok(self.revert_batch(&ids).await)
    }

    fn plan(&self, entry: &AuditLogEntry) -> Result<Reversal, RollbackError> {
        let action = entry.action.as_str();
        let before = entry.before_state.as_ref();
        let after = entry.after_state.as_ref();
        let meta = |key: &str| -> Option<&str> {
            entry.metadata.as_ref().and_then(|m| m.get(key)).and_then(Value::as_str)
        };
        let table = || {
            meta("table")
                .or(entry.target.as_deref())
                .map(str::to_string)
                .ok_or_else(|| RollbackError::unsupported(action, "no table recorded"))
        };
        let primary_key = meta("primaryKey").unwrap_or(DEFAULT_PRIMARY_KEY).to_string();

        match action {
            "file:create" | "file:modify" | "file:delete" | "file:template" => {
                let state = before
                    .ok_or_else(|| RollbackError::unsupported(action, "no prior file state"))?;
                let path = state
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RollbackError::unsupported(action, "no path recorded"))?;
                let run_id = entry
                    .run_id
                    .clone()
                    .ok_or_else(|| RollbackError::unsupported(action, "no run recorded"))?;
                if self.staging.get(&run_id).is_none() {
                    return Ok(Reversal::DiscardedStaging { run_id });
                }
                let existed = state.get("existed").and_then(Value::as_bool).unwrap_or(false);
                let content = existed
                    .then(|| state.get("content").and_then(Value::as_str).map(str::to_string))
                    .flatten();
                if existed && content.is_none() {
                    return Err(RollbackError::unsupported(action, "prior content missing"));
                }
                Ok(Reversal::StagedFile {
                    run_id,
                    path: path.to_string(),
                    content,
                })
            }
            "db:insert" => {
                self.require_store(action)?;
                let rows = after.map(state_rows).unwrap_or_default();
                let ids = primary_keys(&rows, &primary_key, action)?;
                Ok(Reversal::DeleteRows {
                    table: table()?,
                    primary_key,
                    ids,
                })
            }
            "db:update" => {
                self.require_store(action)?;
                let before_rows = before.map(state_rows).unwrap_or_default();
                let after_rows = after.map(state_rows).unwrap_or_default();
                if before_rows.is_empty() {
                    return Err(RollbackError::unsupported(action, "no pre-image recorded"));
                }
                primary_keys(&before_rows, &primary_key, action)?;
                let patches = before_rows
                    .into_iter()
                    .map(|row| restore_patch(row, &after_rows, &primary_key))
                    .collect();
                Ok(Reversal::PatchRows {
                    table: table()?,
                    primary_key,
                    patches,
                })
            }
            "db:delete" => {
                self.require_store(action)?;
                let rows = before.map(state_rows).unwrap_or_default();
                if rows.is_empty() {
                    return Err(RollbackError::unsupported(action, "no pre-image recorded"));
                }
                Ok(Reversal::InsertRows {
                    table: table()?,
                    rows,
                })
            }
            "db:upsert" => {
                self.require_store(action)?;
                let existed = entry
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("existed"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                match (existed, before) {
                    (true, Some(Value::Object(row))) => Ok(Reversal::UpsertRow {
                        table: table()?,
                        row: row.clone(),
                    }),
                    (true, _) => Err(RollbackError::unsupported(action, "no pre-image recorded")),
                    (false, _) => {
                        let rows = after.map(state_rows).unwrap_or_default();
                        let ids = primary_keys(&rows, &primary_key, action)?;
                        Ok(Reversal::DeleteRows {
                            table: table()?,
                            primary_key,
                            ids,
                        })
                    }
                }
            }
            "deploy:create-project" => {
                self.require_deployments(action)?;
                let project_id = after
                    .and_then(|s| s.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| RollbackError::unsupported(action, "no project recorded"))?;
                Ok(Reversal::DeleteProject {
                    project_id: project_id.to_string(),
                })
            }
            "deploy:add-domain" => {
                self.require_deployments(action)?;
                let field = |key: &str| {
                    after
                        .and_then(|s| s.get(key))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| RollbackError::unsupported(action, "no domain recorded"))
                };
                Ok(Reversal::RemoveDomain {
                    project_id: field("project_id")?,
                    domain: field("name")?,
                })
            }
            "config:update" => {
                let config = before
                    .and_then(|s| s.get("config"))
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| RollbackError::unsupported(action, "no prior config recorded"))?;
                Ok(Reversal::RestoreConfig {
                    installation_id: entry.installation_id.clone(),
                    config,
                })
            }
            "env:update" => {
                let state = before
                    .ok_or_else(|| RollbackError::unsupported(action, "no prior state recorded"))?;
                let existed = state.get("existed").and_then(Value::as_bool).unwrap_or(true);
                if existed {
                    return Err(RollbackError::unsupported(
                        action,
                        "the previous value was not captured",
                    ));
                }
                let key = state
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RollbackError::unsupported(action, "no key recorded"))?;
                Ok(Reversal::RemoveEnv {
                    installation_id: entry.installation_id.clone(),
                    key: key.to_string(),
                })
            }
            other => Err(RollbackError::unsupported(other, "no reversal strategy")),
        }
    }

    async fn apply(&self, reversal: Reversal) -> Result<(), CapstanError> {
        match reversal {
            Reversal::DiscardedStaging { run_id } => {
                debug!(run_id, "staging area already discarded, nothing to restore");
                Ok(())
            }
            Reversal::StagedFile {
                run_id,
                path,
                content,
            } => {
                let area = self.staging.get(&run_id).ok_or_else(|| {
                    CapstanError::handler(format!("staging area of run {run_id} is gone"))
                })?;
                match content {
                    Some(content) => {
                        area.put(&path, &content);
                    }
                    None => {
                        area.remove(&path);
                    }
                }
                Ok(())
            }
            Reversal::DeleteRows {
                table,
                primary_key,
                ids,
            } => {
                let filter = Filter::new().and(primary_key, FilterOp::In, Value::Array(ids));
                self.data_store()?.delete(&table, &filter).await?;
                Ok(())
            }
            Reversal::PatchRows {
                table,
                primary_key,
                patches,
            } => {
                let store = self.data_store()?;
                for patch in patches {
                    let id = patch.get(&primary_key).cloned().unwrap_or(Value::Null);
                    store
                        .update(&table, patch, &Filter::eq(primary_key.clone(), id))
                        .await?;
                }
                Ok(())
            }
            Reversal::InsertRows { table, rows } => {
                let store = self.data_store()?;
                for row in rows {
                    store.insert(&table, row).await?;
                }
                Ok(())
            }
            Reversal::UpsertRow { table, row } => {
                self.data_store()?.upsert(&table, row).await?;
                Ok(())
            }
            Reversal::DeleteProject { project_id } => {
                self.deployment_provider()?.delete_project(&project_id).await
            }
            Reversal::RemoveDomain { project_id, domain } => {
                self.deployment_provider()?
                    .remove_domain(&project_id, &domain)
                    .await
            }
            Reversal::RestoreConfig {
                installation_id,
                config,
            } => {
                if !installations::update_config(&self.db, &installation_id, &config).await? {
                    return Err(installation_missing(installation_id));
                }
                Ok(())
            }
            Reversal::RemoveEnv {
                installation_id,
                key,
            } => {
                let mut installation = installations::get_installation(&self.db, &installation_id)
                    .await?
                    .ok_or_else(|| installation_missing(installation_id.clone()))?;
                installation.environment.remove(&key);
                installations::update_environment(
                    &self.db,
                    &installation_id,
                    &installation.environment,
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn secrets(&self, installation_id: &str) -> Vec<String> {
        match installations::get_installation(&self.db, installation_id).await {
            Ok(Some(installation)) => installation
                .environment
                .values()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn require_store(&self, action: &str) -> Result<(), RollbackError> {
        match self.store {
            Some(_) => Ok(()),
            None => Err(RollbackError::unsupported(action, "no data store configured")),
        }
    }

    fn require_deployments(&self, action: &str) -> Result<(), RollbackError> {
        match self.deployments {
            Some(_) => Ok(()),
            None => Err(RollbackError::unsupported(
                action,
                "no deployment provider configured",
            )),
        }
    }

    fn data_store(&self) -> Result<&Arc<dyn DataStore>, CapstanError> {
        self.store
            .as_ref()
            .ok_or_else(|| CapstanError::Internal("no data store configured".into()))
    }

    fn deployment_provider(&self) -> Result<&Arc<dyn DeploymentProvider>, CapstanError> {
        self.deployments
            .as_ref()
            .ok_or_else(|| CapstanError::Internal("no deployment provider configured".into()))
    }
}

fn installation_missing(id: String) -> CapstanError {
    CapstanError::NotFound {
        kind: "installation",
        id,
    }
}

fn primary_keys(rows: &[Row], primary_key: &str, action: &str) -> Result<Vec<Value>, RollbackError> {
    if rows.is_empty() {
        return Err(RollbackError::unsupported(action, "no rows recorded"));
    }
    rows.iter()
        .map(|row| match row.get(primary_key) {
            Some(id) if !id.is_null() => Ok(id.clone()),
            _ => Err(RollbackError::unsupported(
                action,
                format!("row without '{primary_key}'"),
            )),
        })
        .collect()
}

/// The pre-image of one row, plus nulls for columns the update added.
fn restore_patch(mut before: Row, after_rows: &[Row], primary_key: &str) -> Row {
    let id = before.get(primary_key).cloned();
    if let Some(after) = after_rows.iter().find(|r| r.get(primary_key) == id.as_ref()) {
        for key in after.keys() {
            if !before.contains_key(key) {
                before.insert(key.clone(), Value::Null);
            }
        }
    }
    before
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_config::model::AuditConfig;
    use capstan_core::{Environment, SkillManifest};
    use capstan_skill::actions::file::file_state;
    use capstan_test_utils::TestHarness;

    use crate::engine::RunRequest;
    use crate::engine::tests::engine_for;

    fn audit(harness: &TestHarness) -> AuditLogger {
        AuditLogger::new(harness.db.clone(), AuditConfig::default())
    }

    fn rollback(harness: &TestHarness, staging: StagingRegistry) -> RollbackEngine {
        RollbackEngine::new(harness.db.clone(), audit(harness), staging)
            .with_data_store(harness.store.clone())
            .with_deployments(harness.deployments.clone())
    }

    fn manifest(actions: Value) -> SkillManifest {
        serde_json::from_value(json!({
            "name": "Rollback",
            "slug": "rollback",
            "version": "1.0.0",
            "actions": actions
        }))
        .unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    async fn entries_of(harness: &TestHarness, installation_id: &str) -> Vec<AuditLogEntry> {
        audit(harness)
            .all(&AuditQuery {
                installation_id: Some(installation_id.into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reverts_an_insert_exactly_once() {
        let harness = TestHarness::new().await.unwrap();
        let engine = engine_for(&harness);
        let inst = harness
            .seed_installation(
                manifest(json!([
                    {"id": "add", "type": "db:insert", "config": {"table": "leads", "data": {"id": "l1"}}}
                ])),
                &["database:leads"],
                json!({}),
            )
            .await
            .unwrap();
        assert!(engine.run(RunRequest::new(&inst.id)).await.unwrap().succeeded());
        let entry = entries_of(&harness, &inst.id).await.remove(0);

        let rollback = rollback(&harness, engine.staging().clone());
        let logged = rollback.revert(&entry.id).await.unwrap();
        assert_eq!(logged.action, "rollback:db:insert");
        assert!(!logged.reversible);
        assert_eq!(logged.metadata.unwrap()["revertedEntryId"], json!(entry.id));
        assert!(harness.store.rows("leads").is_empty());

        let reverted = audit(&harness).get(&entry.id).await.unwrap().unwrap();
        assert!(reverted.reverted);
        assert!(reverted.reverted_at.is_some());

        let again = rollback.revert(&entry.id).await.unwrap_err();
        assert!(matches!(again, RollbackError::AlreadyReverted(_)));
        assert!(harness.store.rows("leads").is_empty());
    }

    #[tokio::test]
    async fn update_reversal_nulls_added_columns() {
        let harness = TestHarness::new().await.unwrap();
        harness
            .store
            .seed("tasks", vec![row(json!({"id": "x", "status": "open"}))]);
        let engine = engine_for(&harness);
        let inst = harness
            .seed_installation(
                manifest(json!([
                    {"id": "close", "type": "db:update", "config": {
                        "table": "tasks", "where": {"id": "x"},
                        "data": {"status": "done", "closedBy": "bot"}}}
                ])),
                &["database:tasks"],
                json!({}),
            )
            .await
            .unwrap();
        assert!(engine.run(RunRequest::new(&inst.id)).await.unwrap().succeeded());
        let entry = entries_of(&harness, &inst.id).await.remove(0);

        rollback(&harness, StagingRegistry::new())
            .revert(&entry.id)
            .await
            .unwrap();
        assert_eq!(
            harness.store.row("tasks", "x").unwrap(),
            row(json!({"id": "x", "status": "open", "closedBy": null}))
        );
    }

    #[tokio::test]
    async fn preconditions_have_no_side_effects() {
        let harness = TestHarness::new().await.unwrap();
        let inst = harness
            .seed_installation(manifest(json!([])), &[], json!({}))
            .await
            .unwrap();
        let logger = audit(&harness);
        let fixed = logger
            .log(
                &inst.id,
                NewAuditEntry {
                    target: Some("prj-1".into()),
                    ..NewAuditEntry::new("deploy:deploy")
                },
                &[],
            )
            .await
            .unwrap();
        let rollback = rollback(&harness, StagingRegistry::new());

        assert!(matches!(
            rollback.revert("missing").await,
            Err(RollbackError::NotFound(_))
        ));
        assert!(matches!(
            rollback.revert(&fixed.id).await,
            Err(RollbackError::NotReversible(_))
        ));
        assert!(!logger.get(&fixed.id).await.unwrap().unwrap().reverted);
        assert_eq!(entries_of(&harness, &inst.id).await.len(), 1);
    }

    #[tokio::test]
    async fn file_reversal_restores_live_staging_and_records_discarded_runs() {
        let harness = TestHarness::new().await.unwrap();
        let inst = harness
            .seed_installation(manifest(json!([])), &[], json!({}))
            .await
            .unwrap();
        let staging = StagingRegistry::new();
        let lease = staging.lease("run-1", &inst.id);
        lease.area().put("a.txt", "new");

        let logger = audit(&harness);
        let modify = |run: &str| NewAuditEntry {
            target: Some("a.txt".into()),
            before_state: Some(file_state("a.txt", Some("old"))),
            after_state: Some(file_state("a.txt", Some("new"))),
            reversible: true,
            run_id: Some(run.to_string()),
            ..NewAuditEntry::new("file:modify")
        };
        let live = logger.log(&inst.id, modify("run-1"), &[]).await.unwrap();
        let stale = logger.log(&inst.id, modify("run-0"), &[]).await.unwrap();
        let rollback = rollback(&harness, staging.clone());

        rollback.revert(&live.id).await.unwrap();
        assert_eq!(lease.area().get("a.txt").as_deref(), Some("old"));

        let logged = rollback.revert(&stale.id).await.unwrap();
        assert_eq!(logged.action, "rollback:file:modify");
        assert!(logger.get(&stale.id).await.unwrap().unwrap().reverted);
        assert!(staging.get("run-0").is_none());

        let again = rollback.revert(&stale.id).await.unwrap_err();
        assert!(matches!(again, RollbackError::AlreadyReverted(_)));
    }

    #[tokio::test]
    async fn file_entries_of_finished_runs_can_be_reverted() {
        let harness = TestHarness::new().await.unwrap();
        let engine = engine_for(&harness);
        let inst = harness
            .seed_installation(
                manifest(json!([
                    {"id": "page", "type": "file:create",
                     "config": {"path": "site/index.html", "content": "<h1>hi</h1>"}}
                ])),
                &["files:write"],
                json!({}),
            )
            .await
            .unwrap();
        assert!(engine.run(RunRequest::new(&inst.id)).await.unwrap().succeeded());
        assert_eq!(engine.staging().live(), 0);

        let rollback = rollback(&harness, engine.staging().clone());
        let report = rollback.revert_all(&inst.id).await.unwrap();
        assert_eq!(report.reverted.len(), 1);
        assert!(report.is_clean());

        let entries = entries_of(&harness, &inst.id).await;
        let created = entries.iter().find(|e| e.action == "file:create").unwrap();
        assert!(created.reverted);
        assert!(entries.iter().any(|e| e.action == "rollback:file:create"));

        let second = rollback.revert_all(&inst.id).await.unwrap();
        assert!(second.reverted.is_empty());
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn failed_reversal_releases_the_entry() {
        let harness = TestHarness::new().await.unwrap();
        let inst = harness
            .seed_installation(manifest(json!([])), &[], json!({}))
            .await
            .unwrap();
        let logger = audit(&harness);
        let deleted = logger
            .log(
                &inst.id,
                NewAuditEntry {
                    target: Some("leads".into()),
                    before_state: Some(json!({"id": "l1", "name": "Ada"})),
                    reversible: true,
                    metadata: Some(json!({"table": "leads", "primaryKey": "id"})),
                    ..NewAuditEntry::new("db:delete")
                },
                &[],
            )
            .await
            .unwrap();
        let rollback = rollback(&harness, StagingRegistry::new());

        harness.store.fail_with(Some("store offline"));
        let err = rollback.revert(&deleted.id).await.unwrap_err();
        assert!(err.to_string().contains("store offline"));
        assert!(!logger.get(&deleted.id).await.unwrap().unwrap().reverted);

        harness.store.fail_with(None);
        rollback.revert(&deleted.id).await.unwrap();
        assert_eq!(
            harness.store.row("leads", "l1").unwrap(),
            row(json!({"id": "l1", "name": "Ada"}))
        );
    }

    #[tokio::test]
    async fn revert_all_goes_newest_first_and_collects_failures() {
        let harness = TestHarness::new().await.unwrap();
        let engine = engine_for(&harness);
        let inst = harness
            .seed_installation(
                manifest(json!([
                    {"id": "project", "type": "deploy:create-project", "config": {"name": "site"}},
                    {"id": "domain", "type": "deploy:add-domain",
                     "config": {"projectId": "{{project.id}}", "domain": "example.com"}},
                    {"id": "lead", "type": "db:insert", "config": {"table": "leads", "data": {"id": "l1"}}}
                ])),
                &["api:*", "database:*"],
                json!({}),
            )
            .await
            .unwrap();
        assert!(engine.run(RunRequest::new(&inst.id)).await.unwrap().succeeded());
        harness.store.fail_with(Some("store offline"));

        let report = rollback(&harness, StagingRegistry::new())
            .revert_all(&inst.id)
            .await
            .unwrap();
        assert_eq!(report.reverted.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("store offline"));
        assert!(harness.deployments.project("prj-1").is_none());

        let rollbacks: Vec<String> = entries_of(&harness, &inst.id)
            .await
            .into_iter()
            .filter(|e| e.action.starts_with("rollback:"))
            .map(|e| e.action)
            .collect();
        // Newest first: the domain went before the project.
        assert_eq!(
            rollbacks,
            vec!["rollback:deploy:create-project", "rollback:deploy:add-domain"]
        );
    }

    #[tokio::test]
    async fn env_reversal_removes_keys_that_did_not_exist() {
        let harness = TestHarness::new().await.unwrap();
        let inst = harness
            .seed_installation(manifest(json!([])), &[], json!({}))
            .await
            .unwrap();
        let mut environment = Environment::default();
        environment.insert("API_KEY", "sk-123");
        installations::update_environment(&harness.db, &inst.id, &environment)
            .await
            .unwrap();

        let logger = audit(&harness);
        let entry = logger
            .log(
                &inst.id,
                NewAuditEntry {
                    target: Some("API_KEY".into()),
                    before_state: Some(json!({"key": "API_KEY", "existed": false})),
                    after_state: Some(json!({"key": "API_KEY", "existed": true})),
                    reversible: true,
                    ..NewAuditEntry::new("env:update")
                },
                &["sk-123".into()],
            )
            .await
            .unwrap();

        rollback(&harness, StagingRegistry::new())
            .revert(&entry.id)
            .await
            .unwrap();
        let stored = installations::get_installation(&harness.db, &inst.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.environment.contains_key("API_KEY"));
    }
}
