// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The audit logger.

use capstan_config::model::AuditConfig;
use capstan_core::{AuditLogEntry, CapstanError};
use capstan_storage::queries::audit as queries;
use capstan_storage::{AuditFilter, Database};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::redaction::scrub_state;

/// Fields of an entry supplied by the caller. The logger assigns id and time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAuditEntry {
    pub action: String,
    pub target: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub reversible: bool,
    pub run_id: Option<String>,
    pub metadata: Option<Value>,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }
}

/// Audit query: filters plus 1-based pagination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub installation_id: Option<String>,
    pub action: Option<String>,
    pub run_id: Option<String>,
    pub reversible_only: bool,
    pub pending_only: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl AuditPage {
    pub fn has_more(&self) -> bool {
        u64::from(self.page) * u64::from(self.page_size) < self.total
    }
}

/// Appends and queries audit entries.
#[derive(Clone)]
pub struct AuditLogger {
    db: Database,
    config: AuditConfig,
}

impl AuditLogger {
    pub fn new(db: Database, config: AuditConfig) -> Self {
        Self { db, config }
    }

    /// Appends an entry for `installation_id`.
    ///
    /// Environment actions store the redaction marker instead of values, and
    /// every known secret in `secrets` is scrubbed from the payload. When
    /// scrubbing alters the before-state, the entry can no longer restore the
    /// prior state and is stored as non-reversible.
    pub async fn log(
        &self,
        installation_id: &str,
        entry: NewAuditEntry,
        secrets: &[String],
    ) -> Result<AuditLogEntry, CapstanError> {
        let (before_state, before_redacted) =
            scrub_state(&entry.action, entry.before_state.as_ref(), secrets);
        let (after_state, after_redacted) =
            scrub_state(&entry.action, entry.after_state.as_ref(), secrets);
        let (metadata, _) = scrub_state("", entry.metadata.as_ref(), secrets);

        let reversible = entry.reversible && !before_redacted;
        let metadata = if before_redacted || after_redacted {
            let mut map = match metadata {
                Some(Value::Object(map)) => map,
                Some(other) => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".into(), other);
                    map
                }
                None => serde_json::Map::new(),
            };
            map.insert("redacted".into(), Value::Bool(true));
            Some(Value::Object(map))
        } else {
            metadata
        };

        let record = AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            installation_id: installation_id.to_string(),
            run_id: entry.run_id,
            action: entry.action,
            target: entry.target,
            before_state,
            after_state,
            reversible,
            reverted: false,
            reverted_at: None,
            metadata,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        queries::insert_entry(&self.db, &record).await?;
        metrics::counter!("capstan_audit_entries_total").increment(1);

        if entry.reversible && !reversible {
            info!(
                entry_id = %record.id,
                action = %record.action,
                "audit entry stored as non-reversible: prior state was redacted"
            );
        }
        debug!(
            entry_id = %record.id,
            installation_id,
            action = %record.action,
            target = record.target.as_deref().unwrap_or(""),
            reversible = record.reversible,
            "audit entry appended"
        );
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AuditLogEntry>, CapstanError> {
        queries::get_entry(&self.db, id).await
    }

    /// Filtered, paginated entries, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage, CapstanError> {
        let page_size = query
            .page_size
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let page = query.page.unwrap_or(1).max(1);
        let filter = AuditFilter {
            installation_id: query.installation_id.clone(),
            action: query.action.clone(),
            run_id: query.run_id.clone(),
            reversible_only: query.reversible_only,
            pending_only: query.pending_only,
        };
        let offset = (page as usize - 1) * page_size as usize;
        let entries = queries::query_entries(&self.db, &filter, page_size as usize, offset).await?;
        let total = queries::count_entries(&self.db, &filter).await?;
        Ok(AuditPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    /// Every entry matching `query`'s filters, newest first, ignoring paging.
    pub async fn all(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, CapstanError> {
        let filter = AuditFilter {
            installation_id: query.installation_id.clone(),
            action: query.action.clone(),
            run_id: query.run_id.clone(),
            reversible_only: query.reversible_only,
            pending_only: query.pending_only,
        };
        queries::query_entries(&self.db, &filter, usize::MAX, 0).await
    }

    /// Flips `reverted` on a reversible, unreverted entry.
    ///
    /// Returns false when the entry was already claimed or is not reversible.
    pub async fn mark_reverted(&self, id: &str) -> Result<bool, CapstanError> {
        queries::claim_entry(&self.db, id).await
    }

    /// Undoes [`mark_reverted`](Self::mark_reverted) after a failed reversal.
    pub async fn release(&self, id: &str) -> Result<(), CapstanError> {
        queries::release_entry(&self.db, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::{Environment, Installation, InstallationStatus, SkillManifest, SkillRecord};
    use capstan_storage::queries::{installations, skills};
    use serde_json::json;

    async fn seed(db: &Database) -> String {
        let now = chrono::Utc::now().to_rfc3339();
        let skill = skills::upsert_skill(
            db,
            &SkillRecord {
                id: "skill-1".into(),
                slug: "crm".into(),
                name: "CRM".into(),
                version: "1.0.0".into(),
                manifest: serde_json::from_value::<SkillManifest>(json!({
                    "name": "CRM", "slug": "crm", "version": "1.0.0"
                }))
                .unwrap(),
                created_at: now.clone(),
                updated_at: now.clone(),
            },
        )
        .await
        .unwrap();
        let inst = Installation {
            id: "inst-1".into(),
            tenant_id: "t1".into(),
            skill_id: skill.id,
            status: InstallationStatus::Installed,
            status_message: None,
            permissions_granted: vec![],
            config: Default::default(),
            environment: Environment::default(),
            onboarding: Default::default(),
            created_at: now.clone(),
            updated_at: now,
        };
        installations::create_installation(db, &inst).await.unwrap();
        inst.id
    }

    async fn logger() -> (AuditLogger, String) {
        let db = Database::open_in_memory().await.unwrap();
        let id = seed(&db).await;
        (AuditLogger::new(db, AuditConfig::default()), id)
    }

    fn update_entry() -> NewAuditEntry {
        NewAuditEntry {
            target: Some("tasks".into()),
            before_state: Some(json!({"id": "x", "status": "open"})),
            after_state: Some(json!({"id": "x", "status": "done"})),
            reversible: true,
            run_id: Some("run-1".into()),
            ..NewAuditEntry::new("db:update")
        }
    }

    #[tokio::test]
    async fn log_persists_entry() {
        let (logger, inst) = logger().await;
        let entry = logger.log(&inst, update_entry(), &[]).await.unwrap();

        let loaded = logger.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(loaded.reversible);
        assert!(!loaded.reverted);
        assert_eq!(loaded.before_state.unwrap()["status"], "open");
    }

    #[tokio::test]
    async fn env_values_are_never_stored() {
        let (logger, inst) = logger().await;
        let entry = logger
            .log(
                &inst,
                NewAuditEntry {
                    target: Some("API_TOKEN".into()),
                    before_state: Some(json!({"key": "API_TOKEN", "existed": true, "value": "old-secret"})),
                    after_state: Some(json!({"key": "API_TOKEN", "value": "new-secret"})),
                    reversible: true,
                    ..NewAuditEntry::new("env:update")
                },
                &[],
            )
            .await
            .unwrap();

        let stored = serde_json::to_string(&logger.get(&entry.id).await.unwrap()).unwrap();
        assert!(!stored.contains("old-secret"));
        assert!(!stored.contains("new-secret"));
        assert!(!entry.reversible, "redacted prior value cannot be restored");
        assert_eq!(entry.metadata.unwrap()["redacted"], true);
    }

    #[tokio::test]
    async fn new_env_key_stays_reversible() {
        let (logger, inst) = logger().await;
        let entry = logger
            .log(
                &inst,
                NewAuditEntry {
                    before_state: Some(json!({"key": "NEW", "existed": false})),
                    after_state: Some(json!({"key": "NEW", "value": "v"})),
                    reversible: true,
                    ..NewAuditEntry::new("env:update")
                },
                &[],
            )
            .await
            .unwrap();
        assert!(entry.reversible);
        assert_eq!(entry.after_state.unwrap()["value"], capstan_security::REDACTED);
    }

    #[tokio::test]
    async fn known_secrets_are_scrubbed_everywhere() {
        let (logger, inst) = logger().await;
        let mut new = update_entry();
        new.after_state = Some(json!({"id": "x", "note": "key is s3cret-val"}));
        let entry = logger.log(&inst, new, &["s3cret-val".into()]).await.unwrap();
        assert_eq!(entry.after_state.unwrap()["note"], "key is [REDACTED]");
        assert!(entry.reversible, "before-state untouched");
    }

    #[tokio::test]
    async fn query_paginates_and_clamps() {
        let (logger, inst) = logger().await;
        for _ in 0..5 {
            logger.log(&inst, update_entry(), &[]).await.unwrap();
        }
        logger
            .log(&inst, NewAuditEntry::new("db:query"), &[])
            .await
            .unwrap();

        let page = logger
            .query(&AuditQuery {
                installation_id: Some(inst.clone()),
                action: Some("db:update".into()),
                page: Some(2),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.entries.len(), 2);
        assert!(page.has_more());

        let clamped = logger
            .query(&AuditQuery {
                page_size: Some(10_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(clamped.page_size, 500);
        assert_eq!(clamped.entries.len(), 6);
        assert!(!clamped.has_more());
    }

    #[tokio::test]
    async fn mark_reverted_once() {
        let (logger, inst) = logger().await;
        let entry = logger.log(&inst, update_entry(), &[]).await.unwrap();
        assert!(logger.mark_reverted(&entry.id).await.unwrap());
        assert!(!logger.mark_reverted(&entry.id).await.unwrap());

        let pending = logger
            .all(&AuditQuery {
                pending_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn file_backed_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let path = path.to_str().unwrap();

        let id = {
            let db = Database::open(path).await.unwrap();
            let inst = seed(&db).await;
            let logger = AuditLogger::new(db.clone(), AuditConfig::default());
            let entry = logger.log(&inst, update_entry(), &[]).await.unwrap();
            db.close().await.unwrap();
            entry.id
        };

        let logger = AuditLogger::new(Database::open(path).await.unwrap(), AuditConfig::default());
        assert!(logger.get(&id).await.unwrap().is_some());
    }
}
