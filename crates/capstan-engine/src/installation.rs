// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Installation lifecycle: install, pause, resume, reconfigure, uninstall.

use capstan_audit::{AuditLogger, NewAuditEntry};
use capstan_core::{
    CapstanError, Environment, FieldType, Installation, InstallationStatus, JsonMap,
    OnboardingField, SkillManifest, SkillRecord,
};
use capstan_skill::capability::undeclared_grants;
use capstan_skill::parse_manifest;
use capstan_storage::Database;
use capstan_storage::queries::{installations, skills};
use serde_json::{Value, json};
use tracing::info;

/// Everything a tenant supplies when installing a skill.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub tenant_id: String,
    /// Capabilities to grant. `None` grants everything the manifest declares.
    pub permissions: Option<Vec<String>>,
    pub config: JsonMap,
    pub environment: Environment,
    pub onboarding: JsonMap,
}

/// A new installation plus any manifest warnings.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub installation: Installation,
    pub skill: SkillRecord,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct InstallationManager {
    db: Database,
    audit: AuditLogger,
}

impl InstallationManager {
    pub fn new(db: Database, audit: AuditLogger) -> Self {
        Self { db, audit }
    }

    /// Validates `raw_manifest` and registers it, replacing the stored
    /// manifest of a skill with the same slug.
    pub async fn import_skill(
        &self,
        raw_manifest: &str,
    ) -> Result<(SkillRecord, Vec<String>), CapstanError> {
        let parsed = parse_manifest(raw_manifest)?;
        let skill = store_skill(&self.db, parsed.manifest).await?;
        info!(skill = %skill.slug, version = %skill.version, "skill imported");
        Ok((skill, parsed.warnings))
    }

    /// Installs a skill for a tenant.
    ///
    /// Granted permissions must be covered by the manifest's declarations
    /// and every required onboarding field must be answered.
    pub async fn install(
        &self,
        raw_manifest: &str,
        request: InstallRequest,
    ) -> Result<InstallOutcome, CapstanError> {
        let parsed = parse_manifest(raw_manifest)?;
        let manifest = parsed.manifest;

        let permissions = request
            .permissions
            .unwrap_or_else(|| manifest.permissions.clone());
        let undeclared = undeclared_grants(&manifest.permissions, &permissions);
        if !undeclared.is_empty() {
            return Err(CapstanError::Validation(format!(
                "permissions not declared by {}: {}",
                manifest.slug,
                undeclared.join(", ")
            )));
        }
        let onboarding = validate_onboarding(&manifest.onboarding, request.onboarding)?;

        if let Some(existing) = skills::get_skill_by_slug(&self.db, &manifest.slug).await?
            && installations::find_installation(&self.db, &request.tenant_id, &existing.id)
                .await?
                .is_some()
        {
            return Err(CapstanError::InvalidState(format!(
                "{} is already installed for tenant {}",
                existing.slug, request.tenant_id
            )));
        }
        let skill = store_skill(&self.db, manifest).await?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut installation = Installation {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            skill_id: skill.id.clone(),
            status: InstallationStatus::Installing,
            status_message: None,
            permissions_granted: permissions,
            config: request.config,
            environment: request.environment,
            onboarding,
            created_at: now.clone(),
            updated_at: now,
        };
        installations::create_installation(&self.db, &installation).await?;
        installations::transition_status(
            &self.db,
            &installation.id,
            &[InstallationStatus::Installing],
            InstallationStatus::Installed,
        )
        .await?;
        installation.status = InstallationStatus::Installed;

        info!(
            installation_id = %installation.id,
            tenant_id = %installation.tenant_id,
            skill = %skill.slug,
            permissions = installation.permissions_granted.len(),
            "skill installed"
        );
        Ok(InstallOutcome {
            installation,
            skill,
            warnings: parsed.warnings,
        })
    }

    pub async fn get(&self, id: &str) -> Result<Installation, CapstanError> {
        installations::get_installation(&self.db, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<Installation>, CapstanError> {
        installations::list_installations(&self.db, tenant_id).await
    }

    pub async fn pause(&self, id: &str) -> Result<(), CapstanError> {
        self.transition(
            id,
            &[InstallationStatus::Installed, InstallationStatus::Error],
            InstallationStatus::Paused,
        )
        .await
    }

    pub async fn resume(&self, id: &str) -> Result<(), CapstanError> {
        self.transition(id, &[InstallationStatus::Paused], InstallationStatus::Installed)
            .await
    }

    /// Merges `patch` into the installation's config. A `null` value
    /// removes the key. The change is audited and reversible.
    pub async fn update_config(&self, id: &str, patch: JsonMap) -> Result<Installation, CapstanError> {
        let mut installation = self.get(id).await?;
        let before = installation.config.clone();
        for (key, value) in patch {
            if value.is_null() {
                installation.config.remove(&key);
            } else {
                installation.config.insert(key, value);
            }
        }
        installations::update_config(&self.db, id, &installation.config).await?;

        let entry = NewAuditEntry {
            target: Some(id.to_string()),
            before_state: Some(json!({"config": before})),
            after_state: Some(json!({"config": installation.config})),
            reversible: true,
            ..NewAuditEntry::new("config:update")
        };
        self.audit.log(id, entry, &secrets(&installation)).await?;
        info!(installation_id = id, "installation config updated");
        Ok(installation)
    }

    /// Sets one environment entry.
    ///
    /// Prior values are never captured, so only the addition of a new key
    /// can be reverted.
    pub async fn set_env(&self, id: &str, key: &str, value: &str) -> Result<(), CapstanError> {
        let mut installation = self.get(id).await?;
        let existed = installation.environment.contains_key(key);
        installation.environment.insert(key, value);
        installations::update_environment(&self.db, id, &installation.environment).await?;

        let entry = NewAuditEntry {
            target: Some(key.to_string()),
            before_state: Some(json!({"key": key, "existed": existed})),
            after_state: Some(json!({"key": key, "existed": true})),
            reversible: !existed,
            ..NewAuditEntry::new("env:update")
        };
        self.audit.log(id, entry, &secrets(&installation)).await?;
        info!(installation_id = id, key, existed, "installation environment updated");
        Ok(())
    }

    /// Removes the installation together with its onboarding values, runs
    /// and audit history.
    pub async fn uninstall(&self, id: &str) -> Result<(), CapstanError> {
        self.transition(
            id,
            &[
                InstallationStatus::Installing,
                InstallationStatus::Installed,
                InstallationStatus::Paused,
                InstallationStatus::Error,
            ],
            InstallationStatus::Uninstalling,
        )
        .await?;
        installations::delete_installation(&self.db, id).await?;
        info!(installation_id = id, "skill uninstalled");
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        from: &[InstallationStatus],
        to: InstallationStatus,
    ) -> Result<(), CapstanError> {
        if installations::transition_status(&self.db, id, from, to).await? {
            info!(installation_id = id, status = %to, "installation status changed");
            return Ok(());
        }
        let current = self.get(id).await?;
        Err(CapstanError::InvalidState(format!(
            "cannot move installation {id} from {} to {to}",
            current.status
        )))
    }
}

async fn store_skill(db: &Database, manifest: SkillManifest) -> Result<SkillRecord, CapstanError> {
    let now = chrono::Utc::now().to_rfc3339();
    skills::upsert_skill(
        db,
        &SkillRecord {
            id: uuid::Uuid::new_v4().to_string(),
            slug: manifest.slug.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            manifest,
            created_at: now.clone(),
            updated_at: now,
        },
    )
    .await
}

fn not_found(id: &str) -> CapstanError {
    CapstanError::NotFound {
        kind: "installation",
        id: id.to_string(),
    }
}

fn secrets(installation: &Installation) -> Vec<String> {
    installation
        .environment
        .values()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks onboarding answers against the manifest's fields.
///
/// Defaults fill unanswered fields. All problems are reported together.
fn validate_onboarding(
    fields: &[OnboardingField],
    mut answers: JsonMap,
) -> Result<JsonMap, CapstanError> {
    let mut errors = Vec::new();
    for key in answers.keys() {
        if !fields.iter().any(|f| &f.key == key) {
            errors.push(format!("unknown onboarding field '{key}'"));
        }
    }
    for field in fields {
        match answers.get(&field.key).filter(|v| !v.is_null()) {
            Some(value) => {
                if let Err(message) = check_answer(field, value) {
                    errors.push(message);
                }
            }
            None => match &field.default {
                Some(default) => {
                    answers.insert(field.key.clone(), default.clone());
                }
                None if field.required => {
                    errors.push(format!("onboarding field '{}' is required", field.key));
                }
                None => {}
            },
        }
    }
    if errors.is_empty() {
        Ok(answers)
    } else {
        Err(CapstanError::Validation(errors.join("; ")))
    }
}

fn check_answer(field: &OnboardingField, value: &Value) -> Result<(), String> {
    let key = &field.key;
    match field.field_type {
        FieldType::Number if !value.is_number() => Err(format!("'{key}' must be a number")),
        FieldType::Boolean if !value.is_boolean() => Err(format!("'{key}' must be a boolean")),
        FieldType::Number | FieldType::Boolean => Ok(()),
        _ => {
            let Some(text) = value.as_str() else {
                return Err(format!("'{key}' must be a string"));
            };
            match field.field_type {
                FieldType::Email if !text.contains('@') => {
                    Err(format!("'{key}' must be an email address"))
                }
                FieldType::Url if !(text.starts_with("http://") || text.starts_with("https://")) => {
                    Err(format!("'{key}' must be an http(s) URL"))
                }
                FieldType::Select if !field.options.iter().any(|o| o == text) => Err(format!(
                    "'{key}' must be one of: {}",
                    field.options.join(", ")
                )),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_audit::AuditQuery;
    use capstan_config::model::AuditConfig;
    use capstan_storage::queries::runs;
    use capstan_test_utils::TestHarness;

    use crate::rollback::RollbackEngine;

    const MANIFEST: &str = r#"{
        "name": "Lead Capture",
        "slug": "lead-capture",
        "version": "1.2.0",
        "permissions": ["database:leads", "env:*"],
        "onboarding": [
            {"key": "company", "label": "Company", "type": "text", "required": true},
            {"key": "tone", "label": "Tone", "type": "select", "options": ["calm", "loud"], "default": "calm"},
            {"key": "site", "label": "Website", "type": "url"}
        ],
        "hooks": {"onCelebrate": {}}
    }"#;

    fn manager(harness: &TestHarness) -> InstallationManager {
        InstallationManager::new(
            harness.db.clone(),
            AuditLogger::new(harness.db.clone(), AuditConfig::default()),
        )
    }

    fn answers(v: Value) -> JsonMap {
        v.as_object().cloned().unwrap()
    }

    fn request(onboarding: Value) -> InstallRequest {
        InstallRequest {
            tenant_id: "tenant-1".into(),
            onboarding: answers(onboarding),
            ..InstallRequest::default()
        }
    }

    #[tokio::test]
    async fn installs_with_defaults_and_warnings() {
        let harness = TestHarness::new().await.unwrap();
        let installed = manager(&harness)
            .install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap();

        let inst = &installed.installation;
        assert_eq!(inst.status, InstallationStatus::Installed);
        assert_eq!(inst.permissions_granted, vec!["database:leads", "env:*"]);
        assert_eq!(inst.onboarding["tone"], json!("calm"));
        assert_eq!(installed.warnings.len(), 1);
        assert!(installed.warnings[0].contains("onCelebrate"));

        let stored = manager(&harness).get(&inst.id).await.unwrap();
        assert_eq!(stored.onboarding["company"], json!("Acme"));
    }

    #[tokio::test]
    async fn rejects_bad_onboarding_all_at_once() {
        let harness = TestHarness::new().await.unwrap();
        let err = manager(&harness)
            .install(MANIFEST, request(json!({"tone": "shouty", "site": "ftp://x", "color": 1})))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown onboarding field 'color'"));
        assert!(message.contains("'company' is required"));
        assert!(message.contains("'tone' must be one of"));
        assert!(message.contains("'site' must be an http(s) URL"));
    }

    #[tokio::test]
    async fn rejects_grants_beyond_the_manifest() {
        let harness = TestHarness::new().await.unwrap();
        let mut req = request(json!({"company": "Acme"}));
        req.permissions = Some(vec!["database:leads".into(), "database:users".into()]);
        let err = manager(&harness).install(MANIFEST, req).await.unwrap_err();
        assert!(err.to_string().contains("database:users"));
    }

    #[tokio::test]
    async fn one_installation_per_tenant() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        mgr.install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap();
        let err = mgr
            .install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CapstanError::InvalidState(_)));
    }

    #[tokio::test]
    async fn rejected_reinstall_keeps_the_stored_manifest() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        mgr.install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap();

        let newer = MANIFEST.replace("1.2.0", "2.0.0");
        let err = mgr
            .install(&newer, request(json!({"company": "Acme"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CapstanError::InvalidState(_)));

        let stored = skills::get_skill_by_slug(&harness.db, "lead-capture")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, "1.2.0");
        assert_eq!(stored.manifest.version, "1.2.0");

        // Another tenant still picks up the new version.
        let mut other = request(json!({"company": "Globex"}));
        other.tenant_id = "tenant-2".into();
        let installed = mgr.install(&newer, other).await.unwrap();
        assert_eq!(installed.skill.version, "2.0.0");
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        let id = mgr
            .install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap()
            .installation
            .id;

        mgr.pause(&id).await.unwrap();
        assert_eq!(mgr.get(&id).await.unwrap().status, InstallationStatus::Paused);
        assert!(matches!(mgr.pause(&id).await, Err(CapstanError::InvalidState(_))));
        mgr.resume(&id).await.unwrap();
        assert_eq!(mgr.get(&id).await.unwrap().status, InstallationStatus::Installed);
    }

    #[tokio::test]
    async fn config_updates_are_audited_and_reversible() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        let mut req = request(json!({"company": "Acme"}));
        req.config = answers(json!({"limit": 10, "mode": "draft"}));
        let id = mgr.install(MANIFEST, req).await.unwrap().installation.id;

        let updated = mgr
            .update_config(&id, answers(json!({"limit": 20, "mode": null})))
            .await
            .unwrap();
        assert_eq!(updated.config, answers(json!({"limit": 20})));

        let audit = AuditLogger::new(harness.db.clone(), AuditConfig::default());
        let entries = audit
            .all(&AuditQuery {
                installation_id: Some(id.clone()),
                action: Some("config:update".into()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].reversible);

        RollbackEngine::new(harness.db.clone(), audit, Default::default())
            .revert(&entries[0].id)
            .await
            .unwrap();
        assert_eq!(
            mgr.get(&id).await.unwrap().config,
            answers(json!({"limit": 10, "mode": "draft"}))
        );
    }

    #[tokio::test]
    async fn env_updates_never_store_values() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        let id = mgr
            .install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap()
            .installation
            .id;

        mgr.set_env(&id, "API_KEY", "sk-first").await.unwrap();
        mgr.set_env(&id, "API_KEY", "sk-second").await.unwrap();

        let audit = AuditLogger::new(harness.db.clone(), AuditConfig::default());
        let entries = audit
            .all(&AuditQuery {
                installation_id: Some(id.clone()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first: overwriting an existing key cannot be undone.
        assert!(!entries[0].reversible);
        assert!(entries[1].reversible);
        let dump = serde_json::to_string(&entries).unwrap();
        assert!(!dump.contains("sk-first"));
        assert!(!dump.contains("sk-second"));
        assert_eq!(mgr.get(&id).await.unwrap().environment.get("API_KEY"), Some("sk-second"));
    }

    #[tokio::test]
    async fn uninstall_cascades() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        let id = mgr
            .install(MANIFEST, request(json!({"company": "Acme"})))
            .await
            .unwrap()
            .installation
            .id;
        mgr.update_config(&id, answers(json!({"limit": 1}))).await.unwrap();

        mgr.uninstall(&id).await.unwrap();
        assert!(matches!(mgr.get(&id).await, Err(CapstanError::NotFound { .. })));
        let audit = AuditLogger::new(harness.db.clone(), AuditConfig::default());
        let remaining = audit
            .all(&AuditQuery {
                installation_id: Some(id.clone()),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert!(remaining.is_empty());
        assert!(runs::list_runs(&harness.db, &id, 10).await.unwrap().is_empty());
        assert!(mgr.uninstall(&id).await.is_err());
    }

    #[tokio::test]
    async fn import_replaces_the_stored_manifest() {
        let harness = TestHarness::new().await.unwrap();
        let mgr = manager(&harness);
        let (first, _) = mgr.import_skill(MANIFEST).await.unwrap();
        let newer = MANIFEST.replace("1.2.0", "1.3.0");
        let (second, _) = mgr.import_skill(&newer).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.manifest.version, "1.3.0");
        assert!(mgr.import_skill("{\"slug\": \"Bad Slug\"}").await.is_err());
    }
}
