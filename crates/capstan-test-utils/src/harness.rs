// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for engine and end-to-end tests.
//!
//! `TestHarness` owns a temp-dir SQLite database plus one instance of each
//! mock provider, and can seed skills and installations directly.

use std::sync::Arc;

use capstan_core::{
    CapstanError, Environment, Installation, InstallationStatus, JsonMap, SkillManifest,
    SkillRecord,
};
use capstan_storage::Database;
use capstan_storage::queries::{installations, skills};
use serde_json::Value;

use crate::mock_data_store::MockDataStore;
use crate::mock_deployment::MockDeploymentProvider;
use crate::mock_generation::MockGenerationProvider;

/// A database in a temporary directory plus mock providers.
pub struct TestHarness {
    pub db: Database,
    pub store: Arc<MockDataStore>,
    pub deployments: Arc<MockDeploymentProvider>,
    pub generation: Arc<MockGenerationProvider>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Result<Self, CapstanError> {
        let temp_dir = tempfile::TempDir::new().map_err(CapstanError::storage)?;
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;
        Ok(Self {
            db,
            store: Arc::new(MockDataStore::new()),
            deployments: Arc::new(MockDeploymentProvider::new()),
            generation: Arc::new(MockGenerationProvider::new()),
            _temp_dir: temp_dir,
        })
    }

    /// Stores `manifest` as a skill and installs it for `tenant-1`.
    ///
    /// Skips manifest validation; tests that need it go through the
    /// installation manager.
    pub async fn seed_installation(
        &self,
        manifest: SkillManifest,
        permissions: &[&str],
        config: Value,
    ) -> Result<Installation, CapstanError> {
        let now = chrono::Utc::now().to_rfc3339();
        let skill = skills::upsert_skill(
            &self.db,
            &SkillRecord {
                id: uuid::Uuid::new_v4().to_string(),
                slug: manifest.slug.clone(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                manifest,
                created_at: now.clone(),
                updated_at: now.clone(),
            },
        )
        .await?;
        let installation = Installation {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: "tenant-1".into(),
            skill_id: skill.id,
            status: InstallationStatus::Installed,
            status_message: None,
            permissions_granted: permissions.iter().map(|p| p.to_string()).collect(),
            config: match config {
                Value::Object(map) => map,
                _ => JsonMap::new(),
            },
            environment: Environment::default(),
            onboarding: JsonMap::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        installations::create_installation(&self.db, &installation).await?;
        Ok(installation)
    }
}
