// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring of storage, handlers and engine services for the CLI.

use std::sync::Arc;
use std::time::Duration;

use capstan_audit::AuditLogger;
use capstan_config::CapstanConfig;
use capstan_core::{CapstanError, DataStore, DeploymentProvider, GenerationProvider};
use capstan_engine::{ExecutionEngine, InstallationManager, RollbackEngine};
use capstan_security::SensitivePaths;
use capstan_skill::actions::{
    GenerationDefaults, register_ai_actions, register_database_actions, register_deploy_actions,
    register_file_actions,
};
use capstan_skill::{ActionRegistry, StagingRegistry};
use capstan_storage::{Database, SqliteRecordStore};
use tracing::info;

use crate::providers::{UnconfiguredDeployments, UnconfiguredGeneration};

/// Every service a command needs, built from one configuration.
pub struct Runtime {
    pub db: Database,
    pub audit: AuditLogger,
    pub engine: Arc<ExecutionEngine>,
    pub rollback: RollbackEngine,
    pub installations: InstallationManager,
}

impl Runtime {
    /// Opens the configured database and registers the built-in handlers.
    ///
    /// Skill tables live in the same database as the engine's own records.
    pub async fn open(config: &CapstanConfig) -> Result<Self, CapstanError> {
        let db = Database::from_config(&config.storage).await?;
        let store: Arc<dyn DataStore> = Arc::new(SqliteRecordStore::new(db.clone()));
        let deployments: Arc<dyn DeploymentProvider> = Arc::new(UnconfiguredDeployments);
        let generation: Arc<dyn GenerationProvider> = Arc::new(UnconfiguredGeneration);
        Ok(Self::assemble(config, db, store, deployments, generation))
    }

    /// Builds the services around explicit providers.
    pub fn assemble(
        config: &CapstanConfig,
        db: Database,
        store: Arc<dyn DataStore>,
        deployments: Arc<dyn DeploymentProvider>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Self {
        let mut registry = ActionRegistry::new(SensitivePaths::new(
            config.security.extra_sensitive_paths.iter().cloned(),
        ));
        register_file_actions(&mut registry);
        register_database_actions(&mut registry, Arc::clone(&store));
        register_deploy_actions(
            &mut registry,
            Arc::clone(&deployments),
            Duration::from_secs(config.engine.deploy_poll_timeout_secs),
        );
        register_ai_actions(
            &mut registry,
            generation,
            GenerationDefaults {
                max_tokens: config.generation.default_max_tokens,
                temperature: config.generation.default_temperature,
            },
        );
        info!(handlers = registry.len(), "action registry initialized");

        let audit = AuditLogger::new(db.clone(), config.audit.clone());
        let staging = StagingRegistry::new();
        let engine = Arc::new(ExecutionEngine::new(
            db.clone(),
            Arc::new(registry),
            audit.clone(),
            staging.clone(),
            config.engine.clone(),
        ));
        let rollback = RollbackEngine::new(db.clone(), audit.clone(), staging)
            .with_data_store(store)
            .with_deployments(deployments);
        let installations = InstallationManager::new(db.clone(), audit.clone());

        Self {
            db,
            audit,
            engine,
            rollback,
            installations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_every_builtin_handler() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = CapstanConfig::default();
        config.storage.database_path = dir.path().join("capstan.db").display().to_string();

        let runtime = Runtime::open(&config).await.unwrap();
        let registry = runtime.engine.registry();
        for action_type in capstan_skill::actions::builtin_action_types() {
            assert!(registry.contains(action_type), "{action_type} missing");
        }
        assert!(runtime.installations.list(None).await.unwrap().is_empty());
    }
}
