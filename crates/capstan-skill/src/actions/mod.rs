// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in action handlers.

pub mod ai;
pub mod database;
pub mod deploy;
pub mod file;

use std::sync::Arc;
use std::time::Duration;

use capstan_core::{DataStore, DeploymentProvider, GenerationProvider};

use crate::registry::ActionRegistry;

pub use ai::{AiAction, AiOp, GenerationDefaults};
pub use database::{DatabaseAction, DbOp};
pub use deploy::{DeployAction, DeployOp};
pub use file::{FileAction, FileOp};

/// Every action type with a built-in handler.
pub fn builtin_action_types() -> impl Iterator<Item = &'static str> {
    FileOp::ALL
        .into_iter()
        .map(FileOp::action_type)
        .chain(DbOp::ALL.into_iter().map(DbOp::action_type))
        .chain(DeployOp::ALL.into_iter().map(DeployOp::action_type))
        .chain(AiOp::ALL.into_iter().map(AiOp::action_type))
}

pub fn register_file_actions(registry: &mut ActionRegistry) {
    for op in FileOp::ALL {
        registry.register(Arc::new(FileAction::new(op)));
    }
}

pub fn register_database_actions(registry: &mut ActionRegistry, store: Arc<dyn DataStore>) {
    for op in DbOp::ALL {
        registry.register(Arc::new(DatabaseAction::new(op, Arc::clone(&store))));
    }
}

pub fn register_deploy_actions(
    registry: &mut ActionRegistry,
    provider: Arc<dyn DeploymentProvider>,
    poll_timeout: Duration,
) {
    for op in DeployOp::ALL {
        registry.register(Arc::new(DeployAction::new(
            op,
            Arc::clone(&provider),
            poll_timeout,
        )));
    }
}

pub fn register_ai_actions(
    registry: &mut ActionRegistry,
    provider: Arc<dyn GenerationProvider>,
    defaults: GenerationDefaults,
) {
    for op in AiOp::ALL {
        registry.register(Arc::new(AiAction::new(op, Arc::clone(&provider), defaults)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_test_utils::{MockDataStore, MockDeploymentProvider, MockGenerationProvider};

    #[test]
    fn every_builtin_type_registers() {
        let mut registry = ActionRegistry::default();
        register_file_actions(&mut registry);
        register_database_actions(&mut registry, Arc::new(MockDataStore::new()));
        register_deploy_actions(
            &mut registry,
            Arc::new(MockDeploymentProvider::new()),
            Duration::from_secs(1),
        );
        register_ai_actions(
            &mut registry,
            Arc::new(MockGenerationProvider::new()),
            GenerationDefaults::default(),
        );
        assert_eq!(registry.len(), builtin_action_types().count());
        assert!(builtin_action_types().all(|t| registry.contains(t)));
        assert!(!registry.is_mutating("db:query"));
        assert!(registry.is_mutating("db:update"));
        assert!(!registry.is_mutating("ai:generate"));
    }
}
