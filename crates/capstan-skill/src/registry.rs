// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Action handler trait and the authorizing registry.
//!
//! The [`ActionHandler`] trait is implemented by every action type a
//! manifest can name (`file:create`, `db:update`, `deploy:deploy`, ...).
//! [`ActionRegistry::execute`] is the single authorization point: it checks
//! the action's declared permissions and the resources the handler says it
//! will touch before the handler runs, so no handler performs its own
//! capability checks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use capstan_core::{ActionResult, CapstanError};
use capstan_security::SensitivePaths;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::{self, Denial};
use crate::context::ExecutionContext;
use crate::staging::StagingArea;
use crate::template::{Scope, resolve_config};

/// A resource an action touches, derived from its resolved config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Table(String),
    EnvRead(String),
    FileRead(String),
    FileWrite(String),
}

/// What a handler sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub execution: &'a ExecutionContext,
    pub staging: &'a StagingArea,
}

/// One action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The manifest `type` this handler serves.
    fn action_type(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether a successful call changes state and must be audited.
    fn is_mutating(&self) -> bool {
        true
    }

    /// Top-level config keys the engine must not resolve before dispatch.
    fn raw_config_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Resources the call will touch. Checked before `execute`.
    fn access(&self, _config: &Value) -> Result<Vec<Access>, CapstanError> {
        Ok(Vec::new())
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionResult, CapstanError>;
}

/// Registered handlers, indexed by action type.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    sensitive: SensitivePaths,
}

impl ActionRegistry {
    pub fn new(sensitive: SensitivePaths) -> Self {
        Self {
            handlers: HashMap::new(),
            sensitive,
        }
    }

    /// Registers a handler under its `action_type()`, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers
            .insert(handler.action_type().to_string(), handler);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// (type, description) pairs sorted by type.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .handlers
            .values()
            .map(|h| (h.action_type(), h.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether a successful `action_type` call must be audited.
    pub fn is_mutating(&self, action_type: &str) -> bool {
        self.handlers
            .get(action_type)
            .is_none_or(|h| h.is_mutating())
    }

    /// Resolves an action's config through `scope`, honouring the handler's raw keys.
    pub fn prepare_config(&self, action_type: &str, config: &Value, scope: &Scope<'_>) -> Value {
        let raw = self
            .handlers
            .get(action_type)
            .map_or(&[][..], |h| h.raw_config_keys());
        resolve_config(config, scope, raw)
    }

    /// Authorizes and dispatches one action.
    ///
    /// Denials, unknown types and handler errors all come back as failed,
    /// non-reversible results; the handler is never invoked after a denial.
    pub async fn execute(
        &self,
        action_type: &str,
        ctx: &ActionContext<'_>,
        config: &Value,
        required_permissions: &[String],
    ) -> ActionResult {
        let result = self
            .dispatch(action_type, ctx, config, required_permissions)
            .await;
        let outcome = if result.success {
            "success"
        } else if result.is_permission_denied() {
            "denied"
        } else {
            "failure"
        };
        metrics::counter!(
            "capstan_actions_total",
            "type" => action_type.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn dispatch(
        &self,
        action_type: &str,
        ctx: &ActionContext<'_>,
        config: &Value,
        required_permissions: &[String],
    ) -> ActionResult {
        let Some(handler) = self.get(action_type) else {
            return ActionResult::failure(format!("Unknown action type: {action_type}"));
        };
        let granted = &ctx.execution.permissions;

        for requested in required_permissions {
            if let Err(denial) = capability::has_capability(granted, requested) {
                return self.deny(action_type, ctx, denial);
            }
        }

        let accesses = match handler.access(config) {
            Ok(accesses) => accesses,
            Err(e) => return ActionResult::failure(e.action_message()),
        };
        for access in &accesses {
            if let Err(denial) = self.authorize(granted, access) {
                return self.deny(action_type, ctx, denial);
            }
        }

        debug!(
            run_id = %ctx.execution.run_id,
            action_type,
            "dispatching action"
        );
        match handler.execute(ctx, config).await {
            Ok(result) => result,
            Err(e) if e.is_permission_denied() => ActionResult::denied(e.action_message()),
            Err(e) => ActionResult::failure(e.action_message()),
        }
    }

    fn authorize(&self, granted: &[String], access: &Access) -> Result<(), Denial> {
        match access {
            Access::Table(table) => capability::check_table_access(granted, table).map(drop),
            Access::EnvRead(key) => capability::check_env_access(granted, key).map(drop),
            Access::FileRead(path) => capability::check_file_read(granted, path).map(drop),
            Access::FileWrite(path) => {
                capability::check_file_write(granted, path, &self.sensitive).map(drop)
            }
        }
    }

    fn deny(&self, action_type: &str, ctx: &ActionContext<'_>, denial: Denial) -> ActionResult {
        warn!(
            run_id = %ctx.execution.run_id,
            installation_id = %ctx.execution.installation_id,
            action_type,
            requested = %denial.requested,
            "capability denied"
        );
        metrics::counter!("capstan_capability_denials_total").increment(1);
        ActionResult::denied(format!("Permission denied: {}", denial))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new(SensitivePaths::default())
    }
}

/// Reads a required, non-empty string field from an action config.
pub(crate) fn required_str<'v>(config: &'v Value, field: &str) -> Result<&'v str, CapstanError> {
    config
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CapstanError::Validation(format!("missing required field '{field}'")))
}

pub(crate) fn optional_str<'v>(config: &'v Value, field: &str) -> Option<&'v str> {
    config.get(field).and_then(Value::as_str)
}
