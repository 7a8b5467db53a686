// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-run execution context.

use std::sync::Arc;

use capstan_core::{Environment, Installation, JsonMap, SkillManifest};
use serde_json::Value;

use crate::template::{Layer, Scope};

/// Everything an action can see while a run executes.
///
/// Built once at run start. Only `variables` changes afterwards, as action
/// outputs accumulate.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub installation_id: String,
    pub tenant_id: String,
    pub manifest: Arc<SkillManifest>,
    pub permissions: Vec<String>,
    pub config: JsonMap,
    pub environment: Environment,
    pub onboarding: JsonMap,
    pub input: JsonMap,
    pub variables: JsonMap,
    env_layer: JsonMap,
}

impl ExecutionContext {
    /// Snapshots an installation for one run.
    ///
    /// Onboarding defaults from the manifest fill keys the installation never
    /// answered.
    pub fn new(
        run_id: impl Into<String>,
        installation: &Installation,
        manifest: Arc<SkillManifest>,
        input: JsonMap,
    ) -> Self {
        let mut onboarding = installation.onboarding.clone();
        for field in &manifest.onboarding {
            if let Some(default) = &field.default
                && !onboarding.contains_key(&field.key)
            {
                onboarding.insert(field.key.clone(), default.clone());
            }
        }
        Self {
            run_id: run_id.into(),
            installation_id: installation.id.clone(),
            tenant_id: installation.tenant_id.clone(),
            permissions: installation.permissions_granted.clone(),
            config: installation.config.clone(),
            env_layer: installation.environment.to_json(),
            environment: installation.environment.clone(),
            onboarding,
            input,
            variables: JsonMap::new(),
            manifest,
        }
    }

    /// Lookup layers in precedence order.
    pub fn scope(&self) -> Scope<'_> {
        Scope::new()
            .push(Layer::Variables, &self.variables)
            .push(Layer::Input, &self.input)
            .push(Layer::Onboarding, &self.onboarding)
            .push(Layer::Config, &self.config)
            .push(Layer::Environment, &self.env_layer)
    }

    /// Stores an action's data under its id and its declared output name.
    pub fn record_output(&mut self, action_id: &str, output: Option<&str>, data: Value) {
        if let Some(name) = output
            && name != action_id
        {
            self.variables.insert(name.to_string(), data.clone());
        }
        self.variables.insert(action_id.to_string(), data);
    }

    /// Environment values that must never reach logs or audit rows.
    pub fn secret_values(&self) -> Vec<String> {
        self.environment
            .values()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::InstallationStatus;
    use serde_json::json;

    fn manifest() -> SkillManifest {
        serde_json::from_value(json!({
            "name": "Demo",
            "slug": "demo",
            "version": "1.0.0",
            "onboarding": [
                {"key": "company", "label": "Company", "type": "text"},
                {"key": "tone", "label": "Tone", "type": "select", "options": ["calm", "loud"], "default": "calm"}
            ]
        }))
        .unwrap()
    }

    fn installation() -> Installation {
        let mut environment = Environment::default();
        environment.insert("API_KEY", "sk-live-123");
        Installation {
            id: "inst-1".into(),
            tenant_id: "tenant-1".into(),
            skill_id: "skill-1".into(),
            status: InstallationStatus::Installed,
            status_message: None,
            permissions_granted: vec!["database:leads".into()],
            config: json!({"region": "eu"}).as_object().cloned().unwrap(),
            environment,
            onboarding: json!({"company": "Acme"}).as_object().cloned().unwrap(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn scope_covers_every_layer() {
        let ctx = ExecutionContext::new("run-1", &installation(), Arc::new(manifest()), JsonMap::new());
        let scope = ctx.scope();
        assert_eq!(scope.lookup("company"), Some(&json!("Acme")));
        assert_eq!(scope.lookup("tone"), Some(&json!("calm")));
        assert_eq!(scope.lookup("region"), Some(&json!("eu")));
        assert_eq!(scope.lookup("API_KEY"), Some(&json!("sk-live-123")));
        assert_eq!(ctx.secret_values(), vec!["sk-live-123".to_string()]);
    }

    #[test]
    fn outputs_are_visible_under_id_and_alias() {
        let mut ctx =
            ExecutionContext::new("run-1", &installation(), Arc::new(manifest()), JsonMap::new());
        ctx.record_output("fetch", Some("lead"), json!({"id": 1}));
        let scope = ctx.scope();
        assert_eq!(scope.lookup("fetch.id"), Some(&json!(1)));
        assert_eq!(scope.lookup("lead.id"), Some(&json!(1)));
    }
}
