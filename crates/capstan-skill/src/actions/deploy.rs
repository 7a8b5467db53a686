// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deployment actions against the hosting provider.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::traits::deployment::{DeployTarget, DeploymentFile, DeploymentState};
use capstan_core::{ActionResult, CapstanError, DeploymentProvider};
use serde_json::{Value, json};
use tracing::info;

use crate::registry::{ActionContext, ActionHandler, optional_str, required_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOp {
    CreateProject,
    Deploy,
    SetEnv,
    AddDomain,
    DeleteProject,
}

impl DeployOp {
    pub const ALL: [Self; 5] = [
        Self::CreateProject,
        Self::Deploy,
        Self::SetEnv,
        Self::AddDomain,
        Self::DeleteProject,
    ];

    pub fn action_type(self) -> &'static str {
        match self {
            Self::CreateProject => "deploy:create-project",
            Self::Deploy => "deploy:deploy",
            Self::SetEnv => "deploy:set-env",
            Self::AddDomain => "deploy:add-domain",
            Self::DeleteProject => "deploy:delete-project",
        }
    }
}

/// Handler for the `deploy:*` action types.
pub struct DeployAction {
    op: DeployOp,
    provider: Arc<dyn DeploymentProvider>,
    poll_timeout: Duration,
}

impl DeployAction {
    pub fn new(op: DeployOp, provider: Arc<dyn DeploymentProvider>, poll_timeout: Duration) -> Self {
        Self {
            op,
            provider,
            poll_timeout,
        }
    }
}

fn project_id(config: &Value) -> Result<&str, CapstanError> {
    required_str(config, "projectId")
}

fn files_from_config(value: &Value) -> Result<Vec<DeploymentFile>, CapstanError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CapstanError::Validation(format!("invalid 'files': {e}")))
}

fn env_vars(config: &Value) -> Result<BTreeMap<String, String>, CapstanError> {
    let Some(Value::Object(vars)) = config.get("vars") else {
        return Err(CapstanError::Validation("'vars' must be an object".into()));
    };
    Ok(vars
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect())
}

#[async_trait]
impl ActionHandler for DeployAction {
    fn action_type(&self) -> &str {
        self.op.action_type()
    }

    fn description(&self) -> &str {
        match self.op {
            DeployOp::CreateProject => "Create a hosting project",
            DeployOp::Deploy => "Deploy files and wait for the deployment to be ready",
            DeployOp::SetEnv => "Set project environment variables",
            DeployOp::AddDomain => "Attach a domain to a project",
            DeployOp::DeleteProject => "Delete a hosting project",
        }
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionResult, CapstanError> {
        match self.op {
            DeployOp::CreateProject => {
                let name = required_str(config, "name")?;
                let project = self
                    .provider
                    .create_project(name, optional_str(config, "framework"))
                    .await?;
                info!(project_id = %project.id, "project created");
                let state = serde_json::to_value(&project)?;
                Ok(ActionResult::ok(state.clone())
                    .with_states(None, Some(state))
                    .reversible()
                    .with_target(project.id))
            }
            DeployOp::Deploy => {
                let project_id = project_id(config)?;
                let files = match config.get("files") {
                    Some(files) if !files.is_null() => files_from_config(files)?,
                    _ => ctx
                        .staging
                        .files()
                        .into_iter()
                        .map(|(path, content)| DeploymentFile { path, content })
                        .collect(),
                };
                if files.is_empty() {
                    return Err(CapstanError::handler("No files to deploy"));
                }
                let target = optional_str(config, "target")
                    .map(DeployTarget::from_str)
                    .transpose()
                    .map_err(|_| {
                        CapstanError::Validation("'target' must be production or preview".into())
                    })?
                    .unwrap_or_default();
                let file_count = files.len();
                let mut deployment = self.provider.deploy(project_id, files, target).await?;
                if config.get("wait").and_then(Value::as_bool).unwrap_or(true) {
                    deployment = self
                        .provider
                        .poll_until_ready(&deployment.id, self.poll_timeout)
                        .await?;
                }
                if deployment.state == DeploymentState::Error {
                    return Err(CapstanError::handler(format!(
                        "Deployment {} failed",
                        deployment.id
                    )));
                }
                info!(deployment_id = %deployment.id, file_count, "deployment finished");
                Ok(ActionResult::ok(json!({
                    "deploymentId": deployment.id,
                    "url": deployment.url,
                    "state": deployment.state,
                    "files": file_count,
                }))
                .with_states(None, Some(serde_json::to_value(&deployment)?))
                .with_target(project_id))
            }
            DeployOp::SetEnv => {
                let project_id = project_id(config)?;
                let vars = env_vars(config)?;
                self.provider.set_env_vars(project_id, &vars).await?;
                let keys: Vec<&String> = vars.keys().collect();
                Ok(ActionResult::ok(json!({"projectId": project_id, "keys": keys}))
                    .with_states(None, Some(json!({"projectId": project_id, "keys": keys})))
                    .with_target(project_id))
            }
            DeployOp::AddDomain => {
                let project_id = project_id(config)?;
                let domain = self
                    .provider
                    .add_domain(project_id, required_str(config, "domain")?)
                    .await?;
                let state = serde_json::to_value(&domain)?;
                Ok(ActionResult::ok(state.clone())
                    .with_states(None, Some(state))
                    .reversible()
                    .with_target(domain.name))
            }
            DeployOp::DeleteProject => {
                let project_id = project_id(config)?;
                let snapshot = self.provider.get_project(project_id).await?;
                self.provider.delete_project(project_id).await?;
                Ok(ActionResult::ok(json!({"projectId": project_id, "deleted": true}))
                    .with_states(snapshot.map(|p| json!(p)), None)
                    .with_target(project_id))
            }
        }
    }
}
