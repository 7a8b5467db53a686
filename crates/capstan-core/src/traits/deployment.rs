// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hosting provider contract used by the `deploy:*` actions.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CapstanError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub framework: Option<String>,
}

/// One file uploaded with a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFile {
    pub path: String,
    pub content: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    #[default]
    Production,
    Preview,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Queued,
    Building,
    Ready,
    Error,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub url: Option<String>,
    pub state: DeploymentState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub project_id: String,
    pub verified: bool,
}

/// A hosting provider that builds and serves projects.
#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    async fn create_project(
        &self,
        name: &str,
        framework: Option<&str>,
    ) -> Result<Project, CapstanError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, CapstanError>;

    async fn delete_project(&self, id: &str) -> Result<(), CapstanError>;

    async fn deploy(
        &self,
        project_id: &str,
        files: Vec<DeploymentFile>,
        target: DeployTarget,
    ) -> Result<Deployment, CapstanError>;

    /// Waits until the deployment leaves the queued/building states.
    async fn poll_until_ready(
        &self,
        deployment_id: &str,
        timeout: Duration,
    ) -> Result<Deployment, CapstanError>;

    async fn set_env_vars(
        &self,
        project_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), CapstanError>;

    async fn add_domain(&self, project_id: &str, domain: &str) -> Result<Domain, CapstanError>;

    async fn remove_domain(&self, project_id: &str, domain: &str) -> Result<(), CapstanError>;
}
