// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Placeholder providers for the CLI.
//!
//! The binary ships no hosting or generation client. Actions that need one
//! fail with a handler error naming the missing provider.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::traits::deployment::{DeployTarget, Deployment, DeploymentFile, Domain, Project};
use capstan_core::traits::generation::{GenerationRequest, GenerationResponse};
use capstan_core::{CapstanError, DeploymentProvider, GenerationProvider};

fn missing(kind: &str) -> CapstanError {
    CapstanError::handler(format!("no {kind} provider is configured"))
}

/// Deployment provider used when none is configured.
pub struct UnconfiguredDeployments;

#[async_trait]
impl DeploymentProvider for UnconfiguredDeployments {
    async fn create_project(
        &self,
        _name: &str,
        _framework: Option<&str>,
    ) -> Result<Project, CapstanError> {
        Err(missing("deployment"))
    }

    async fn get_project(&self, _id: &str) -> Result<Option<Project>, CapstanError> {
        Err(missing("deployment"))
    }

    async fn delete_project(&self, _id: &str) -> Result<(), CapstanError> {
        Err(missing("deployment"))
    }

    async fn deploy(
        &self,
        _project_id: &str,
        _files: Vec<DeploymentFile>,
        _target: DeployTarget,
    ) -> Result<Deployment, CapstanError> {
        Err(missing("deployment"))
    }

    async fn poll_until_ready(
        &self,
        _deployment_id: &str,
        _timeout: Duration,
    ) -> Result<Deployment, CapstanError> {
        Err(missing("deployment"))
    }

    async fn set_env_vars(
        &self,
        _project_id: &str,
        _vars: &BTreeMap<String, String>,
    ) -> Result<(), CapstanError> {
        Err(missing("deployment"))
    }

    async fn add_domain(&self, _project_id: &str, _domain: &str) -> Result<Domain, CapstanError> {
        Err(missing("deployment"))
    }

    async fn remove_domain(&self, _project_id: &str, _domain: &str) -> Result<(), CapstanError> {
        Err(missing("deployment"))
    }
}

/// Generation provider used when none is configured.
pub struct UnconfiguredGeneration;

#[async_trait]
impl GenerationProvider for UnconfiguredGeneration {
    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, CapstanError> {
        Err(missing("generation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_names_the_missing_provider() {
        let err = UnconfiguredDeployments
            .create_project("site", None)
            .await
            .unwrap_err();
        assert_eq!(err.action_message(), "no deployment provider is configured");

        let err = UnconfiguredGeneration
            .generate(GenerationRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                max_tokens: None,
                temperature: None,
                output_format: Default::default(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.action_message(), "no generation provider is configured");
    }
}
