// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock hosting provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use capstan_core::traits::deployment::{
    DeployTarget, Deployment, DeploymentFile, DeploymentState, Domain, Project,
};
use capstan_core::{CapstanError, DeploymentProvider};

#[derive(Debug, Default)]
struct State {
    projects: HashMap<String, Project>,
    deployments: HashMap<String, (Deployment, Vec<DeploymentFile>)>,
    env: HashMap<String, BTreeMap<String, String>>,
    domains: HashMap<String, Vec<String>>,
}

/// A [`DeploymentProvider`] that keeps everything in memory.
///
/// Deployments become `ready` when polled, or `error` once
/// [`MockDeploymentProvider::fail_builds`] is set.
#[derive(Debug, Default)]
pub struct MockDeploymentProvider {
    state: Mutex<State>,
    next_id: AtomicUsize,
    failing_builds: AtomicBool,
}

impl MockDeploymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_builds(&self, fail: bool) {
        self.failing_builds.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        self.state().projects.get(id).cloned()
    }

    /// Paths uploaded by the latest deployment of `project_id`.
    pub fn deployed_files(&self, project_id: &str) -> Vec<String> {
        let state = self.state();
        let mut deployments: Vec<_> = state
            .deployments
            .values()
            .filter(|(d, _)| d.project_id == project_id)
            .collect();
        deployments.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        deployments
            .last()
            .map(|(_, files)| files.iter().map(|f| f.path.clone()).collect())
            .unwrap_or_default()
    }

    pub fn env_var(&self, project_id: &str, key: &str) -> Option<String> {
        self.state()
            .env
            .get(project_id)
            .and_then(|vars| vars.get(key).cloned())
    }

    pub fn domains(&self, project_id: &str) -> Vec<String> {
        self.state()
            .domains
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeploymentProvider for MockDeploymentProvider {
    async fn create_project(
        &self,
        name: &str,
        framework: Option<&str>,
    ) -> Result<Project, CapstanError> {
        let project = Project {
            id: self.id("prj"),
            name: name.to_string(),
            framework: framework.map(str::to_string),
        };
        self.state()
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, CapstanError> {
        Ok(self.project(id))
    }

    async fn delete_project(&self, id: &str) -> Result<(), CapstanError> {
        let mut state = self.state();
        state
            .projects
            .remove(id)
            .map(drop)
            .ok_or_else(|| CapstanError::handler(format!("project {id} not found")))?;
        state.env.remove(id);
        state.domains.remove(id);
        Ok(())
    }

    async fn deploy(
        &self,
        project_id: &str,
        files: Vec<DeploymentFile>,
        _target: DeployTarget,
    ) -> Result<Deployment, CapstanError> {
        let id = self.id("dpl");
        let deployment = Deployment {
            url: Some(format!("https://{id}.example.test")),
            id,
            project_id: project_id.to_string(),
            state: DeploymentState::Building,
        };
        self.state()
            .deployments
            .insert(deployment.id.clone(), (deployment.clone(), files));
        Ok(deployment)
    }

    async fn poll_until_ready(
        &self,
        deployment_id: &str,
        _timeout: Duration,
    ) -> Result<Deployment, CapstanError> {
        let failing = self.failing_builds.load(Ordering::SeqCst);
        let mut state = self.state();
        let (deployment, _) = state
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| CapstanError::handler(format!("deployment {deployment_id} not found")))?;
        deployment.state = if failing {
            DeploymentState::Error
        } else {
            DeploymentState::Ready
        };
        Ok(deployment.clone())
    }

    async fn set_env_vars(
        &self,
        project_id: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), CapstanError> {
        self.state()
            .env
            .entry(project_id.to_string())
            .or_default()
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn add_domain(&self, project_id: &str, domain: &str) -> Result<Domain, CapstanError> {
        let mut state = self.state();
        let domains = state.domains.entry(project_id.to_string()).or_default();
        if domains.iter().any(|d| d == domain) {
            return Err(CapstanError::handler(format!("domain {domain} already attached")));
        }
        domains.push(domain.to_string());
        Ok(Domain {
            name: domain.to_string(),
            project_id: project_id.to_string(),
            verified: false,
        })
    }

    async fn remove_domain(&self, project_id: &str, domain: &str) -> Result<(), CapstanError> {
        let mut state = self.state();
        let domains = state.domains.entry(project_id.to_string()).or_default();
        let before = domains.len();
        domains.retain(|d| d != domain);
        if domains.len() == before {
            return Err(CapstanError::handler(format!("domain {domain} not attached")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deploy_then_poll() {
        let provider = MockDeploymentProvider::new();
        let project = provider.create_project("site", Some("static")).await.unwrap();
        let files = vec![DeploymentFile {
            path: "index.html".into(),
            content: "hi".into(),
        }];
        let deployment = provider
            .deploy(&project.id, files, DeployTarget::Production)
            .await
            .unwrap();
        let ready = provider
            .poll_until_ready(&deployment.id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ready.state, DeploymentState::Ready);
        assert_eq!(provider.deployed_files(&project.id), vec!["index.html"]);

        provider.delete_project(&project.id).await.unwrap();
        assert!(provider.project(&project.id).is_none());
    }
}
