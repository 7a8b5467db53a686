// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Capstan skill engine.
//!
//! This crate provides the error type, the domain types shared by every
//! other crate (manifests, installations, runs, audit entries, action
//! results, progress events), and the abstract provider contracts the
//! engine depends on: a relational data store, a deployment provider and a
//! generation provider. Concrete providers live outside the core.

pub mod error;
pub mod filter;
pub mod manifest;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::CapstanError;
pub use filter::{Filter, FilterOp, OrderBy, Predicate, Row};
pub use manifest::{
    DashboardConfig, FieldType, FileMapping, FileTransform, OnboardingField, RetryPolicy,
    Schedule, SkillAction, SkillManifest, WhenClause,
};
pub use traits::{DataStore, DeploymentProvider, GenerationProvider};
pub use types::{
    ActionResult, ActionStatus, AuditLogEntry, Environment, Installation, InstallationStatus,
    JsonMap, LogLevel, ProgressEvent, RunRecord, RunStatus, SkillRecord,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capstan_error_variants_construct() {
        let _config = CapstanError::Config("test".into());
        let _validation = CapstanError::Validation("test".into());
        let _denied = CapstanError::PermissionDenied("database:users".into());
        let _handler = CapstanError::handler("provider unavailable");
        let _storage = CapstanError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _not_found = CapstanError::NotFound {
            kind: "installation",
            id: "inst-1".into(),
        };
        let _state = CapstanError::InvalidState("paused".into());
        let _internal = CapstanError::Internal("test".into());
    }

    #[test]
    fn installation_status_round_trips_through_strings() {
        use std::str::FromStr;

        let variants = [
            InstallationStatus::Installing,
            InstallationStatus::Installed,
            InstallationStatus::Paused,
            InstallationStatus::Error,
            InstallationStatus::Uninstalling,
        ];
        for variant in &variants {
            let s = variant.to_string();
            assert_eq!(s, s.to_lowercase());
            assert_eq!(InstallationStatus::from_str(&s).unwrap(), *variant);
        }
    }

    #[test]
    fn run_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
