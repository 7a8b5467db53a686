// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill definitions and sandboxed action execution for Capstan.
//!
//! This crate validates skill manifests, implements the capability model
//! that gates every action, resolves `{{key}}` templates and `when`
//! conditions against run context, orders actions by their dependencies,
//! and provides the action registry with the built-in file, data-store,
//! deployment and generation handlers.

pub mod actions;
pub mod capability;
pub mod condition;
pub mod context;
pub mod graph;
pub mod manifest;
pub mod registry;
pub mod staging;
pub mod template;

pub use capability::{
    Capability, CapabilityCategory, Denial, RiskLevel, aggregate_risk, has_capability, matches,
};
pub use condition::evaluate_condition;
pub use context::ExecutionContext;
pub use graph::{GraphError, execution_order};
pub use manifest::{ManifestRejection, ParsedManifest, load_manifest, parse_manifest};
pub use registry::{Access, ActionContext, ActionHandler, ActionRegistry};
pub use staging::{StagingArea, StagingLease, StagingRegistry};
pub use template::{Layer, Scope, resolve_string, resolve_value};
