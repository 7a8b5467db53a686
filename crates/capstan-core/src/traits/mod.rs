// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider contracts the engine depends on.
//!
//! All providers use `#[async_trait]` for dynamic dispatch and are held as
//! `Arc<dyn ...>` by the action handlers.

pub mod data_store;
pub mod deployment;
pub mod generation;

pub use data_store::DataStore;
pub use deployment::{
    DeployTarget, Deployment, DeploymentFile, DeploymentProvider, DeploymentState, Domain,
    Project,
};
pub use generation::{
    GenerationProvider, GenerationRequest, GenerationResponse, OutputFormat, TokenUsage,
};
