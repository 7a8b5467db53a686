// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Capstan integration tests.
//!
//! Provides in-memory providers and a temp-database harness for fast,
//! deterministic tests without external services.
//!
//! # Components
//!
//! - [`MockDataStore`] - In-memory relational store with failure injection
//! - [`MockDeploymentProvider`] - Records projects, deployments, env vars and domains
//! - [`MockGenerationProvider`] - Returns pre-configured generation responses
//! - [`TestHarness`] - Temp SQLite database plus the mocks above

pub mod harness;
pub mod mock_data_store;
pub mod mock_deployment;
pub mod mock_generation;

pub use harness::TestHarness;
pub use mock_data_store::MockDataStore;
pub use mock_deployment::MockDeploymentProvider;
pub use mock_generation::MockGenerationProvider;
