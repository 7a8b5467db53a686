// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Capstan skill engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, typed queries for skills,
//! installations, runs and audit rows, and [`SqliteRecordStore`], a local
//! implementation of the relational store contract.

pub mod database;
pub mod migrations;
pub mod queries;
pub mod record_store;

pub use database::Database;
pub use queries::audit::AuditFilter;
pub use record_store::SqliteRecordStore;
