// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only audit log of mutating skill actions.
//!
//! Every mutating action records its before and after state so it can be
//! reviewed and, when reversible, undone by the rollback engine. Secrets are
//! redacted before anything reaches storage.

pub mod logger;
pub mod redaction;

pub use logger::{AuditLogger, AuditPage, AuditQuery, NewAuditEntry};
