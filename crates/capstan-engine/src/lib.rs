// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill runtime for Capstan.
//!
//! - [`ExecutionEngine`] runs one installation's action graph, streaming
//!   [`ProgressEvent`](capstan_core::ProgressEvent)s and auditing every
//!   mutating action.
//! - [`RollbackEngine`] reverses audited actions one at a time, in batches,
//!   or across an installation's whole history.
//! - [`InstallationManager`] owns the installation lifecycle.

pub mod engine;
pub mod installation;
pub mod progress;
pub mod rollback;

pub use engine::{ExecutionEngine, ProgressStream, RunOutcome, RunRequest, SkippedAction};
pub use installation::{InstallOutcome, InstallRequest, InstallationManager};
pub use progress::{ListenerId, ProgressHub};
pub use rollback::{RollbackEngine, RollbackError, RollbackReport};
