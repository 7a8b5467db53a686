// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security helpers for the Capstan skill engine.
//!
//! Provides secret redaction for audit entries and log output, and the
//! sensitive-path denylist enforced on staged file writes.

pub mod redact;
pub mod sensitive;

pub use redact::{REDACTED, RedactingWriter, redact, redact_json};
pub use sensitive::{SensitivePaths, is_sensitive_path};
