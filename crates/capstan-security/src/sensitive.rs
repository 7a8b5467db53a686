// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sensitive-path denylist for staged file writes.
//!
//! A write to a matching path is refused even when `files:write` is granted.

use std::sync::LazyLock;

use regex::Regex;

/// Name fragments that mark a path as sensitive (case-insensitive).
const SENSITIVE_FRAGMENTS: &[&str] = &[".env", "secret", "credentials", "private"];

/// Key and certificate file patterns.
static KEY_FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.pem|\.key|\.p12|\.pfx|\.jks|\.keystore)$|(^|/)id_(rsa|dsa|ecdsa|ed25519)(\.pub)?$")
        .unwrap()
});

/// Whether `path` matches the built-in denylist.
pub fn is_sensitive_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f)) || KEY_FILE_PATTERN.is_match(&lower)
}

/// The built-in denylist plus operator-configured fragments.
#[derive(Debug, Clone, Default)]
pub struct SensitivePaths {
    extra: Vec<String>,
}

impl SensitivePaths {
    pub fn new(extra: impl IntoIterator<Item = String>) -> Self {
        Self {
            extra: extra
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// The matching rule, if `path` is sensitive.
    pub fn check(&self, path: &str) -> Option<String> {
        if is_sensitive_path(path) {
            return Some(format!("'{path}' matches the sensitive file denylist"));
        }
        let lower = path.to_ascii_lowercase();
        self.extra
            .iter()
            .find(|f| lower.contains(f.as_str()))
            .map(|f| format!("'{path}' matches configured sensitive pattern '{f}'"))
    }
}
