// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation.

use crate::diagnostic::ConfigError;
use crate::model::CapstanConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Checks semantic constraints serde cannot express.
///
/// Collects every violation instead of stopping at the first.
pub fn validate_config(config: &CapstanConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if !LOG_LEVELS.contains(&config.engine.log_level.as_str()) {
        fail(format!(
            "engine.log_level `{}` must be one of {}",
            config.engine.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.engine.max_retry_attempts < 1 {
        fail("engine.max_retry_attempts must be at least 1".to_string());
    }

    if config.engine.deploy_poll_timeout_secs == 0 {
        fail("engine.deploy_poll_timeout_secs must be greater than 0".to_string());
    }

    if config.audit.default_page_size == 0 {
        fail("audit.default_page_size must be greater than 0".to_string());
    }
    if config.audit.max_page_size == 0 {
        fail("audit.max_page_size must be greater than 0".to_string());
    }
    if config.audit.default_page_size > config.audit.max_page_size {
        fail(format!(
            "audit.default_page_size ({}) must not exceed audit.max_page_size ({})",
            config.audit.default_page_size, config.audit.max_page_size
        ));
    }

    let temperature = config.generation.default_temperature;
    if !(0.0..=2.0).contains(&temperature) {
        fail(format!(
            "generation.default_temperature must be within [0, 2], got {temperature}"
        ));
    }

    if config.generation.default_max_tokens == 0 {
        fail("generation.default_max_tokens must be greater than 0".to_string());
    }

    if config
        .security
        .extra_sensitive_paths
        .iter()
        .any(|p| p.trim().is_empty())
    {
        fail("security.extra_sensitive_paths must not contain empty entries".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
