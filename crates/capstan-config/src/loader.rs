// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-based loader.
//!
//! Merge order (later overrides earlier): compiled defaults,
//! `/etc/capstan/capstan.toml`, `~/.config/capstan/capstan.toml`,
//! `./capstan.toml`, then `CAPSTAN_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CapstanConfig;

/// Top-level sections that environment variables may address.
const SECTIONS: &[&str] = &["engine", "storage", "audit", "security", "generation"];

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/capstan/capstan.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("capstan/capstan.toml"));
    }
    paths.push(PathBuf::from("capstan.toml"));
    paths
}

pub fn load_config() -> Result<CapstanConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults plus a TOML string. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<CapstanConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CapstanConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Defaults, one explicit file, then environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<CapstanConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CapstanConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full layered figment, before extraction.
pub fn build_figment() -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(CapstanConfig::default()));
    for path in config_file_paths() {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Maps `CAPSTAN_<SECTION>_<KEY>` to `<section>.<key>`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// `CAPSTAN_STORAGE_DATABASE_PATH` maps to `storage.database_path`.
fn env_provider() -> Env {
    Env::prefixed("CAPSTAN_").map(|key| {
        let key_str = key.as_str();
        SECTIONS
            .iter()
            .find_map(|section| {
                key_str
                    .strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key_str.to_string())
            .into()
    })
}
