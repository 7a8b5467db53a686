// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations.
//!
//! Each command prints plain text to stdout; progress events are printed as
//! one JSON object per line so they can be piped into other tools.

use std::path::Path;
use std::sync::{Arc, RwLock};

use capstan_audit::AuditQuery;
use capstan_core::{CapstanError, Environment, JsonMap, ProgressEvent};
use capstan_engine::{InstallRequest, RunRequest};
use capstan_security::{RedactingWriter, redact};
use capstan_skill::capability::{aggregate_risk, risk_of};
use capstan_skill::load_manifest;
use capstan_storage::queries::runs;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runtime::Runtime;

/// Shared list of values scrubbed from log output.
pub type Secrets = Arc<RwLock<Vec<String>>>;

/// Parses `key=value` pairs. Values are read as JSON when they parse,
/// otherwise kept as strings.
pub fn parse_pairs(pairs: &[String]) -> Result<JsonMap, CapstanError> {
    let mut map = JsonMap::new();
    for pair in pairs {
        let (key, raw) = split_pair(pair)?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Parses `KEY=value` pairs as environment entries. Values stay strings.
pub fn parse_env(pairs: &[String]) -> Result<Environment, CapstanError> {
    let mut env = Environment::default();
    for pair in pairs {
        let (key, value) = split_pair(pair)?;
        env.insert(key, value);
    }
    Ok(env)
}

fn split_pair(pair: &str) -> Result<(&str, &str), CapstanError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(CapstanError::Validation(format!(
            "expected key=value, got '{pair}'"
        ))),
    }
}

fn read_manifest(path: &Path) -> Result<String, CapstanError> {
    std::fs::read_to_string(path)
        .map_err(|e| CapstanError::Validation(format!("failed to read {}: {e}", path.display())))
}

/// `capstan validate`: reports every error and warning of a manifest.
pub fn validate(path: &Path) -> Result<(), CapstanError> {
    match load_manifest(path) {
        Ok(parsed) => {
            for warning in &parsed.warnings {
                println!("  warning: {warning}");
            }
            println!(
                "{} {} is valid ({} actions)",
                parsed.manifest.slug,
                parsed.manifest.version,
                parsed.manifest.actions.len()
            );
            Ok(())
        }
        Err(rejection) => {
            for error in &rejection.errors {
                println!("  error: {error}");
            }
            for warning in &rejection.warnings {
                println!("  warning: {warning}");
            }
            Err(rejection.into())
        }
    }
}

/// `capstan risk`: lists declared permissions with their risk level.
pub fn risk(path: &Path) -> Result<(), CapstanError> {
    let parsed = load_manifest(path)?;
    let permissions = &parsed.manifest.permissions;
    for permission in permissions {
        println!("  {:<32} {}", permission, risk_of(permission));
    }
    println!("overall risk: {}", aggregate_risk(permissions));
    Ok(())
}

/// `capstan import`: stores a manifest without installing it.
pub async fn import(runtime: &Runtime, path: &Path) -> Result<(), CapstanError> {
    let raw = read_manifest(path)?;
    let (skill, warnings) = runtime.installations.import_skill(&raw).await?;
    for warning in &warnings {
        println!("  warning: {warning}");
    }
    println!("imported {} {} ({})", skill.slug, skill.version, skill.id);
    Ok(())
}

/// `capstan install`.
pub async fn install(
    runtime: &Runtime,
    path: &Path,
    request: InstallRequest,
) -> Result<(), CapstanError> {
    let raw = read_manifest(path)?;
    let outcome = runtime.installations.install(&raw, request).await?;
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    println!(
        "installed {} {} for {} as {}",
        outcome.skill.slug,
        outcome.skill.version,
        outcome.installation.tenant_id,
        outcome.installation.id
    );
    println!(
        "granted: {}",
        outcome.installation.permissions_granted.join(", ")
    );
    Ok(())
}

/// `capstan list`.
pub async fn list(runtime: &Runtime, tenant: Option<&str>) -> Result<(), CapstanError> {
    let installations = runtime.installations.list(tenant).await?;
    if installations.is_empty() {
        println!("no installations");
        return Ok(());
    }
    for installation in installations {
        let message = installation
            .status_message
            .map(|m| format!(" ({m})"))
            .unwrap_or_default();
        println!(
            "{}  {:<12} tenant={}{}",
            installation.id, installation.status, installation.tenant_id, message
        );
    }
    Ok(())
}

/// `capstan run`: streams progress until the run ends or Ctrl+C cancels it.
///
/// Environment values of the installation are added to the log redaction
/// list before the run starts.
pub async fn run(
    runtime: &Runtime,
    secrets: &Secrets,
    installation_id: &str,
    input: JsonMap,
) -> Result<(), CapstanError> {
    let installation = runtime.installations.get(installation_id).await?;
    for value in installation.environment.values() {
        RedactingWriter::<std::io::Stderr>::add_secret(secrets, value.to_string());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling after the current action");
            signal_token.cancel();
        }
    });

    let request = RunRequest::new(installation_id)
        .with_input(input)
        .with_trigger("cli");
    let mut events = Arc::clone(&runtime.engine).run_stream(request, cancel);

    let mut failure = None;
    while let Some(event) = events.next().await {
        let line = serde_json::to_string(&event).map_err(|e| CapstanError::Internal(e.to_string()))?;
        let scrubbed = {
            let values = secrets.read().map(|v| v.clone()).unwrap_or_default();
            redact(&line, &values)
        };
        println!("{scrubbed}");
        match event {
            ProgressEvent::Error { message, .. } => failure = Some(message),
            ProgressEvent::Complete { status, .. } => {
                info!(installation_id, status = %status, "run finished");
            }
            _ => {}
        }
    }

    match failure {
        Some(message) => Err(CapstanError::handler(message)),
        None => Ok(()),
    }
}

/// `capstan runs`.
pub async fn list_runs(
    runtime: &Runtime,
    installation_id: &str,
    limit: usize,
) -> Result<(), CapstanError> {
    let records = runs::list_runs(&runtime.db, installation_id, limit).await?;
    for record in records {
        println!(
            "{}  {:<10} trigger={} started={} events={}{}",
            record.id,
            record.status,
            record.trigger,
            record.started_at,
            record.events.len(),
            record
                .error
                .map(|e| format!(" error={e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// `capstan audit`: one page of the audit trail, newest first.
pub async fn audit(runtime: &Runtime, query: AuditQuery) -> Result<(), CapstanError> {
    let page = runtime.audit.query(&query).await?;
    for entry in &page.entries {
        let marker = match (entry.reversible, entry.reverted) {
            (_, true) => "reverted",
            (true, false) => "reversible",
            (false, false) => "-",
        };
        println!(
            "{}  {:<24} {:<10} target={} at={}",
            entry.id,
            entry.action,
            marker,
            entry.target.as_deref().unwrap_or("-"),
            entry.created_at
        );
    }
    println!(
        "page {} ({} of {} entries){}",
        page.page,
        page.entries.len(),
        page.total,
        if page.has_more() { ", more available" } else { "" }
    );
    Ok(())
}

/// `capstan revert`: reverses the given entries in order.
pub async fn revert(runtime: &Runtime, entry_ids: &[String]) -> Result<(), CapstanError> {
    let report = runtime.rollback.revert_batch(entry_ids).await;
    print_report(&report)
}

/// `capstan revert-all`: reverses every pending reversible entry of an
/// installation, newest first.
pub async fn revert_all(runtime: &Runtime, installation_id: &str) -> Result<(), CapstanError> {
    let report = runtime.rollback.revert_all(installation_id).await?;
    print_report(&report)
}

fn print_report(report: &capstan_engine::RollbackReport) -> Result<(), CapstanError> {
    for id in &report.reverted {
        println!("  reverted {id}");
    }
    for (id, message) in &report.failed {
        println!("  failed   {id}: {message}");
    }
    if report.is_clean() {
        Ok(())
    } else {
        Err(CapstanError::InvalidState(format!(
            "{} of {} entries could not be reverted",
            report.failed.len(),
            report.failed.len() + report.reverted.len()
        )))
    }
}

/// `capstan configure`: merges a config patch. `null` removes a key.
pub async fn configure(
    runtime: &Runtime,
    installation_id: &str,
    patch: JsonMap,
) -> Result<(), CapstanError> {
    let installation = runtime
        .installations
        .update_config(installation_id, patch)
        .await?;
    let rendered = serde_json::to_string_pretty(&installation.config)
        .map_err(|e| CapstanError::Internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// `capstan set-env`.
pub async fn set_env(
    runtime: &Runtime,
    installation_id: &str,
    key: &str,
    value: &str,
) -> Result<(), CapstanError> {
    runtime.installations.set_env(installation_id, key, value).await?;
    println!("set {key} on {installation_id}");
    Ok(())
}

/// `capstan pause`, `capstan resume` and `capstan uninstall`.
pub async fn lifecycle(
    runtime: &Runtime,
    installation_id: &str,
    change: Lifecycle,
) -> Result<(), CapstanError> {
    match change {
        Lifecycle::Pause => runtime.installations.pause(installation_id).await?,
        Lifecycle::Resume => runtime.installations.resume(installation_id).await?,
        Lifecycle::Uninstall => runtime.installations.uninstall(installation_id).await?,
    }
    println!("{change} {installation_id}");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Pause,
    Resume,
    Uninstall,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pause => "paused",
            Self::Resume => "resumed",
            Self::Uninstall => "uninstalled",
        })
    }
}
