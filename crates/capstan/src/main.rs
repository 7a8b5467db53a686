// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capstan - a capability-sandboxed skill engine.
//!
//! This is the binary entry point: manifest checks, installation
//! management, runs and rollback from the command line.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod providers;
mod runtime;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use capstan_audit::AuditQuery;
use capstan_config::CapstanConfig;
use capstan_core::CapstanError;
use capstan_engine::InstallRequest;
use capstan_security::RedactingWriter;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{Lifecycle, Secrets};
use crate::runtime::Runtime;

/// Capstan - run skills inside the capabilities they were granted.
#[derive(Parser, Debug)]
#[command(name = "capstan", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a manifest and report every problem.
    Validate { manifest: PathBuf },
    /// Show the risk level of the permissions a manifest declares.
    Risk { manifest: PathBuf },
    /// Register a manifest without installing it.
    Import { manifest: PathBuf },
    /// Install a skill for a tenant.
    Install {
        manifest: PathBuf,
        #[arg(long)]
        tenant: String,
        /// Capability to grant. Repeatable; defaults to everything declared.
        #[arg(long = "grant")]
        grants: Vec<String>,
        /// Config entry as key=value.
        #[arg(long = "config")]
        config: Vec<String>,
        /// Environment entry as KEY=value.
        #[arg(long = "env")]
        env: Vec<String>,
        /// Onboarding answer as key=value.
        #[arg(long = "onboarding")]
        onboarding: Vec<String>,
    },
    /// List installations.
    List {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Run an installation and stream its progress.
    Run {
        installation: String,
        /// Input entry as key=value.
        #[arg(long = "input")]
        input: Vec<String>,
    },
    /// Show recent runs of an installation.
    Runs {
        installation: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the audit trail.
    Audit {
        #[arg(long)]
        installation: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        run: Option<String>,
        /// Only entries that can be reverted.
        #[arg(long)]
        reversible: bool,
        /// Only entries that have not been reverted yet.
        #[arg(long)]
        pending: bool,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Revert audit entries, in the order given.
    Revert {
        #[arg(required = true)]
        entries: Vec<String>,
    },
    /// Revert every pending change of an installation, newest first.
    RevertAll { installation: String },
    /// Merge config entries (key=value, `null` removes the key).
    Configure {
        installation: String,
        #[arg(required = true)]
        entries: Vec<String>,
    },
    /// Set one environment entry.
    SetEnv {
        installation: String,
        key: String,
        value: String,
    },
    /// Stop an installation from running.
    Pause { installation: String },
    /// Allow a paused installation to run again.
    Resume { installation: String },
    /// Remove an installation and its records.
    Uninstall { installation: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config_file {
        Some(path) => capstan_config::load_and_validate_path(path),
        None => capstan_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            capstan_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let secrets = init_tracing(&config.engine.log_level);

    if let Err(e) = dispatch(cli.command, &config, &secrets).await {
        eprintln!("capstan: {e}");
        std::process::exit(1);
    }
}

/// Installs the global subscriber. Log output passes through a
/// [`RedactingWriter`]; the returned list feeds it.
fn init_tracing(log_level: &str) -> Secrets {
    let secrets: Secrets = Arc::new(RwLock::new(Vec::new()));
    let writer_secrets = Arc::clone(&secrets);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("capstan={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(move || RedactingWriter::new(std::io::stderr(), Arc::clone(&writer_secrets)))
        .init();
    secrets
}

async fn dispatch(
    command: Commands,
    config: &CapstanConfig,
    secrets: &Secrets,
) -> Result<(), CapstanError> {
    // Manifest checks need no database.
    match &command {
        Commands::Validate { manifest } => return commands::validate(manifest),
        Commands::Risk { manifest } => return commands::risk(manifest),
        _ => {}
    }

    let runtime = Runtime::open(config).await?;
    match command {
        Commands::Validate { .. } | Commands::Risk { .. } => Ok(()),
        Commands::Import { manifest } => commands::import(&runtime, &manifest).await,
        Commands::Install {
            manifest,
            tenant,
            grants,
            config,
            env,
            onboarding,
        } => {
            let request = InstallRequest {
                tenant_id: tenant,
                permissions: (!grants.is_empty()).then_some(grants),
                config: commands::parse_pairs(&config)?,
                environment: commands::parse_env(&env)?,
                onboarding: commands::parse_pairs(&onboarding)?,
            };
            commands::install(&runtime, &manifest, request).await
        }
        Commands::List { tenant } => commands::list(&runtime, tenant.as_deref()).await,
        Commands::Run {
            installation,
            input,
        } => {
            let input = commands::parse_pairs(&input)?;
            commands::run(&runtime, secrets, &installation, input).await
        }
        Commands::Runs {
            installation,
            limit,
        } => commands::list_runs(&runtime, &installation, limit).await,
        Commands::Audit {
            installation,
            action,
            run,
            reversible,
            pending,
            page,
            page_size,
        } => {
            let query = AuditQuery {
                installation_id: installation,
                action,
                run_id: run,
                reversible_only: reversible,
                pending_only: pending,
                page,
                page_size,
            };
            commands::audit(&runtime, query).await
        }
        Commands::Revert { entries } => commands::revert(&runtime, &entries).await,
        Commands::RevertAll { installation } => {
            commands::revert_all(&runtime, &installation).await
        }
        Commands::Configure {
            installation,
            entries,
        } => {
            let patch = commands::parse_pairs(&entries)?;
            commands::configure(&runtime, &installation, patch).await
        }
        Commands::SetEnv {
            installation,
            key,
            value,
        } => commands::set_env(&runtime, &installation, &key, &value).await,
        Commands::Pause { installation } => {
            commands::lifecycle(&runtime, &installation, Lifecycle::Pause).await
        }
        Commands::Resume { installation } => {
            commands::lifecycle(&runtime, &installation, Lifecycle::Resume).await
        }
        Commands::Uninstall { installation } => {
            commands::lifecycle(&runtime, &installation, Lifecycle::Uninstall).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc answers epoch/stats queries.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn install_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "capstan",
            "install",
            "skill.json",
            "--tenant",
            "acme",
            "--grant",
            "database:leads",
            "--grant",
            "files:write:site/*",
            "--env",
            "API_KEY=abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                tenant,
                grants,
                env,
                ..
            } => {
                assert_eq!(tenant, "acme");
                assert_eq!(grants, vec!["database:leads", "files:write:site/*"]);
                assert_eq!(env, vec!["API_KEY=abc"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn revert_requires_an_entry() {
        assert!(Cli::try_parse_from(["capstan", "revert"]).is_err());
    }
}
