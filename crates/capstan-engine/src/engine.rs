// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution engine: one run of a skill's action graph.
//!
//! A run walks the actions in dependency order. Each action is gated by its
//! `dependsOn` list and its `when` condition, then dispatched through the
//! action registry. Successful mutating actions are appended to the audit
//! log. The first failure stops the run; nothing that already happened is
//! compensated.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capstan_audit::{AuditLogger, NewAuditEntry};
use capstan_config::model::EngineConfig;
use capstan_core::{
    ActionResult, ActionStatus, CapstanError, InstallationStatus, JsonMap, LogLevel,
    ProgressEvent, RunRecord, RunStatus, SkillAction,
};
use capstan_skill::{
    ActionContext, ActionRegistry, ExecutionContext, StagingRegistry, evaluate_condition,
    execution_order,
};
use capstan_storage::Database;
use capstan_storage::queries::{installations, runs, skills};
use futures::Stream;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::progress::{ProgressHub, RunEmitter};

/// Progress events of one run, ending with `complete` or `error`.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// What to run and why.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub installation_id: String,
    pub input: JsonMap,
    /// Free-form origin of the run, e.g. `manual` or `schedule`.
    pub trigger: String,
}

impl RunRequest {
    pub fn new(installation_id: impl Into<String>) -> Self {
        Self {
            installation_id: installation_id.into(),
            input: JsonMap::new(),
            trigger: "manual".into(),
        }
    }

    pub fn with_input(mut self, input: JsonMap) -> Self {
        self.input = input;
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = trigger.into();
        self
    }
}

/// An action that did not run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAction {
    pub action_id: String,
    pub reason: String,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// Action outputs keyed by action id and declared output name.
    pub output: JsonMap,
    pub error: Option<String>,
    /// Ids of actions that completed, in execution order.
    pub executed: Vec<String>,
    pub skipped: Vec<SkippedAction>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Bookkeeping of a run in progress.
struct RunState<'m> {
    run_id: String,
    installation_id: String,
    started: Instant,
    done: HashSet<&'m str>,
    executed: Vec<String>,
    skipped: Vec<SkippedAction>,
}

impl RunState<'_> {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn outcome(self, status: RunStatus, output: JsonMap, error: Option<String>) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            status,
            output,
            error,
            executed: self.executed,
            skipped: self.skipped,
        }
    }
}

/// Runs installed skills.
///
/// Cheap to share behind an `Arc`; concurrent runs are independent apart
/// from the database and the audit log.
pub struct ExecutionEngine {
    db: Database,
    registry: Arc<ActionRegistry>,
    audit: AuditLogger,
    staging: StagingRegistry,
    progress: ProgressHub,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        db: Database,
        registry: Arc<ActionRegistry>,
        audit: AuditLogger,
        staging: StagingRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            registry,
            audit,
            staging,
            progress: ProgressHub::new(),
            config,
        }
    }

    /// Listeners registered here see the events of every run.
    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn staging(&self) -> &StagingRegistry {
        &self.staging
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Runs to completion.
    ///
    /// Errors are returned only when the run could not start (unknown or
    /// non-runnable installation, broken action graph) or when storage
    /// fails. Action failures produce a `failed` outcome.
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, CapstanError> {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), checking `cancel` before each action.
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, CapstanError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.execute(run_id, request, None, cancel).await
    }

    /// Starts a run in the background and streams its progress.
    ///
    /// A run that cannot start yields a single `error` event.
    pub fn run_stream(
        self: Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let run_id = uuid::Uuid::new_v4().to_string();
        tokio::spawn(async move {
            let errors = tx.clone();
            if let Err(e) = self.execute(run_id.clone(), request, Some(tx), cancel).await {
                warn!(run_id = %run_id, error = %e, "streamed run did not finish");
                let _ = errors.send(ProgressEvent::Error {
                    run_id,
                    action_id: None,
                    message: e.to_string(),
                });
            }
        });
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }

    async fn execute(
        &self,
        run_id: String,
        request: RunRequest,
        sink: Option<mpsc::UnboundedSender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, CapstanError> {
        let installation = installations::get_installation(&self.db, &request.installation_id)
            .await?
            .ok_or_else(|| CapstanError::NotFound {
                kind: "installation",
                id: request.installation_id.clone(),
            })?;
        if !installation.status.is_runnable() {
            return Err(CapstanError::InvalidState(format!(
                "installation {} is {}",
                installation.id, installation.status
            )));
        }
        let skill = skills::get_skill(&self.db, &installation.skill_id)
            .await?
            .ok_or_else(|| CapstanError::NotFound {
                kind: "skill",
                id: installation.skill_id.clone(),
            })?;
        let manifest = Arc::new(skill.manifest);
        let order = execution_order(&manifest.actions)
            .map_err(|e| CapstanError::Validation(e.to_string()))?;

        runs::create_run(
            &self.db,
            &RunRecord {
                id: run_id.clone(),
                installation_id: installation.id.clone(),
                status: RunStatus::Pending,
                trigger: request.trigger.clone(),
                input: request.input.clone(),
                output: None,
                error: None,
                events: Vec::new(),
                started_at: chrono::Utc::now().to_rfc3339(),
                completed_at: None,
            },
        )
        .await?;
        runs::update_run_status(&self.db, &run_id, RunStatus::Running, None, None).await?;

        let emitter = RunEmitter::new(
            self.progress.clone(),
            self.db.clone(),
            run_id.clone(),
            sink,
        );
        let lease = self.staging.lease(&run_id, &installation.id);
        let mut ctx = ExecutionContext::new(
            run_id.clone(),
            &installation,
            Arc::clone(&manifest),
            request.input,
        );
        let mut state = RunState {
            run_id: run_id.clone(),
            installation_id: installation.id.clone(),
            started: Instant::now(),
            done: HashSet::new(),
            executed: Vec::new(),
            skipped: Vec::new(),
        };

        info!(
            run_id = %run_id,
            installation_id = %installation.id,
            skill = %manifest.slug,
            actions = order.len(),
            trigger = %request.trigger,
            "run started"
        );
        emitter
            .emit(ProgressEvent::Start {
                run_id: run_id.clone(),
                installation_id: installation.id.clone(),
                skill: manifest.slug.clone(),
                total_actions: order.len(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            })
            .await;

        let total = order.len();
        for (position, &index) in order.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(&emitter, state, ctx.variables).await;
            }
            let action = &manifest.actions[index];

            if let Some(reason) = skip_reason(action, &state.done, &ctx) {
                debug!(run_id = %run_id, action_id = %action.id, %reason, "action skipped");
                emitter
                    .emit(action_event(&run_id, action, ActionStatus::Skipped).with_reason(&reason))
                    .await;
                state.skipped.push(SkippedAction {
                    action_id: action.id.clone(),
                    reason,
                });
                continue;
            }

            emitter
                .emit(ProgressEvent::Step {
                    run_id: run_id.clone(),
                    index: position + 1,
                    total,
                    action_id: action.id.clone(),
                    action_type: action.action_type.clone(),
                })
                .await;
            emitter
                .emit(action_event(&run_id, action, ActionStatus::Running))
                .await;

            let config =
                self.registry
                    .prepare_config(&action.action_type, &action.config, &ctx.scope());
            let result = {
                let action_ctx = ActionContext {
                    execution: &ctx,
                    staging: lease.area(),
                };
                self.dispatch_with_retry(&emitter, action, &action_ctx, &config)
                    .await
            };

            if !result.success {
                let message = result
                    .error
                    .unwrap_or_else(|| format!("action '{}' failed", action.id));
                return self
                    .finish_failed(&emitter, state, ctx.variables, action, message)
                    .await;
            }

            let data = result.data.clone().unwrap_or(Value::Null);
            ctx.record_output(&action.id, action.output.as_deref(), data.clone());
            if let Err(e) = self.audit_result(&ctx, action, &result).await {
                let message = format!("failed to record audit entry: {e}");
                return self
                    .finish_failed(&emitter, state, ctx.variables, action, message)
                    .await;
            }

            debug!(run_id = %run_id, action_id = %action.id, "action completed");
            emitter
                .emit(action_event(&run_id, action, ActionStatus::Completed).with_data(data))
                .await;
            state.done.insert(action.id.as_str());
            state.executed.push(action.id.clone());
        }

        let output = ctx.variables;
        runs::update_run_status(
            &self.db,
            &run_id,
            RunStatus::Completed,
            Some(&Value::Object(output.clone())),
            None,
        )
        .await?;
        installations::transition_status(
            &self.db,
            &installation.id,
            &[InstallationStatus::Error],
            InstallationStatus::Installed,
        )
        .await?;
        metrics::counter!("capstan_runs_total", "status" => "completed").increment(1);
        info!(
            run_id = %run_id,
            executed = state.executed.len(),
            skipped = state.skipped.len(),
            "run completed"
        );
        emitter
            .emit(ProgressEvent::Complete {
                run_id: run_id.clone(),
                status: RunStatus::Completed,
                output: Value::Object(output.clone()),
                duration_ms: state.elapsed_ms(),
            })
            .await;
        drop(lease);
        Ok(state.outcome(RunStatus::Completed, output, None))
    }

    /// Dispatches `action`, re-trying failures its retry policy allows.
    ///
    /// Denials are final. The backoff doubles after every attempt.
    async fn dispatch_with_retry(
        &self,
        emitter: &RunEmitter,
        action: &SkillAction,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> ActionResult {
        let cap = self.config.max_retry_attempts.max(1);
        let attempts = action
            .retry
            .map_or(1, |policy| policy.max_attempts.clamp(1, cap));
        let base_ms = action
            .retry
            .map(|policy| policy.backoff_ms)
            .filter(|ms| *ms > 0)
            .unwrap_or(self.config.default_retry_backoff_ms);

        let mut attempt = 1;
        loop {
            let result = self
                .registry
                .execute(
                    &action.action_type,
                    ctx,
                    config,
                    &action.required_permissions,
                )
                .await;
            if result.success || result.is_permission_denied() || attempt >= attempts {
                return result;
            }
            let delay = Duration::from_millis(base_ms.saturating_mul(1 << (attempt - 1).min(16)));
            let reason = result.error.as_deref().unwrap_or("unknown error");
            warn!(
                run_id = %emitter.run_id(),
                action_id = %action.id,
                attempt,
                attempts,
                error = reason,
                "action failed, retrying"
            );
            emitter
                .emit(ProgressEvent::Log {
                    run_id: emitter.run_id().to_string(),
                    level: LogLevel::Warn,
                    message: format!(
                        "action '{}' failed (attempt {attempt}/{attempts}): {reason}; retrying in {}ms",
                        action.id,
                        delay.as_millis()
                    ),
                })
                .await;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Appends the audit entry for a successful mutating action.
    async fn audit_result(
        &self,
        ctx: &ExecutionContext,
        action: &SkillAction,
        result: &ActionResult,
    ) -> Result<(), CapstanError> {
        if !self.registry.is_mutating(&action.action_type) {
            return Ok(());
        }
        let mut metadata = result.metadata.clone();
        metadata.remove("target");
        metadata.insert("actionId".into(), json!(action.id));
        let entry = NewAuditEntry {
            action: action.action_type.clone(),
            target: result.target().map(str::to_string),
            before_state: result.before_state.clone(),
            after_state: result.after_state.clone(),
            reversible: result.reversible,
            run_id: Some(ctx.run_id.clone()),
            metadata: Some(Value::Object(metadata)),
        };
        self.audit
            .log(&ctx.installation_id, entry, &ctx.secret_values())
            .await?;
        Ok(())
    }

    async fn finish_failed(
        &self,
        emitter: &RunEmitter,
        state: RunState<'_>,
        output: JsonMap,
        action: &SkillAction,
        message: String,
    ) -> Result<RunOutcome, CapstanError> {
        let run_id = state.run_id.clone();
        warn!(
            run_id = %run_id,
            action_id = %action.id,
            action_type = %action.action_type,
            error = %message,
            "run failed"
        );
        emitter
            .emit(action_event(&run_id, action, ActionStatus::Failed).with_error(&message))
            .await;
        emitter
            .emit(ProgressEvent::Error {
                run_id: run_id.clone(),
                action_id: Some(action.id.clone()),
                message: message.clone(),
            })
            .await;
        runs::update_run_status(&self.db, &run_id, RunStatus::Failed, None, Some(&message))
            .await?;
        installations::update_status(
            &self.db,
            &state.installation_id,
            InstallationStatus::Error,
            Some(&message),
        )
        .await?;
        metrics::counter!("capstan_runs_total", "status" => "failed").increment(1);
        Ok(state.outcome(RunStatus::Failed, output, Some(message)))
    }

    async fn finish_cancelled(
        &self,
        emitter: &RunEmitter,
        state: RunState<'_>,
        output: JsonMap,
    ) -> Result<RunOutcome, CapstanError> {
        let run_id = state.run_id.clone();
        info!(
            run_id = %run_id,
            executed = state.executed.len(),
            "run cancelled"
        );
        runs::update_run_status(
            &self.db,
            &run_id,
            RunStatus::Cancelled,
            Some(&Value::Object(output.clone())),
            None,
        )
        .await?;
        metrics::counter!("capstan_runs_total", "status" => "cancelled").increment(1);
        emitter
            .emit(ProgressEvent::Complete {
                run_id: run_id.clone(),
                status: RunStatus::Cancelled,
                output: Value::Object(output.clone()),
                duration_ms: state.elapsed_ms(),
            })
            .await;
        Ok(state.outcome(RunStatus::Cancelled, output, None))
    }
}

/// Why `action` must not run, if it must not.
fn skip_reason(action: &SkillAction, done: &HashSet<&str>, ctx: &ExecutionContext) -> Option<String> {
    if let Some(dependency) = action
        .depends_on
        .iter()
        .find(|dep| !done.contains(dep.as_str()))
    {
        return Some(format!("dependency '{dependency}' did not run"));
    }
    if let Some(when) = &action.when
        && !evaluate_condition(&when.condition, &ctx.scope())
    {
        return Some("condition not met".into());
    }
    None
}

fn action_event(run_id: &str, action: &SkillAction, status: ActionStatus) -> ProgressEvent {
    ProgressEvent::Action {
        run_id: run_id.to_string(),
        action_id: action.id.clone(),
        action_type: action.action_type.clone(),
        status,
        data: None,
        error: None,
        reason: None,
    }
}

trait ActionEventExt {
    fn with_data(self, value: Value) -> Self;
    fn with_error(self, message: &str) -> Self;
    fn with_reason(self, reason: &str) -> Self;
}

impl ActionEventExt for ProgressEvent {
    fn with_data(mut self, value: Value) -> Self {
        if let ProgressEvent::Action { data, .. } = &mut self {
            *data = Some(value);
        }
        self
    }

    fn with_error(mut self, message: &str) -> Self {
        if let ProgressEvent::Action { error, .. } = &mut self {
            *error = Some(message.to_string());
        }
        self
    }

    fn with_reason(mut self, text: &str) -> Self {
        if let ProgressEvent::Action { reason, .. } = &mut self {
            *reason = Some(text.to_string());
        }
        self
    }
}
