// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common domain types shared across the Capstan crates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// A JSON object. Used for configuration, onboarding answers, and rows.
pub type JsonMap = serde_json::Map<String, Value>;

/// Lifecycle status of an installation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Installing,
    Installed,
    Paused,
    Error,
    Uninstalling,
}

impl InstallationStatus {
    /// Whether a run may be started in this state.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Installed | Self::Error)
    }
}

/// Status of a single skill run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Environment entries of an installation.
///
/// Values are secrets; the `Debug` form lists keys only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(pub BTreeMap<String, String>);

impl Environment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts into a JSON object for template resolution.
    pub fn to_json(&self) -> JsonMap {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl From<BTreeMap<String, String>> for Environment {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// A registered skill: its identity plus the validated manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub manifest: crate::manifest::SkillManifest,
    pub created_at: String,
    pub updated_at: String,
}

/// A tenant's instance of a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub tenant_id: String,
    pub skill_id: String,
    pub status: InstallationStatus,
    pub status_message: Option<String>,
    pub permissions_granted: Vec<String>,
    pub config: JsonMap,
    pub environment: Environment,
    /// Onboarding answers, keyed by field key.
    pub onboarding: JsonMap,
    pub created_at: String,
    pub updated_at: String,
}

/// Persistent record of one skill run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub installation_id: String,
    pub status: RunStatus,
    pub trigger: String,
    pub input: JsonMap,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Progress events mirrored into the record, oldest first.
    pub events: Vec<Value>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// One immutable record of a mutating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub installation_id: String,
    pub run_id: Option<String>,
    /// Action type, e.g. `file:create` or `rollback:db:insert`.
    pub action: String,
    pub target: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub reversible: bool,
    pub reverted: bool,
    pub reverted_at: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
}

/// Outcome of one action handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub reversible: bool,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl ActionResult {
    /// A successful, non-reversible result carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            before_state: None,
            after_state: None,
            reversible: false,
            metadata: JsonMap::new(),
        }
    }

    /// A failed, non-reversible result.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            before_state: None,
            after_state: None,
            reversible: false,
            metadata: JsonMap::new(),
        }
    }

    /// A failed result produced by a capability check.
    pub fn denied(message: impl Into<String>) -> Self {
        Self::failure(message).with_metadata("permissionDenied", Value::Bool(true))
    }

    pub fn with_states(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.before_state = before;
        self.after_state = after;
        self
    }

    pub fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }

    pub fn with_target(self, target: impl Into<String>) -> Self {
        self.with_metadata("target", Value::String(target.into()))
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// The affected resource recorded by the handler, if any.
    pub fn target(&self) -> Option<&str> {
        self.metadata.get("target").and_then(Value::as_str)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.metadata
            .get("permissionDenied")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Per-action status carried by [`ProgressEvent::Action`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Severity of a [`ProgressEvent::Log`] message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A progress event emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        run_id: String,
        installation_id: String,
        skill: String,
        total_actions: usize,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    Step {
        run_id: String,
        index: usize,
        total: usize,
        action_id: String,
        action_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Action {
        run_id: String,
        action_id: String,
        action_type: String,
        status: ActionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        run_id: String,
        level: LogLevel,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        run_id: String,
        status: RunStatus,
        output: Value,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        action_id: Option<String>,
        message: String,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Start { run_id, .. }
            | Self::Step { run_id, .. }
            | Self::Action { run_id, .. }
            | Self::Log { run_id, .. }
            | Self::Complete { run_id, .. }
            | Self::Error { run_id, .. } => run_id,
        }
    }

    /// Short lowercase name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Step { .. } => "step",
            Self::Action { .. } => "action",
            Self::Log { .. } => "log",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn environment_debug_hides_values() {
        let mut env = Environment::default();
        env.insert("API_KEY", "sk-very-secret");
        let debug = format!("{env:?}");
        assert!(debug.contains("API_KEY"));
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn action_result_target_lives_in_metadata() {
        let result = ActionResult::ok(json!({"path": "a.txt"}))
            .with_target("a.txt")
            .reversible();
        assert_eq!(result.target(), Some("a.txt"));
        assert!(result.reversible);
        assert!(!result.is_permission_denied());
    }

    #[test]
    fn denied_results_are_flagged() {
        let result = ActionResult::denied("permission denied: table users");
        assert!(!result.success);
        assert!(result.is_permission_denied());
    }

    #[test]
    fn progress_event_tags_and_camel_cases() {
        let event = ProgressEvent::Action {
            run_id: "r1".into(),
            action_id: "a1".into(),
            action_type: "file:create".into(),
            status: ActionStatus::Skipped,
            data: None,
            error: None,
            reason: Some("condition".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["actionId"], "a1");
        assert_eq!(value["status"], "skipped");
        assert!(value.get("error").is_none());
        assert_eq!(event.kind(), "action");
        assert_eq!(event.run_id(), "r1");
    }

    #[test]
    fn runnable_states() {
        assert!(InstallationStatus::Installed.is_runnable());
        assert!(InstallationStatus::Error.is_runnable());
        assert!(!InstallationStatus::Paused.is_runnable());
        assert!(!InstallationStatus::Uninstalling.is_runnable());
    }
}
