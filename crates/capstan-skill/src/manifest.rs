// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill manifest parsing and validation.
//!
//! A manifest is a JSON document. Validation runs over the raw document and
//! collects every problem before giving up, so an author sees all errors at
//! once. A manifest with any error is rejected whole: there is no partially
//! valid result.

use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use capstan_core::{CapstanError, FieldType, FileTransform, SkillAction, SkillManifest};
use croner::Cron;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::actions::builtin_action_types;
use crate::capability::{self, Capability};
use crate::condition::parse_condition;
use crate::graph::execution_order;

static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

/// Lifecycle hooks the engine knows about. Others are kept but warned about.
pub const KNOWN_HOOKS: &[&str] = &["onInstall", "onUninstall", "onUpdate", "onEnable", "onDisable"];

/// A manifest that passed validation, with any non-fatal findings.
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub manifest: SkillManifest,
    pub warnings: Vec<String>,
}

/// Every reason a manifest was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid skill manifest: {}", .errors.join("; "))]
pub struct ManifestRejection {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl From<ManifestRejection> for CapstanError {
    fn from(rejection: ManifestRejection) -> Self {
        CapstanError::Validation(rejection.to_string())
    }
}

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Report {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn reject(self) -> ManifestRejection {
        ManifestRejection {
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Reads and validates a manifest file.
pub fn load_manifest(path: &Path) -> Result<ParsedManifest, ManifestRejection> {
    let raw = std::fs::read_to_string(path).map_err(|e| ManifestRejection {
        errors: vec![format!("failed to read {}: {e}", path.display())],
        warnings: Vec::new(),
    })?;
    parse_manifest(&raw)
}

/// Parses and validates a manifest document.
pub fn parse_manifest(raw: &str) -> Result<ParsedManifest, ManifestRejection> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ManifestRejection {
        errors: vec![format!("manifest is not valid JSON: {e}")],
        warnings: Vec::new(),
    })?;
    parse_manifest_value(&value)
}

/// Validates an already-decoded manifest document.
pub fn parse_manifest_value(value: &Value) -> Result<ParsedManifest, ManifestRejection> {
    let mut report = Report::default();
    let Some(doc) = value.as_object() else {
        report.error("manifest must be a JSON object");
        return Err(report.reject());
    };

    check_identity(doc, &mut report);
    check_permissions(doc, &mut report);
    check_onboarding(doc, &mut report);
    check_dashboard(doc, &mut report);
    check_hooks(doc, &mut report);
    check_schedules(doc, &mut report);
    check_files(doc, &mut report);
    check_actions(doc, &mut report);

    if !report.errors.is_empty() {
        return Err(report.reject());
    }
    match serde_json::from_value::<SkillManifest>(value.clone()) {
        Ok(manifest) => Ok(ParsedManifest {
            manifest,
            warnings: report.warnings,
        }),
        Err(e) => {
            report.error(format!("manifest does not match the expected shape: {e}"));
            Err(report.reject())
        }
    }
}

fn non_empty_str<'v>(doc: &'v Map<String, Value>, field: &str) -> Option<&'v str> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// The array at `field`, reporting a type error. Absent means empty.
fn array<'v>(doc: &'v Map<String, Value>, field: &str, report: &mut Report) -> &'v [Value] {
    match doc.get(field) {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            report.error(format!("'{field}' must be an array"));
            &[]
        }
    }
}

fn check_identity(doc: &Map<String, Value>, report: &mut Report) {
    if non_empty_str(doc, "name").is_none() {
        report.error("'name' is required");
    }
    match non_empty_str(doc, "slug") {
        None => report.error("'slug' is required"),
        Some(slug) if !SLUG.is_match(slug) => report.error(format!(
            "slug '{slug}' must contain only lowercase letters, digits and hyphens"
        )),
        Some(_) => {}
    }
    match non_empty_str(doc, "version") {
        None => report.error("'version' is required"),
        Some(version) if semver::Version::parse(version).is_err() => report.warn(format!(
            "version '{version}' is not a semantic version"
        )),
        Some(_) => {}
    }
}

fn check_capability(text: &str, context: &str, report: &mut Report) {
    if let Err(e) = Capability::from_str(text) {
        report.error(format!("{context}: {e}"));
    }
}

fn check_permissions(doc: &Map<String, Value>, report: &mut Report) {
    for (i, item) in array(doc, "permissions", report).iter().enumerate() {
        match item.as_str() {
            Some(text) => check_capability(text, &format!("permissions[{i}]"), report),
            None => report.error(format!("permissions[{i}] must be a string")),
        }
    }
}

fn check_onboarding(doc: &Map<String, Value>, report: &mut Report) {
    let mut seen = Vec::new();
    for (i, field) in array(doc, "onboarding", report).iter().enumerate() {
        let Some(field) = field.as_object() else {
            report.error(format!("onboarding[{i}] must be an object"));
            continue;
        };
        let label = match non_empty_str(field, "key") {
            Some(key) => {
                if seen.contains(&key) {
                    report.error(format!("duplicate onboarding key '{key}'"));
                }
                seen.push(key);
                format!("onboarding field '{key}'")
            }
            None => {
                report.error(format!("onboarding[{i}] requires a 'key'"));
                format!("onboarding[{i}]")
            }
        };
        if non_empty_str(field, "label").is_none() {
            report.error(format!("{label} requires a 'label'"));
        }
        let field_type = field.get("type").and_then(Value::as_str);
        match field_type.map(FieldType::from_str) {
            None => report.error(format!("{label} requires a 'type'")),
            Some(Err(_)) => report.error(format!(
                "{label} has unknown type '{}'",
                field_type.unwrap_or_default()
            )),
            Some(Ok(FieldType::Select)) => {
                let has_options = field
                    .get("options")
                    .and_then(Value::as_array)
                    .is_some_and(|o| !o.is_empty() && o.iter().all(Value::is_string));
                if !has_options {
                    report.error(format!("{label} is a select and needs non-empty string options"));
                }
            }
            Some(Ok(_)) => {}
        }
    }
}

fn check_dashboard(doc: &Map<String, Value>, report: &mut Report) {
    match doc.get("dashboard") {
        None | Some(Value::Null) => {}
        Some(Value::Object(dashboard)) => {
            if non_empty_str(dashboard, "route").is_none() {
                report.error("dashboard requires a 'route'");
            }
        }
        Some(_) => report.error("'dashboard' must be an object"),
    }
}

fn check_hooks(doc: &Map<String, Value>, report: &mut Report) {
    match doc.get("hooks") {
        None | Some(Value::Null) => {}
        Some(Value::Object(hooks)) => {
            for name in hooks.keys() {
                if !KNOWN_HOOKS.contains(&name.as_str()) {
                    report.warn(format!("unknown hook '{name}' will be ignored"));
                }
            }
        }
        Some(_) => report.error("'hooks' must be an object"),
    }
}

fn check_schedules(doc: &Map<String, Value>, report: &mut Report) {
    for (i, schedule) in array(doc, "schedules", report).iter().enumerate() {
        match schedule.get("cron").and_then(Value::as_str) {
            Some(expr) => {
                if let Err(e) = Cron::new(expr).with_seconds_optional().parse() {
                    report.error(format!("schedules[{i}]: invalid cron '{expr}': {e}"));
                }
            }
            None => report.error(format!("schedules[{i}] requires a 'cron' expression")),
        }
    }
}

fn check_files(doc: &Map<String, Value>, report: &mut Report) {
    for (i, mapping) in array(doc, "files", report).iter().enumerate() {
        let Some(mapping) = mapping.as_object() else {
            report.error(format!("files[{i}] must be an object"));
            continue;
        };
        for field in ["source", "destination"] {
            if non_empty_str(mapping, field).is_none() {
                report.error(format!("files[{i}] requires a non-empty '{field}'"));
            }
        }
        let transform = mapping.get("transform").and_then(Value::as_str);
        if transform.and_then(|t| FileTransform::from_str(t).ok()).is_none() {
            report.error(format!(
                "files[{i}] transform must be one of copy, merge, template"
            ));
        }
    }
}

fn check_actions(doc: &Map<String, Value>, report: &mut Report) {
    let declared: Vec<String> = array(doc, "permissions", &mut Report::default())
        .iter()
        .filter_map(|p| p.as_str().map(str::to_string))
        .collect();
    let mut actions = Vec::new();

    for (i, raw) in array(doc, "actions", report).iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            report.error(format!("actions[{i}] must be an object"));
            continue;
        };
        let id = non_empty_str(obj, "id").unwrap_or_default();
        let label = if id.is_empty() {
            report.error(format!("actions[{i}] requires an 'id'"));
            format!("actions[{i}]")
        } else {
            format!("action '{id}'")
        };
        match non_empty_str(obj, "type") {
            None => report.error(format!("{label} requires a 'type'")),
            Some(t) if !builtin_action_types().any(|b| b == t) => report.warn(format!(
                "{label} uses action type '{t}' which has no built-in handler"
            )),
            Some(_) => {}
        }
        if let Some(config) = obj.get("config")
            && !config.is_object()
        {
            report.error(format!("{label} config must be an object"));
        }
        if let Some(when) = obj.get("when") {
            match when.get("condition").and_then(Value::as_str) {
                Some(cond) => {
                    if let Err(e) = parse_condition(cond) {
                        report.warn(format!(
                            "{label} condition never holds ({e}); the action will always be skipped"
                        ));
                    }
                }
                None => report.error(format!("{label} 'when' requires a 'condition' string")),
            }
        }
        if let Some(retry) = obj.get("retry") {
            let attempts = retry.get("maxAttempts").and_then(Value::as_u64);
            if !attempts.is_some_and(|n| n >= 1) {
                report.error(format!("{label} retry.maxAttempts must be at least 1"));
            }
        }

        match serde_json::from_value::<SkillAction>(raw.clone()) {
            Ok(action) => {
                for permission in &action.required_permissions {
                    check_capability(permission, &format!("{label} requiredPermissions"), report);
                    if !declared.iter().any(|d| capability::matches(d, permission)) {
                        report.warn(format!(
                            "{label} requires '{permission}' which the manifest does not declare"
                        ));
                    }
                }
                actions.push(action);
            }
            Err(e) => {
                if !id.is_empty() {
                    report.error(format!("{label} is malformed: {e}"));
                }
            }
        }
    }

    if let Err(e) = execution_order(&actions) {
        report.error(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "name": "Lead Capture",
            "slug": "lead-capture",
            "version": "1.2.0",
            "permissions": ["database:leads", "files:write"],
            "onboarding": [
                {"key": "company", "label": "Company", "type": "text", "required": true},
                {"key": "tone", "label": "Tone", "type": "select", "options": ["calm", "bold"]}
            ],
            "dashboard": {"route": "/leads"},
            "hooks": {"onInstall": "setup"},
            "schedules": [{"cron": "0 9 * * 1-5", "name": "weekday digest"}],
            "files": [{"source": "t/index.html", "destination": "index.html", "transform": "template"}],
            "actions": [
                {"id": "save", "type": "db:insert", "requiredPermissions": ["database:leads"],
                 "config": {"table": "leads", "data": {"name": "{{input.name}}"}}},
                {"id": "page", "type": "file:create", "dependsOn": ["save"],
                 "config": {"path": "thanks.html", "content": "hi"}}
            ]
        })
    }

    fn errors_of(doc: Value) -> Vec<String> {
        parse_manifest_value(&doc).unwrap_err().errors
    }

    #[test]
    fn valid_manifest_parses() {
        let parsed = parse_manifest(&valid().to_string()).unwrap();
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);
        assert_eq!(parsed.manifest.slug, "lead-capture");
        assert_eq!(parsed.manifest.actions.len(), 2);
    }

    #[test]
    fn identity_fields_are_required() {
        let errors = errors_of(json!({"slug": "Bad Slug"}));
        assert!(errors.iter().any(|e| e.contains("'name' is required")));
        assert!(errors.iter().any(|e| e.contains("slug 'Bad Slug'")));
        assert!(errors.iter().any(|e| e.contains("'version' is required")));
    }

    #[test]
    fn loose_versions_only_warn() {
        let mut doc = valid();
        doc["version"] = json!("1.0");
        let parsed = parse_manifest_value(&doc).unwrap();
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("not a semantic version"));
    }

    #[test]
    fn unknown_permission_category_is_an_error() {
        let mut doc = valid();
        doc["permissions"] = json!(["network:all", "database:"]);
        let errors = errors_of(doc);
        assert!(errors.iter().any(|e| e.contains("unknown category 'network'")));
        assert!(errors.iter().any(|e| e.contains("empty scope")));
    }

    #[test]
    fn onboarding_rules() {
        let mut doc = valid();
        doc["onboarding"] = json!([
            {"key": "a", "label": "A", "type": "color"},
            {"key": "b", "label": "B", "type": "select", "options": []},
            {"key": "b", "label": "B2", "type": "text"}
        ]);
        let errors = errors_of(doc);
        assert!(errors.iter().any(|e| e.contains("unknown type 'color'")));
        assert!(errors.iter().any(|e| e.contains("needs non-empty string options")));
        assert!(errors.iter().any(|e| e.contains("duplicate onboarding key 'b'")));
    }

    #[test]
    fn files_dashboard_and_schedules() {
        let mut doc = valid();
        doc["files"] = json!([{"source": "", "destination": "x", "transform": "zip"}]);
        doc["dashboard"] = json!({"title": "No route"});
        doc["schedules"] = json!([{"cron": "every tuesday"}]);
        let errors = errors_of(doc);
        assert!(errors.iter().any(|e| e.contains("non-empty 'source'")));
        assert!(errors.iter().any(|e| e.contains("transform must be one of")));
        assert!(errors.iter().any(|e| e.contains("dashboard requires a 'route'")));
        assert!(errors.iter().any(|e| e.contains("invalid cron")));
    }

    #[test]
    fn unknown_hooks_and_types_warn() {
        let mut doc = valid();
        doc["hooks"] = json!({"onInstall": "x", "onFullMoon": "y"});
        doc["actions"][0]["type"] = json!("crm:sync");
        let parsed = parse_manifest_value(&doc).unwrap();
        assert!(parsed.warnings.iter().any(|w| w.contains("onFullMoon")));
        assert!(parsed.warnings.iter().any(|w| w.contains("crm:sync")));
    }

    #[test]
    fn undeclared_required_permission_warns() {
        let mut doc = valid();
        doc["actions"][0]["requiredPermissions"] = json!(["database:users"]);
        let parsed = parse_manifest_value(&doc).unwrap();
        assert!(parsed.warnings.iter().any(|w| w.contains("does not declare")));
    }

    #[test]
    fn graph_errors_reject_the_manifest() {
        let mut doc = valid();
        doc["actions"][0]["dependsOn"] = json!(["page"]);
        let errors = errors_of(doc);
        assert!(errors.iter().any(|e| e.contains("cycle")));

        let mut doc = valid();
        doc["actions"][1]["dependsOn"] = json!(["ghost"]);
        assert!(errors_of(doc).iter().any(|e| e.contains("unknown action 'ghost'")));

        let mut doc = valid();
        doc["actions"][1]["id"] = json!("save");
        assert!(errors_of(doc).iter().any(|e| e.contains("duplicate action id")));
    }

    #[test]
    fn bad_conditions_warn_and_retry_must_be_positive() {
        let mut doc = valid();
        doc["actions"][1]["when"] = json!({"condition": "config.x; rm -rf"});
        let parsed = parse_manifest_value(&doc).unwrap();
        assert!(parsed.warnings.iter().any(|w| w.contains("always be skipped")));

        let mut doc = valid();
        doc["actions"][1]["retry"] = json!({"maxAttempts": 0});
        assert!(errors_of(doc).iter().any(|e| e.contains("maxAttempts")));
    }

    #[test]
    fn invalid_json_and_non_objects_are_rejected() {
        assert!(parse_manifest("{not json").unwrap_err().errors[0].contains("not valid JSON"));
        assert!(parse_manifest("[]").is_err());
        let rejection = parse_manifest("{}").unwrap_err();
        let err: CapstanError = rejection.into();
        assert!(matches!(err, CapstanError::Validation(_)));
    }
}
