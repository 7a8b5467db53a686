// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret scrubbing applied to audit payloads before they are stored.

use capstan_security::{REDACTED, redact_json};
use serde_json::Value;

/// Keys whose values name things rather than hold secrets.
const STRUCTURAL_KEYS: &[&str] = &["key", "keys", "existed", "projectId", "project_id"];

/// Whether an action writes environment variables.
pub fn is_environment_action(action: &str) -> bool {
    action.starts_with("env:")
        || action == "deploy:set-env"
        || action.starts_with("rollback:env:")
}

/// Replaces every value under a non-structural key with the redaction marker.
///
/// Returns the masked value and whether anything changed.
pub fn mask_environment_values(value: &Value) -> (Value, bool) {
    match value {
        Value::Object(map) => {
            let mut changed = false;
            let masked = map
                .iter()
                .map(|(k, v)| {
                    if STRUCTURAL_KEYS.contains(&k.as_str()) {
                        return (k.clone(), v.clone());
                    }
                    let (masked, c) = match v {
                        Value::Object(_) => mask_environment_values(v),
                        Value::Null | Value::Bool(_) => (v.clone(), false),
                        _ => (Value::String(REDACTED.to_string()), true),
                    };
                    changed |= c;
                    (k.clone(), masked)
                })
                .collect();
            (Value::Object(masked), changed)
        }
        other => (other.clone(), false),
    }
}

/// Scrubs a state payload for `action`.
///
/// Environment actions are masked outright; every payload then has known
/// secret values removed.
pub fn scrub_state(action: &str, state: Option<&Value>, secrets: &[String]) -> (Option<Value>, bool) {
    let Some(state) = state else {
        return (None, false);
    };
    let (masked, masked_changed) = if is_environment_action(action) {
        mask_environment_values(state)
    } else {
        (state.clone(), false)
    };
    let (scrubbed, scrub_changed) = redact_json(&masked, secrets);
    (Some(scrubbed), masked_changed || scrub_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn env_values_are_masked_but_keys_kept() {
        let (out, changed) = mask_environment_values(&json!({
            "key": "API_TOKEN",
            "existed": true,
            "value": "tok-abc"
        }));
        assert!(changed);
        assert_eq!(out["key"], "API_TOKEN");
        assert_eq!(out["existed"], true);
        assert_eq!(out["value"], REDACTED);
    }

    #[test]
    fn nested_var_maps_are_masked() {
        let (out, changed) = mask_environment_values(&json!({
            "projectId": "p1",
            "vars": {"A": "1", "B": "2"}
        }));
        assert!(changed);
        assert_eq!(out["projectId"], "p1");
        assert_eq!(out["vars"]["A"], REDACTED);
    }

    #[test]
    fn absent_prior_value_is_unchanged() {
        let state = json!({"key": "NEW_KEY", "existed": false});
        let (out, changed) = scrub_state("env:update", Some(&state), &[]);
        assert!(!changed);
        assert_eq!(out, Some(state));
    }

    #[test]
    fn other_actions_only_lose_known_secrets() {
        let state = json!({"path": "a.txt", "content": "token: tok-abc"});
        let (out, changed) = scrub_state("file:modify", Some(&state), &["tok-abc".into()]);
        assert!(changed);
        assert_eq!(out.unwrap()["content"], "token: [REDACTED]");

        let (_, changed) = scrub_state("file:modify", Some(&state), &[]);
        assert!(!changed);
    }
}
