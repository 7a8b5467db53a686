// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `{{key}}` placeholder resolution against layered run context.
//!
//! Lookup walks the layers of a [`Scope`] in precedence order and the first
//! layer that resolves the key wins. A key rooted at a layer name
//! (`config.company`, `input.name`, `env.API_KEY`) is resolved in that layer
//! only, as in conditions. Keys may be dotted paths into nested objects and
//! arrays. Unresolved placeholders are left verbatim.

use std::borrow::Cow;
use std::sync::LazyLock;

use capstan_core::JsonMap;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_$][A-Za-z0-9_$.\-]*)\s*\}\}").unwrap()
});

/// Named layers of run context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Per-call overrides, such as the custom variables of a template action.
    Overlay,
    Variables,
    Input,
    Onboarding,
    Config,
    Environment,
}

impl Layer {
    /// The layer a condition path root names, if any.
    pub fn from_root(root: &str) -> Option<Self> {
        match root {
            "vars" | "variables" => Some(Self::Variables),
            "input" => Some(Self::Input),
            "onboarding" => Some(Self::Onboarding),
            "config" => Some(Self::Config),
            "env" | "environment" => Some(Self::Environment),
            _ => None,
        }
    }
}

/// An ordered view over context layers, highest precedence first.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    layers: Vec<(Layer, &'a JsonMap)>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer below every existing one.
    pub fn push(mut self, layer: Layer, values: &'a JsonMap) -> Self {
        self.layers.push((layer, values));
        self
    }

    /// Inserts a layer above every existing one.
    pub fn with_overlay(mut self, values: &'a JsonMap) -> Self {
        self.layers.insert(0, (Layer::Overlay, values));
        self
    }

    /// Resolves `key` against the first layer that contains it, or against
    /// the layer its first segment names.
    pub fn lookup(&self, key: &str) -> Option<&'a Value> {
        if let Some((root, rest)) = key.split_once('.')
            && let Some(layer) = Layer::from_root(root)
        {
            return self.lookup_in(layer, rest);
        }
        self.layers.iter().find_map(|(_, map)| lookup_path(*map, key))
    }

    /// Resolves `key` within one named layer only.
    pub fn lookup_in(&self, layer: Layer, key: &str) -> Option<&'a Value> {
        self.layers
            .iter()
            .filter(|(l, _)| *l == layer)
            .find_map(|(_, map)| lookup_path(*map, key))
    }

    pub fn layer(&self, layer: Layer) -> Option<&'a JsonMap> {
        self.layers
            .iter()
            .find(|(l, _)| *l == layer)
            .map(|(_, map)| *map)
    }
}

/// Looks up a dotted path. A literal key containing dots takes precedence.
pub fn lookup_path<'v>(map: &'v JsonMap, path: &str) -> Option<&'v Value> {
    if let Some(v) = map.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Textual form of a resolved value: strings verbatim, everything else as JSON.
pub fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Replaces every resolvable placeholder in `template` in a single pass.
pub fn resolve_string(template: &str, scope: &Scope<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match scope.lookup(&caps[1]) {
            Some(value) => stringify(value).into_owned(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolves every string inside `value`, recursing into arrays and objects.
///
/// A string consisting of exactly one resolvable placeholder is replaced by
/// the raw value, so `"{{lead.id}}"` keeps a numeric id numeric.
pub fn resolve_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = PLACEHOLDER.captures(s)
                && caps.get(0).is_some_and(|m| m.len() == s.len())
                && let Some(found) = scope.lookup(&caps[1])
            {
                return found.clone();
            }
            Value::String(resolve_string(s, scope))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Like [`resolve_value`], but leaves the named top-level keys untouched.
pub fn resolve_config(config: &Value, scope: &Scope<'_>, raw_keys: &[&str]) -> Value {
    match config {
        Value::Object(map) if !raw_keys.is_empty() => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let resolved = if raw_keys.contains(&k.as_str()) {
                        v.clone()
                    } else {
                        resolve_value(v, scope)
                    };
                    (k.clone(), resolved)
                })
                .collect(),
        ),
        other => resolve_value(other, scope),
    }
}
