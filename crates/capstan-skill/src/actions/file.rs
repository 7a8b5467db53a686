// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File actions over the run's staging area.
//!
//! Every file action records `{path, existed, content}` as its before-state,
//! which is all a rollback needs to put the path back as it was.

use async_trait::async_trait;
use capstan_core::{ActionResult, CapstanError, JsonMap};
use serde_json::{Value, json};

use crate::registry::{Access, ActionContext, ActionHandler, optional_str, required_str};
use crate::template::{resolve_string, resolve_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Modify,
    Delete,
    Template,
}

impl FileOp {
    pub const ALL: [Self; 4] = [Self::Create, Self::Modify, Self::Delete, Self::Template];

    pub fn action_type(self) -> &'static str {
        match self {
            Self::Create => "file:create",
            Self::Modify => "file:modify",
            Self::Delete => "file:delete",
            Self::Template => "file:template",
        }
    }
}

/// Handler for the `file:*` action types.
pub struct FileAction {
    op: FileOp,
}

impl FileAction {
    pub fn new(op: FileOp) -> Self {
        Self { op }
    }
}

/// Before-state shared by every file action.
pub fn file_state(path: &str, content: Option<&str>) -> Value {
    json!({
        "path": path,
        "existed": content.is_some(),
        "content": content,
    })
}

fn content_of(config: &Value) -> Result<String, CapstanError> {
    match config.get("content") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(serde_json::to_string_pretty(other)?),
    }
}

fn written(path: &str, before: Option<&str>, after: &str) -> ActionResult {
    ActionResult::ok(json!({"path": path, "bytes": after.len()}))
        .with_states(
            Some(file_state(path, before)),
            Some(file_state(path, Some(after))),
        )
        .reversible()
        .with_target(path)
}

#[async_trait]
impl ActionHandler for FileAction {
    fn action_type(&self) -> &str {
        self.op.action_type()
    }

    fn description(&self) -> &str {
        match self.op {
            FileOp::Create => "Stage a new file; fails if the path exists",
            FileOp::Modify => "Replace or append to a staged file",
            FileOp::Delete => "Remove a staged file",
            FileOp::Template => "Render a template with custom variables into a staged file",
        }
    }

    fn raw_config_keys(&self) -> &'static [&'static str] {
        match self.op {
            FileOp::Template => &["template", "variables"],
            _ => &[],
        }
    }

    fn access(&self, config: &Value) -> Result<Vec<Access>, CapstanError> {
        Ok(vec![Access::FileWrite(required_str(config, "path")?.to_string())])
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionResult, CapstanError> {
        let path = required_str(config, "path")?;
        let staging = ctx.staging;

        match self.op {
            FileOp::Create => {
                let content = content_of(config)?;
                if !staging.create(path, &content) {
                    return Err(CapstanError::handler(format!("File already exists: {path}")));
                }
                Ok(written(path, None, &content))
            }
            FileOp::Modify => {
                let previous = staging
                    .get(path)
                    .ok_or_else(|| CapstanError::handler(format!("File not found: {path}")))?;
                let content = content_of(config)?;
                let next = if config.get("append").and_then(Value::as_bool).unwrap_or(false) {
                    format!("{previous}{content}")
                } else {
                    content
                };
                staging.put(path, &next);
                Ok(written(path, Some(&previous), &next))
            }
            FileOp::Delete => {
                let previous = staging
                    .remove(path)
                    .ok_or_else(|| CapstanError::handler(format!("File not found: {path}")))?;
                Ok(ActionResult::ok(json!({"path": path, "deleted": true}))
                    .with_states(Some(file_state(path, Some(&previous))), None)
                    .reversible()
                    .with_target(path))
            }
            FileOp::Template => {
                let template = required_str(config, "template")?;
                let base = ctx.execution.scope();
                let custom: JsonMap = match config.get("variables") {
                    Some(Value::Object(vars)) => vars
                        .iter()
                        .map(|(k, v)| (k.clone(), resolve_value(v, &base)))
                        .collect(),
                    Some(Value::Null) | None => JsonMap::new(),
                    Some(_) => {
                        return Err(CapstanError::Validation(
                            "'variables' must be an object".into(),
                        ));
                    }
                };
                let rendered = resolve_string(template, &base.with_overlay(&custom));
                let overwrite = optional_str(config, "mode") != Some("create");
                let previous = staging.get(path);
                if previous.is_some() && !overwrite {
                    return Err(CapstanError::handler(format!("File already exists: {path}")));
                }
                staging.put(path, &rendered);
                Ok(written(path, previous.as_deref(), &rendered))
            }
        }
    }
}
