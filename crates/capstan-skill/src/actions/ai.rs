// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation actions. Results are never reversible and never audited.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use capstan_core::traits::generation::{GenerationRequest, OutputFormat};
use capstan_core::{ActionResult, CapstanError, GenerationProvider};
use serde_json::{Value, json};
use tracing::debug;

use crate::registry::{ActionContext, ActionHandler, optional_str, required_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiOp {
    Generate,
    Analyze,
    Transform,
}

impl AiOp {
    pub const ALL: [Self; 3] = [Self::Generate, Self::Analyze, Self::Transform];

    pub fn action_type(self) -> &'static str {
        match self {
            Self::Generate => "ai:generate",
            Self::Analyze => "ai:analyze",
            Self::Transform => "ai:transform",
        }
    }
}

/// Request defaults applied when an action config leaves them out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// Handler for the `ai:*` action types.
pub struct AiAction {
    op: AiOp,
    provider: Arc<dyn GenerationProvider>,
    defaults: GenerationDefaults,
}

impl AiAction {
    pub fn new(op: AiOp, provider: Arc<dyn GenerationProvider>, defaults: GenerationDefaults) -> Self {
        Self {
            op,
            provider,
            defaults,
        }
    }

    fn user_prompt(&self, config: &Value) -> Result<String, CapstanError> {
        if self.op == AiOp::Generate {
            return Ok(required_str(config, "prompt")?.to_string());
        }
        let input = match config.get("input") {
            Some(Value::String(s)) => s.trim().to_string(),
            None | Some(Value::Null) => String::new(),
            Some(other) => serde_json::to_string_pretty(other)?,
        };
        if input.is_empty() {
            return Err(CapstanError::handler(format!(
                "{} requires non-empty input",
                self.op.action_type()
            )));
        }
        let instructions = match (self.op, optional_str(config, "instructions")) {
            (_, Some(text)) if !text.trim().is_empty() => text.to_string(),
            (AiOp::Analyze, _) => "Analyze the following input and report the key findings.".into(),
            _ => "Transform the following input.".into(),
        };
        Ok(format!("{instructions}\n\nInput:\n{input}"))
    }
}

/// Strips a surrounding Markdown code fence, if any.
fn unfence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[async_trait]
impl ActionHandler for AiAction {
    fn action_type(&self) -> &str {
        self.op.action_type()
    }

    fn description(&self) -> &str {
        match self.op {
            AiOp::Generate => "Generate content from a prompt",
            AiOp::Analyze => "Analyze input content",
            AiOp::Transform => "Transform input content",
        }
    }

    fn is_mutating(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionResult, CapstanError> {
        let output_format = optional_str(config, "outputFormat")
            .map(OutputFormat::from_str)
            .transpose()
            .map_err(|_| {
                CapstanError::Validation("'outputFormat' must be text, markdown or json".into())
            })?
            .unwrap_or_default();
        let max_tokens = match config.get("maxTokens") {
            None | Some(Value::Null) => self.defaults.max_tokens,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CapstanError::Validation(format!(
                        "'maxTokens' must be an integer between 1 and {}",
                        u32::MAX
                    ))
                })?,
        };
        let request = GenerationRequest {
            system_prompt: optional_str(config, "systemPrompt").map(str::to_string),
            user_prompt: self.user_prompt(config)?,
            max_tokens: Some(max_tokens),
            temperature: Some(
                config
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .map_or(self.defaults.temperature, |t| t as f32),
            ),
            output_format,
        };

        let response = self.provider.generate(request).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generation finished"
        );
        let content = if output_format.is_structured() {
            serde_json::from_str::<Value>(unfence(&response.content)).map_err(|e| {
                CapstanError::handler(format!("Generation output is not valid JSON: {e}"))
            })?
        } else {
            Value::String(response.content)
        };
        Ok(ActionResult::ok(json!({
            "content": content,
            "model": response.model,
            "usage": response.usage,
        })))
    }
}
