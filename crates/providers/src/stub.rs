//! Stub provider: a deterministic offline model.
//!
//! Echoes the most recent user message back. Useful for exercising the full
//! turn loop (context assembly, compaction, subagent runs) without network
//! access or credentials.

use async_trait::async_trait;
use pincer_core::error::ProviderError;
use pincer_core::message::{Message, Role};
use pincer_core::provider::{LlmResponse, Provider, ToolDefinition, Usage};
use tracing::debug;

pub const STUB_MODEL: &str = "stub-model";

pub struct StubProvider {
    model: String,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::with_model(STUB_MODEL)
    }

    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        debug!(model, messages = messages.len(), tools = tools.len(), "Stub provider call");

        let prompt_chars: usize = messages.iter().map(|m| m.text().len()).sum();
        let content = format!("(stub) You said: {last_user}");
        let prompt_tokens = (prompt_chars / 4) as u32;
        let completion_tokens = (content.len() / 4) as u32;

        Ok(LlmResponse {
            content,
            tool_calls: Vec::new(),
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }
}
