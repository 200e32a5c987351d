//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the model act: spawn a subagent, message the user,
//! fetch a web page, write memory. Each tool declares a name, a description
//! and a JSON schema, and receives the calling session's [`ToolContext`]
//! explicitly on every call instead of holding per-message mutable state.

use crate::error::ToolError;
use crate::message::ToolCall;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Channel identity reserved for subagent sessions.
pub const SUBAGENT_CHANNEL: &str = "subagent";

/// Session key prefix marking an isolated child session.
pub const SUBAGENT_SESSION_PREFIX: &str = "subagent:";

/// The session a tool call originates from.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Key of the calling session
    pub session_key: String,

    /// Channel identity of the calling session (`"subagent"` inside subagent runs)
    pub channel: String,

    /// Chat identifier of the calling session
    pub chat_id: String,

    /// Channel that replies should be addressed to
    pub reply_channel: String,

    /// Chat that replies should be addressed to
    pub reply_chat_id: String,

    /// Fires when the turn is cancelled or its deadline passes
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Context for a session that replies to its own channel and chat.
    pub fn new(
        session_key: impl Into<String>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        let chat_id = chat_id.into();
        Self {
            session_key: session_key.into(),
            reply_channel: channel.clone(),
            reply_chat_id: chat_id.clone(),
            channel,
            chat_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Address replies somewhere other than the calling session.
    pub fn with_reply_to(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.reply_channel = channel.into();
        self.reply_chat_id = chat_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether the calling session is itself a subagent.
    pub fn is_subagent(&self) -> bool {
        self.channel == SUBAGENT_CHANNEL
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content fed back to the model
    pub output: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// A handled failure reported as output rather than as an error.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Deserialize a tool's raw argument map into its typed argument struct.
pub fn parse_arguments<T: DeserializeOwned>(
    tool_name: &str,
    arguments: &serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<T, ToolError> {
    serde_json::from_value(serde_json::Value::Object(arguments.clone()))
        .map_err(|e| ToolError::InvalidArguments(format!("{tool_name}: {e}")))
}

/// The core Tool trait.
///
/// Implementations validate their arguments before any side effect.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "spawn", "web").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool on behalf of the session described by `ctx`.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, ordered by name so definitions are stable
/// across calls.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(ctx, call.arguments.clone()).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
