//! Write-memory tool: persist notes to the workspace memory files.

use async_trait::async_trait;
use pincer_core::error::ToolError;
use pincer_core::tool::{Tool, ToolContext, ToolResult, parse_arguments};
use pincer_memory::{FileMemoryStore, MemoryTarget};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

fn default_append() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WriteMemoryArgs {
    target: MemoryTarget,
    content: String,
    #[serde(default = "default_append")]
    append: bool,
}

pub struct WriteMemoryTool {
    store: Arc<FileMemoryStore>,
}

impl WriteMemoryTool {
    pub fn new(store: Arc<FileMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteMemoryTool {
    fn name(&self) -> &str {
        "write_memory"
    }

    fn description(&self) -> &str {
        "Remember something. Use target \"today\" for notes about the current day and \
         \"long\" for lasting facts about the user or their work."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "enum": ["today", "long"],
                    "description": "Which memory file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The text to remember"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append to the file (true, default) or replace it (false)",
                    "default": true
                }
            },
            "required": ["target", "content"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolResult, ToolError> {
        let args: WriteMemoryArgs = parse_arguments(self.name(), &arguments)?;
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "write_memory: 'content' must not be empty".into(),
            ));
        }

        let path = self
            .store
            .write(args.target, &args.content, args.append)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "write_memory".into(),
                reason: e.to_string(),
            })?;

        info!(session = %ctx.session_key, target = ?args.target, "Memory updated");
        Ok(ToolResult::ok(format!("Wrote memory to {}", path.display())))
    }
}
