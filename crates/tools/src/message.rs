//! Message tool: send a chat message to the user mid-turn.
//!
//! Inside a subagent run the reply target is the chat that spawned it, so
//! progress updates reach the right person.

use async_trait::async_trait;
use pincer_core::error::{ChannelError, ToolError};
use pincer_core::hub::{OutboundMessage, OutboundSink};
use pincer_core::tool::{Tool, ToolContext, ToolResult, parse_arguments};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MessageArgs {
    content: String,
}

pub struct MessageTool {
    outbound: OutboundSink,
}

impl MessageTool {
    pub fn new(outbound: OutboundSink) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user in the current chat without ending your turn."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message text to send"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolResult, ToolError> {
        let args: MessageArgs = parse_arguments(self.name(), &arguments)?;
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "message: 'content' must not be empty".into(),
            ));
        }

        let msg = OutboundMessage::new(&ctx.reply_channel, &ctx.reply_chat_id, args.content);
        self.outbound.offer(msg).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "message".into(),
            reason: match e {
                ChannelError::QueueFull { .. } => "outbound queue full".into(),
                ChannelError::Closed => "outbound queue closed".into(),
            },
        })?;

        debug!(
            channel = %ctx.reply_channel,
            chat_id = %ctx.reply_chat_id,
            "Message tool delivered"
        );
        Ok(ToolResult::ok(format!(
            "Message sent to {}:{}",
            ctx.reply_channel, ctx.reply_chat_id
        )))
    }
}
