//! Spawn tool: delegate a task to a background subagent.
//!
//! The tool returns as soon as the run is launched. The run executes in an
//! isolated `subagent:` session and, when it finishes, announces its result
//! to the chat that asked for it. Announcements are offered to the outbound
//! queue without waiting; a full queue drops them.

use async_trait::async_trait;
use chrono::Utc;
use pincer_core::error::ToolError;
use pincer_core::event::{DomainEvent, EventBus};
use pincer_core::hub::{OutboundMessage, OutboundSink};
use pincer_core::tool::{
    SUBAGENT_SESSION_PREFIX, Tool, ToolContext, ToolResult, parse_arguments,
};
use serde::Deserialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::SubagentSupervisor;

/// Run timeout used when the model does not ask for one.
pub const DEFAULT_SUBAGENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a runner needs to execute one subagent task.
#[derive(Debug, Clone)]
pub struct SubagentRequest {
    /// Fresh `subagent:` session key
    pub session_key: String,
    pub task: String,
    /// Hard deadline for the whole run
    pub timeout: Duration,
    /// Where message-sending tools inside the run should address replies
    pub requester_channel: String,
    pub requester_chat_id: String,
}

/// Executes subagent turns. Implemented by the agent loop.
#[async_trait]
pub trait SubagentRunner: Send + Sync {
    async fn run_subagent(
        &self,
        request: SubagentRequest,
        cancel: CancellationToken,
    ) -> pincer_core::Result<String>;
}

#[derive(Debug, Deserialize)]
struct SpawnArgs {
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, rename = "runTimeoutSeconds")]
    run_timeout_seconds: Option<f64>,
}

pub struct SpawnTool {
    runner: Option<Weak<dyn SubagentRunner>>,
    outbound: OutboundSink,
    supervisor: Arc<SubagentSupervisor>,
    default_timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl SpawnTool {
    /// A spawn tool without a runner; every call reports an error payload
    /// until [`SpawnTool::with_runner`] is applied.
    pub fn new(outbound: OutboundSink, supervisor: Arc<SubagentSupervisor>) -> Self {
        Self {
            runner: None,
            outbound,
            supervisor,
            default_timeout: DEFAULT_SUBAGENT_TIMEOUT,
            events: None,
        }
    }

    /// The runner is held weakly: the agent loop owns the tool registry that
    /// owns this tool.
    pub fn with_runner(mut self, runner: Weak<dyn SubagentRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn resolve_timeout(&self, seconds: Option<f64>) -> Duration {
        seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or(self.default_timeout)
    }
}

/// Text delivered to the requester when a run completes.
pub fn format_announcement(label: Option<&str>, result: &str) -> String {
    match label {
        Some(label) => format!("**Subagent result ({label}):**\n\n{result}"),
        None => format!("**Subagent result:**\n\n{result}"),
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background subagent to work on a task independently. Returns immediately; \
         the subagent's result is delivered to this chat when it finishes. Use for long or \
         self-contained work that does not need the current conversation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete, self-contained instructions for the subagent"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short label shown with the result"
                },
                "runTimeoutSeconds": {
                    "type": "number",
                    "description": "Optional run timeout in seconds (default 120)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ToolResult, ToolError> {
        let args: SpawnArgs = parse_arguments(self.name(), &arguments)?;

        let task = args
            .task
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("spawn: 'task' required".into()))?
            .to_string();

        if ctx.is_subagent() {
            return Err(ToolError::PermissionDenied {
                tool_name: "spawn".into(),
                reason: "not allowed from subagent sessions".into(),
            });
        }

        let Some(runner) = self.runner.as_ref().and_then(Weak::upgrade) else {
            return Ok(ToolResult::failed(
                serde_json::json!({
                    "status": "error",
                    "error": "subagent runner not configured",
                })
                .to_string(),
            ));
        };

        let label = args
            .label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let timeout = self.resolve_timeout(args.run_timeout_seconds);
        let run_id = uuid::Uuid::new_v4().to_string();
        let child_key = format!("{SUBAGENT_SESSION_PREFIX}{}", uuid::Uuid::new_v4());

        let request = SubagentRequest {
            session_key: child_key.clone(),
            task,
            timeout,
            requester_channel: ctx.reply_channel.clone(),
            requester_chat_id: ctx.reply_chat_id.clone(),
        };

        info!(
            run_id = %run_id,
            child = %child_key,
            parent = %ctx.session_key,
            timeout_secs = timeout.as_secs_f64(),
            "Spawning subagent"
        );

        let outbound = self.outbound.clone();
        let events = self.events.clone();
        let task_run_id = run_id.clone();
        let task_label = label.clone();
        self.supervisor
            .launch(run_id.clone(), child_key.clone(), label, move |cancel| async move {
                let channel = request.requester_channel.clone();
                let chat_id = request.requester_chat_id.clone();
                let session_key = request.session_key.clone();

                let (result, success) = match runner.run_subagent(request, cancel).await {
                    Ok(answer) => (answer, true),
                    Err(e) => {
                        warn!(run_id = %task_run_id, error = %e, "Subagent run failed");
                        (format!("(error) {e}"), false)
                    }
                };
                drop(runner);

                if let Some(events) = &events {
                    events.publish(DomainEvent::SubagentCompleted {
                        run_id: task_run_id.clone(),
                        session_key,
                        success,
                        timestamp: Utc::now(),
                    });
                }

                let announcement = format_announcement(task_label.as_deref(), &result);
                match outbound.offer(OutboundMessage::new(&channel, &chat_id, announcement)) {
                    Ok(()) => info!(run_id = %task_run_id, success, "Subagent result announced"),
                    Err(e) => {
                        warn!(
                            run_id = %task_run_id,
                            channel = %channel,
                            chat_id = %chat_id,
                            error = %e,
                            "Dropping subagent announcement"
                        );
                        if let Some(events) = &events {
                            events.publish(DomainEvent::AnnouncementDropped {
                                run_id: task_run_id,
                                channel,
                                chat_id,
                                timestamp: Utc::now(),
                            });
                        }
                    }
                }
            });

        Ok(ToolResult::ok(
            serde_json::json!({
                "status": "accepted",
                "childSessionKey": child_key,
                "runId": run_id,
            })
            .to_string(),
        ))
    }
}
