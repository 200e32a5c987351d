//! The agent reasoning loop implementation.

use async_trait::async_trait;
use chrono::Utc;
use pincer_core::error::Error;
use pincer_core::event::{DomainEvent, EventBus};
use pincer_core::hub::{InboundMessage, OutboundMessage, OutboundSink};
use pincer_core::message::Message;
use pincer_core::provider::Provider;
use pincer_core::tool::{SUBAGENT_CHANNEL, Tool, ToolContext, ToolRegistry};
use pincer_memory::FileMemoryStore;
use pincer_tools::spawn::{DEFAULT_SUBAGENT_TIMEOUT, SpawnTool, SubagentRequest, SubagentRunner};
use pincer_tools::supervisor::SubagentSupervisor;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::context::builder::ContextBuilder;
use crate::context::compact::compact_if_needed;
use crate::context::truncate::{
    DEFAULT_CONTEXT_WINDOW_TOKENS, max_tool_result_chars, truncate_tool_result,
};
use crate::heuristics::suggests_incomplete_action;
use crate::session::SessionStore;

pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 20;
pub const DEFAULT_MAX_INCOMPLETE_ACTION_NUDGES: u32 = 1;
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);

/// Channel, chat and session used by [`AgentLoop::process_direct`].
pub const DIRECT_CHANNEL: &str = "cli";
pub const DIRECT_CHAT_ID: &str = "direct";
pub const DIRECT_SESSION_KEY: &str = "cli:direct";

pub const MAX_ITERATIONS_MESSAGE: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

pub const INCOMPLETE_ACTION_NUDGE: &str = "You said you would take an action but did not call \
any tool. Call the appropriate tool now, or give your final answer.";

/// One turn's inputs and identity.
struct Turn<'a> {
    session_key: &'a str,
    channel: &'a str,
    chat_id: &'a str,
    /// Reply target when it differs from the session's own channel and chat
    reply_to: Option<(&'a str, &'a str)>,
    text: &'a str,
    media: &'a [String],
    include_memory: bool,
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Tool registry (includes `spawn` unless disabled)
    tools: ToolRegistry,

    /// Prompt assembly
    context: ContextBuilder,

    /// Optional workspace memory, injected into non-subagent turns
    memory: Option<Arc<FileMemoryStore>>,

    /// Per-session history
    sessions: SessionStore,

    /// Background subagent runs
    supervisor: Arc<SubagentSupervisor>,

    /// Where inbound-loop replies go
    outbound: OutboundSink,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    /// Model context window, for compaction and tool result truncation
    context_window_tokens: u32,

    /// Maximum model calls per turn
    max_iterations: u32,

    /// Maximum incomplete-action nudges per turn
    max_nudges: u32,

    /// Deadline for turns started by the inbound loop
    turn_timeout: Duration,
}

/// Builder for [`AgentLoop`]; `build` wires the spawn tool back to the loop.
pub struct AgentLoopBuilder {
    provider: Arc<dyn Provider>,
    outbound: OutboundSink,
    model: Option<String>,
    context: ContextBuilder,
    memory: Option<Arc<FileMemoryStore>>,
    event_bus: Arc<EventBus>,
    supervisor: Arc<SubagentSupervisor>,
    tools: Vec<Box<dyn Tool>>,
    spawn: bool,
    subagent_timeout: Duration,
    context_window_tokens: u32,
    max_iterations: u32,
    max_nudges: u32,
    turn_timeout: Duration,
}

impl AgentLoopBuilder {
    pub fn new(provider: Arc<dyn Provider>, outbound: OutboundSink) -> Self {
        Self {
            provider,
            outbound,
            model: None,
            context: ContextBuilder::new(),
            memory: None,
            event_bus: Arc::new(EventBus::default()),
            supervisor: Arc::new(SubagentSupervisor::new()),
            tools: Vec::new(),
            spawn: true,
            subagent_timeout: DEFAULT_SUBAGENT_TIMEOUT,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            max_nudges: DEFAULT_MAX_INCOMPLETE_ACTION_NUDGES,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }

    /// Apply the `[agent]` and `[subagent]` settings.
    pub fn with_config(mut self, config: &pincer_config::AppConfig) -> Self {
        self.context_window_tokens = config.agent.context_window_tokens;
        self.max_iterations = config.agent.max_tool_iterations;
        self.max_nudges = config.agent.max_incomplete_action_nudges;
        self.turn_timeout = Duration::from_secs(config.agent.direct_timeout_secs);
        self.subagent_timeout = Duration::from_secs(config.subagent.default_timeout_secs);
        self
    }

    /// Model name; defaults to the provider's default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn with_memory(mut self, memory: Arc<FileMemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Register an additional tool.
    pub fn with_tool(mut self, tool: Box<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Do not register the `spawn` tool.
    pub fn without_spawn(mut self) -> Self {
        self.spawn = false;
        self
    }

    pub fn with_subagent_timeout(mut self, timeout: Duration) -> Self {
        self.subagent_timeout = timeout;
        self
    }

    pub fn with_context_window(mut self, tokens: u32) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    /// Set the maximum number of tool call iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_incomplete_action_nudges(mut self, max: u32) -> Self {
        self.max_nudges = max;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<AgentLoop> {
        let model = self
            .model
            .unwrap_or_else(|| self.provider.default_model().to_string());

        Arc::new_cyclic(|weak: &Weak<AgentLoop>| {
            let mut tools = ToolRegistry::new();
            for tool in self.tools {
                tools.register(tool);
            }
            if self.spawn {
                let runner: Weak<dyn SubagentRunner> = weak.clone();
                tools.register(Box::new(
                    SpawnTool::new(self.outbound.clone(), Arc::clone(&self.supervisor))
                        .with_runner(runner)
                        .with_default_timeout(self.subagent_timeout)
                        .with_event_bus(Arc::clone(&self.event_bus)),
                ));
            }

            AgentLoop {
                provider: self.provider,
                model,
                tools,
                context: self.context,
                memory: self.memory,
                sessions: SessionStore::new(),
                supervisor: self.supervisor,
                outbound: self.outbound,
                event_bus: self.event_bus,
                context_window_tokens: self.context_window_tokens,
                max_iterations: self.max_iterations,
                max_nudges: self.max_nudges,
                turn_timeout: self.turn_timeout,
            }
        })
    }
}

impl AgentLoop {
    pub fn builder(provider: Arc<dyn Provider>, outbound: OutboundSink) -> AgentLoopBuilder {
        AgentLoopBuilder::new(provider, outbound)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn supervisor(&self) -> &Arc<SubagentSupervisor> {
        &self.supervisor
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one turn on the direct session and return the final answer.
    ///
    /// Fails when the model call fails or `timeout` elapses; a failed turn
    /// records nothing in the session history.
    pub async fn process_direct(&self, text: &str, timeout: Duration) -> pincer_core::Result<String> {
        let turn = Turn {
            session_key: DIRECT_SESSION_KEY,
            channel: DIRECT_CHANNEL,
            chat_id: DIRECT_CHAT_ID,
            reply_to: None,
            text,
            media: &[],
            include_memory: true,
        };
        self.process_turn(turn, CancellationToken::new(), timeout).await
    }

    /// Consume inbound messages until the channel closes or `shutdown` fires.
    ///
    /// Each session gets one worker task draining its own FIFO queue, so
    /// turns within a session run in arrival order while different sessions
    /// proceed concurrently. Messages on a reserved identity are dropped.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: CancellationToken) {
        info!(model = %self.model, tools = ?self.tools.names(), "Agent loop started");
        let tracker = TaskTracker::new();
        let mut queues: HashMap<String, mpsc::UnboundedSender<InboundMessage>> = HashMap::new();

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Some(reason) = reserved_identity(&msg) {
                warn!(channel = %msg.channel, chat_id = %msg.chat_id, reason, "Inbound message dropped");
                continue;
            }

            let session_key = msg.session_key();
            let msg = match queues.get(&session_key) {
                Some(queue) => match queue.send(msg) {
                    Ok(()) => continue,
                    // Worker already stopped; start a fresh one below
                    Err(mpsc::error::SendError(msg)) => msg,
                },
                None => msg,
            };

            let (queue, pending) = mpsc::unbounded_channel();
            let agent = Arc::clone(&self);
            let cancel = shutdown.child_token();
            debug!(session = %session_key, "Session worker started");
            tracker.spawn(async move { agent.drain_session(msg, pending, cancel).await });
            queues.insert(session_key, queue);
        }

        // Closing the queues lets workers finish what is already queued
        drop(queues);
        tracker.close();
        tracker.wait().await;
        info!("Agent loop stopped");
    }

    /// Cancel outstanding subagent runs and wait for them to finish.
    pub async fn shutdown(&self) {
        let active = self.supervisor.active_count();
        if active > 0 {
            info!(active, "Cancelling subagent runs");
        }
        self.supervisor.cancel_all();
        self.supervisor.drain().await;
    }

    /// Run `first` and then every queued message for one session, in order.
    async fn drain_session(
        &self,
        first: InboundMessage,
        mut pending: mpsc::UnboundedReceiver<InboundMessage>,
        cancel: CancellationToken,
    ) {
        let mut next = Some(first);
        while let Some(msg) = next.take() {
            self.handle_inbound(msg, cancel.clone()).await;
            next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                msg = pending.recv() => msg,
            };
        }
    }

    async fn handle_inbound(&self, msg: InboundMessage, cancel: CancellationToken) {
        let session_key = msg.session_key();
        let turn = Turn {
            session_key: &session_key,
            channel: &msg.channel,
            chat_id: &msg.chat_id,
            reply_to: None,
            text: &msg.content,
            media: &msg.media,
            include_memory: true,
        };

        let reply = match self.process_turn(turn, cancel, self.turn_timeout).await {
            Ok(answer) if answer.trim().is_empty() => return,
            Ok(answer) => answer,
            Err(Error::Cancelled) => {
                debug!(session = %session_key, "Turn cancelled by shutdown");
                return;
            }
            Err(e) => {
                error!(session = %session_key, error = %e, "Turn failed");
                format!("Sorry, I couldn't complete that: {e}")
            }
        };

        if let Err(e) = self
            .outbound
            .offer(OutboundMessage::new(&msg.channel, &msg.chat_id, reply))
        {
            warn!(session = %session_key, error = %e, "Reply dropped");
        }
    }

    /// Lock the session, then run the turn under `timeout` and record history.
    ///
    /// The deadline starts once the session is ours, so time spent queued
    /// behind an earlier turn of the same session does not count against it.
    async fn process_turn(
        &self,
        turn: Turn<'_>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> pincer_core::Result<String> {
        let handle = self.sessions.get_or_create(turn.session_key);
        let mut session = tokio::select! {
            session = handle.lock() => session,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let answer = bounded(self.run_turn(&turn, &session.history, &cancel), timeout, &cancel).await?;
        session.record_turn(turn.text, &answer);
        Ok(answer)
    }

    /// Build context and run the tool loop against a locked session's history.
    async fn run_turn(
        &self,
        turn: &Turn<'_>,
        history: &[String],
        cancel: &CancellationToken,
    ) -> pincer_core::Result<String> {
        let (memory_context, memories) = match (&self.memory, turn.include_memory) {
            (Some(memory), true) => (memory.read_context().await, memory.items().await),
            _ => (String::new(), Vec::new()),
        };

        let messages = self.context.build_messages(
            history,
            turn.text,
            turn.media,
            turn.channel,
            turn.chat_id,
            &memory_context,
            &memories,
        );

        // Tools observe the token; it fires when the turn ends either way
        let turn_cancel = cancel.child_token();
        let _cancel_on_exit = turn_cancel.clone().drop_guard();
        let mut ctx = ToolContext::new(turn.session_key, turn.channel, turn.chat_id)
            .with_cancel(turn_cancel);
        if let Some((channel, chat_id)) = turn.reply_to {
            ctx = ctx.with_reply_to(channel, chat_id);
        }

        self.run_tool_loop(messages, &ctx).await
    }

    /// Call the model until it answers without tool calls.
    async fn run_tool_loop(&self, messages: Vec<Message>, ctx: &ToolContext) -> pincer_core::Result<String> {
        let before = messages.len();
        let mut messages = compact_if_needed(
            messages,
            self.context_window_tokens,
            self.provider.as_ref(),
            &self.model,
        )
        .await;
        if messages.len() < before {
            self.event_bus.publish(DomainEvent::CompactionApplied {
                messages_before: before,
                messages_after: messages.len(),
                timestamp: Utc::now(),
            });
        }

        let tool_definitions = self.tools.definitions();
        let max_result_chars = max_tool_result_chars(self.context_window_tokens);
        let mut nudges = 0;

        for iteration in 1..=self.max_iterations {
            debug!(session = %ctx.session_key, iteration, "Agent loop iteration");

            let response = self
                .provider
                .chat(&messages, &tool_definitions, &self.model)
                .await?;

            if !response.has_tool_calls() {
                if nudges < self.max_nudges
                    && !self.tools.is_empty()
                    && suggests_incomplete_action(&response.content)
                {
                    nudges += 1;
                    info!(session = %ctx.session_key, nudges, "Answer promised an action without a tool call, nudging");
                    messages.push(Message::assistant(response.content));
                    messages.push(Message::user(INCOMPLETE_ACTION_NUDGE));
                    continue;
                }
                return Ok(response.content);
            }

            debug!(tool_count = response.tool_calls.len(), "Executing tool calls");
            let tool_calls = response.tool_calls.clone();
            messages.push(Message::assistant_with_tool_calls(
                response.content,
                response.tool_calls,
            ));

            for call in &tool_calls {
                let start = Instant::now();
                let result = self.tools.execute(ctx, call).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                let (success, output) = match result {
                    Ok(result) => (result.success, result.output),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool execution failed");
                        // Reported to the LLM so it can recover
                        (false, format!("Error: {e}"))
                    }
                };

                self.event_bus.publish(DomainEvent::ToolExecuted {
                    session_key: ctx.session_key.clone(),
                    tool_name: call.name.clone(),
                    success,
                    duration_ms,
                    timestamp: Utc::now(),
                });

                messages.push(Message::tool_result(
                    &call.id,
                    truncate_tool_result(&output, max_result_chars),
                ));
            }
        }

        warn!(
            session = %ctx.session_key,
            iterations = self.max_iterations,
            "Max tool iterations reached, forcing text response"
        );
        Ok(MAX_ITERATIONS_MESSAGE.into())
    }
}

/// Why an inbound message may not run on its own identity, if so. The
/// `subagent` channel belongs to spawned runs and `cli:direct` to
/// [`AgentLoop::process_direct`].
fn reserved_identity(msg: &InboundMessage) -> Option<&'static str> {
    if msg.channel == SUBAGENT_CHANNEL {
        Some("channel is reserved for subagent runs")
    } else if msg.session_key() == DIRECT_SESSION_KEY {
        Some("session is reserved for direct turns")
    } else {
        None
    }
}

/// Bound `fut` by a deadline and a cancellation signal. Dropping the future
/// aborts whatever model or tool call it was waiting on.
async fn bounded<F>(fut: F, timeout: Duration, cancel: &CancellationToken) -> pincer_core::Result<String>
where
    F: Future<Output = pincer_core::Result<String>>,
{
    tokio::select! {
        result = tokio::time::timeout(timeout, fut) => {
            result.map_err(|_| Error::DeadlineExceeded(timeout))?
        }
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

#[async_trait]
impl SubagentRunner for AgentLoop {
    /// Run `request.task` in a fresh session that sees no parent history or
    /// memory. The session is discarded afterwards.
    async fn run_subagent(
        &self,
        request: SubagentRequest,
        cancel: CancellationToken,
    ) -> pincer_core::Result<String> {
        info!(
            session = %request.session_key,
            requester_channel = %request.requester_channel,
            requester_chat_id = %request.requester_chat_id,
            "Subagent run started"
        );

        let turn = Turn {
            session_key: &request.session_key,
            channel: SUBAGENT_CHANNEL,
            chat_id: &request.session_key,
            reply_to: Some((
                request.requester_channel.as_str(),
                request.requester_chat_id.as_str(),
            )),
            text: &request.task,
            media: &[],
            include_memory: false,
        };
        let result = self.process_turn(turn, cancel, request.timeout).await;

        self.sessions.remove(&request.session_key);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pincer_core::error::{ProviderError, ToolError};
    use pincer_core::hub::Hub;
    use pincer_core::message::{Role, ToolCall};
    use pincer_core::provider::{LlmResponse, ToolDefinition};
    use pincer_core::tool::ToolResult;
    use pincer_memory::MemoryTarget;
    use pincer_providers::StubProvider;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::context::truncate::TRUNCATION_SUFFIX;

    /// Returns queued responses in order and records every request.
    /// Once the queue is empty it answers "fallback".
    struct ScriptedProvider {
        responses: Mutex<VecDeque<LlmResponse>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| LlmResponse::text("fallback")))
        }
    }

    /// Always requests the same tool.
    struct LoopingProvider;

    #[async_trait]
    impl Provider for LoopingProvider {
        fn name(&self) -> &str {
            "looping"
        }

        fn default_model(&self) -> &str {
            "looping-model"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse::with_tool_calls("", vec![call("again", "echo", serde_json::json!({"text": "x"}))]))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn default_model(&self) -> &str {
            "slow-model"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(LlmResponse::text("too late"))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn default_model(&self) -> &str {
            "failing-model"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            })
        }
    }

    /// Echoes its `text` argument, or returns `size` bytes of filler.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text back"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            arguments: serde_json::Map<String, serde_json::Value>,
        ) -> Result<ToolResult, ToolError> {
            if let Some(size) = arguments.get("size").and_then(|v| v.as_u64()) {
                return Ok(ToolResult::ok("r".repeat(size as usize)));
            }
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArguments("echo: 'text' required".into()))?;
            Ok(ToolResult::ok(text))
        }
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(id, name, args.as_object().cloned().unwrap_or_default())
    }

    fn agent(provider: Arc<dyn Provider>) -> (Arc<AgentLoop>, Hub) {
        let hub = Hub::new(16);
        let agent = AgentLoop::builder(provider, hub.outbound.clone())
            .with_tool(Box::new(EchoTool))
            .build();
        (agent, hub)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn simple_text_response() {
        let provider = ScriptedProvider::new(vec![LlmResponse::text("Hello! How can I help?")]);
        let (agent, _hub) = agent(provider.clone());

        let answer = agent.process_direct("Hello!", TIMEOUT).await.unwrap();
        assert_eq!(answer, "Hello! How can I help?");

        let session = agent.sessions().get_or_create(DIRECT_SESSION_KEY);
        assert_eq!(
            session.lock().await.history,
            vec!["user: Hello!", "assistant: Hello! How can I help?"]
        );
    }

    #[tokio::test]
    async fn history_replayed_on_next_turn() {
        let provider = ScriptedProvider::new(vec![LlmResponse::text("first"), LlmResponse::text("second")]);
        let (agent, _hub) = agent(provider.clone());

        agent.process_direct("one", TIMEOUT).await.unwrap();
        agent.process_direct("two", TIMEOUT).await.unwrap();

        let second = &provider.requests()[1];
        let n = second.len();
        assert_eq!(second[n - 3], Message::user("one"));
        assert_eq!(second[n - 2], Message::assistant("first"));
        assert_eq!(second[n - 1], Message::user("two"));
    }

    #[tokio::test]
    async fn tool_call_loop() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::with_tool_calls("", vec![call("c1", "echo", serde_json::json!({"text": "pong"}))]),
            LlmResponse::text("The tool said pong."),
        ]);
        let (agent, _hub) = agent(provider.clone());
        let mut events = agent.event_bus().subscribe();

        let answer = agent.process_direct("ping it", TIMEOUT).await.unwrap();
        assert_eq!(answer, "The tool said pong.");
        assert_eq!(provider.call_count(), 2);

        let second = &provider.requests()[1];
        let n = second.len();
        assert_eq!(second[n - 2].role, Role::Assistant);
        assert_eq!(second[n - 2].tool_calls[0].id, "c1");
        assert_eq!(second[n - 1], Message::tool_result("c1", "pong"));

        let event = events.try_recv().unwrap();
        assert!(matches!(
            &*event,
            DomainEvent::ToolExecuted { tool_name, success: true, .. } if tool_name == "echo"
        ));
    }

    #[tokio::test]
    async fn opaque_tool_call_data_is_echoed() {
        let mut with_extra = call("c1", "echo", serde_json::json!({"text": "a"}));
        let extra = serde_json::json!({"signature": "abc=="}).as_object().cloned();
        with_extra.extra_content = extra.clone();

        let provider = ScriptedProvider::new(vec![
            LlmResponse::with_tool_calls("", vec![with_extra]),
            LlmResponse::text("ok"),
        ]);
        let (agent, _hub) = agent(provider.clone());
        agent.process_direct("go", TIMEOUT).await.unwrap();

        let second = &provider.requests()[1];
        let assistant = second.iter().find(|m| !m.tool_calls.is_empty()).unwrap();
        assert_eq!(assistant.tool_calls[0].extra_content, extra);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::with_tool_calls(
                "",
                vec![
                    call("c1", "nonexistent", serde_json::json!({})),
                    call("c2", "echo", serde_json::json!({})),
                ],
            ),
            LlmResponse::text("recovered"),
        ]);
        let (agent, _hub) = agent(provider.clone());

        let answer = agent.process_direct("try", TIMEOUT).await.unwrap();
        assert_eq!(answer, "recovered");

        let second = &provider.requests()[1];
        let n = second.len();
        assert!(second[n - 2].text().starts_with("Error: Tool not found"));
        assert!(second[n - 1].text().starts_with("Error: Invalid tool arguments"));
    }

    #[tokio::test]
    async fn oversized_tool_result_is_truncated() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::with_tool_calls("", vec![call("big", "echo", serde_json::json!({"size": 100_000}))]),
            LlmResponse::text("summarized"),
        ]);
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(provider.clone(), hub.outbound.clone())
            .with_tool(Box::new(EchoTool))
            .with_context_window(20_000)
            .build();

        agent.process_direct("fetch big", TIMEOUT).await.unwrap();

        let second = &provider.requests()[1];
        let tool_msg = second.last().unwrap();
        assert!(tool_msg.text().ends_with(TRUNCATION_SUFFIX));
        assert!(tool_msg.text().len() <= max_tool_result_chars(20_000));
    }

    #[tokio::test]
    async fn provider_failure_fails_turn_without_history() {
        let (agent, _hub) = agent(Arc::new(FailingProvider));
        let err = agent.process_direct("hi", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::ApiError { status_code: 503, .. })));

        let session = agent.sessions().get_or_create(DIRECT_SESSION_KEY);
        assert!(session.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn deadline_exceeded() {
        let (agent, _hub) = agent(Arc::new(SlowProvider));
        let started = Instant::now();
        let err = agent
            .process_direct("hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(!agent.sessions().is_busy(DIRECT_SESSION_KEY));
        let session = agent.sessions().get_or_create(DIRECT_SESSION_KEY);
        assert!(session.lock().await.history.is_empty());
    }

    #[tokio::test]
    async fn promise_without_action_is_nudged() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::text("Let me look that up."),
            LlmResponse::text("It is sunny."),
        ]);
        let (agent, _hub) = agent(provider.clone());

        let answer = agent.process_direct("weather?", TIMEOUT).await.unwrap();
        assert_eq!(answer, "It is sunny.");

        let second = &provider.requests()[1];
        let n = second.len();
        assert_eq!(second[n - 2], Message::assistant("Let me look that up."));
        assert_eq!(second[n - 1], Message::user(INCOMPLETE_ACTION_NUDGE));
    }

    #[tokio::test]
    async fn nudges_are_limited() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::text("Let me check."),
            LlmResponse::text("I'll check now."),
            LlmResponse::text("Let me really check."),
        ]);
        let (agent, _hub) = agent(provider.clone());

        let answer = agent.process_direct("status?", TIMEOUT).await.unwrap();
        assert_eq!(answer, "I'll check now.");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn no_nudge_without_tools() {
        let provider = ScriptedProvider::new(vec![LlmResponse::text("Let me think.")]);
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(provider.clone(), hub.outbound.clone())
            .without_spawn()
            .build();
        assert!(agent.tools().is_empty());

        let answer = agent.process_direct("hmm", TIMEOUT).await.unwrap();
        assert_eq!(answer, "Let me think.");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn max_iterations_fallback() {
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(Arc::new(LoopingProvider), hub.outbound.clone())
            .with_tool(Box::new(EchoTool))
            .with_max_iterations(3)
            .build();

        let answer = agent.process_direct("loop forever", TIMEOUT).await.unwrap();
        assert_eq!(answer, MAX_ITERATIONS_MESSAGE);
    }

    #[tokio::test]
    async fn spawn_tool_registered_by_default() {
        let (agent, _hub) = agent(ScriptedProvider::new(vec![]));
        assert_eq!(agent.tools().names(), vec!["echo", "spawn"]);
    }

    #[tokio::test]
    async fn run_subagent_with_stub_echoes_task() {
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(Arc::new(StubProvider::new()), hub.outbound.clone()).build();

        let answer = agent
            .run_subagent(
                SubagentRequest {
                    session_key: "subagent:test-123".into(),
                    task: "what is 2+2?".into(),
                    timeout: TIMEOUT,
                    requester_channel: "discord".into(),
                    requester_chat_id: "456".into(),
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(answer.contains("2+2"), "got {answer}");
        assert!(!agent.sessions().contains("subagent:test-123"));
    }

    #[tokio::test]
    async fn subagent_is_isolated_from_parent() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(FileMemoryStore::new(dir.path()));
        memory.write(MemoryTarget::Long, "secret parent fact", true).await.unwrap();

        let provider = ScriptedProvider::new(vec![LlmResponse::text("parent answer"), LlmResponse::text("child answer")]);
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(provider.clone(), hub.outbound.clone())
            .with_memory(memory)
            .build();

        agent.process_direct("parent question", TIMEOUT).await.unwrap();
        let parent_prompt = provider.requests()[0].clone();
        assert!(parent_prompt.iter().any(|m| m.text().contains("secret parent fact")));

        agent
            .run_subagent(
                SubagentRequest {
                    session_key: "subagent:iso".into(),
                    task: "child task".into(),
                    timeout: TIMEOUT,
                    requester_channel: "cli".into(),
                    requester_chat_id: "direct".into(),
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let child_prompt = &provider.requests()[1];
        assert!(!child_prompt.iter().any(|m| m.text().contains("secret parent fact")));
        assert!(!child_prompt.iter().any(|m| m.text().contains("parent question")));
        assert_eq!(child_prompt.last().unwrap(), &Message::user("child task"));
    }

    #[tokio::test]
    async fn subagent_cancellation() {
        let hub = Hub::new(4);
        let agent = AgentLoop::builder(Arc::new(SlowProvider), hub.outbound.clone()).build();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = agent
            .run_subagent(
                SubagentRequest {
                    session_key: "subagent:c".into(),
                    task: "slow".into(),
                    timeout: TIMEOUT,
                    requester_channel: "cli".into(),
                    requester_chat_id: "direct".into(),
                },
                cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn inbound_loop_replies_per_session() {
        let provider = ScriptedProvider::new(vec![LlmResponse::text("hi telegram")]);
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(8);
        let agent = AgentLoop::builder(provider.clone(), outbound).build();
        let shutdown = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, shutdown.clone()));

        inbound_tx
            .send(InboundMessage::new("telegram", "u1", "42", "hello"))
            .await
            .unwrap();

        let reply = tokio::time::timeout(TIMEOUT, outbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(reply, OutboundMessage::new("telegram", "42", "hi telegram"));

        shutdown.cancel();
        runner.await.unwrap();

        let session = agent.sessions().get_or_create("telegram:42");
        assert_eq!(session.lock().await.history.len(), 2);
    }

    #[tokio::test]
    async fn inbound_failure_is_reported() {
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(8);
        let agent = AgentLoop::builder(Arc::new(FailingProvider), outbound).build();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, CancellationToken::new()));

        inbound_tx
            .send(InboundMessage::new("discord", "u", "7", "hello"))
            .await
            .unwrap();
        let reply = tokio::time::timeout(TIMEOUT, outbound_rx.recv()).await.unwrap().unwrap();
        assert!(reply.content.contains("overloaded"));

        drop(inbound_tx);
        runner.await.unwrap();
    }

    /// Answers "ack" after a fixed delay.
    struct DelayedProvider(Duration);

    #[async_trait]
    impl Provider for DelayedProvider {
        fn name(&self) -> &str {
            "delayed"
        }

        fn default_model(&self) -> &str {
            "delayed-model"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            tokio::time::sleep(self.0).await;
            Ok(LlmResponse::text("ack"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn inbound_turns_run_in_arrival_order() {
        let provider = ScriptedProvider::new(vec![]);
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(32);
        let agent = AgentLoop::builder(provider.clone(), outbound).build();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, CancellationToken::new()));

        let sent: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        for text in &sent {
            inbound_tx
                .send(InboundMessage::new("telegram", "u1", "42", text.as_str()))
                .await
                .unwrap();
        }
        for _ in &sent {
            tokio::time::timeout(TIMEOUT, outbound_rx.recv()).await.unwrap().unwrap();
        }
        drop(inbound_tx);
        runner.await.unwrap();

        let seen: Vec<String> = provider
            .requests()
            .iter()
            .map(|r| r.last().unwrap().text().to_string())
            .collect();
        assert_eq!(seen, sent);

        let session = agent.sessions().get_or_create("telegram:42");
        let history = session.lock().await.history.clone();
        let users: Vec<&str> = history.iter().filter_map(|h| h.strip_prefix("user: ")).collect();
        assert_eq!(users, sent.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_turn_deadline_starts_with_its_turn() {
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(8);
        let agent = AgentLoop::builder(Arc::new(DelayedProvider(Duration::from_millis(200))), outbound)
            .with_turn_timeout(Duration::from_millis(300))
            .build();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, CancellationToken::new()));

        for text in ["first", "second"] {
            inbound_tx
                .send(InboundMessage::new("slack", "u", "C1", text))
                .await
                .unwrap();
        }

        for _ in 0..2 {
            let reply = outbound_rx.recv().await.unwrap();
            assert_eq!(reply.content, "ack");
        }
        drop(inbound_tx);
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn reserved_identities_are_not_served_inbound() {
        let provider = ScriptedProvider::new(vec![]);
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(8);
        let agent = AgentLoop::builder(provider.clone(), outbound).build();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, CancellationToken::new()));

        for msg in [
            InboundMessage::new(SUBAGENT_CHANNEL, "u", "x", "sneaky"),
            InboundMessage::new(DIRECT_CHANNEL, "u", DIRECT_CHAT_ID, "collide"),
            InboundMessage::new("cli", "u", "tty1", "hello"),
        ] {
            inbound_tx.send(msg).await.unwrap();
        }

        let reply = tokio::time::timeout(TIMEOUT, outbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(reply.chat_id, "tty1");
        drop(inbound_tx);
        runner.await.unwrap();

        assert!(outbound_rx.try_recv().is_err());
        assert_eq!(provider.call_count(), 1);
        assert!(!agent.sessions().contains(DIRECT_SESSION_KEY));
        assert!(!agent.sessions().contains("subagent:x"));
    }

    #[tokio::test]
    async fn inbound_media_reaches_the_model() {
        use pincer_core::message::{Content, ContentPart};

        let provider = ScriptedProvider::new(vec![LlmResponse::text("nice photo")]);
        let Hub {
            inbound_tx,
            inbound_rx,
            outbound,
            mut outbound_rx,
        } = Hub::new(8);
        let agent = AgentLoop::builder(provider.clone(), outbound).build();
        let runner = tokio::spawn(Arc::clone(&agent).run(inbound_rx, CancellationToken::new()));

        inbound_tx
            .send(
                InboundMessage::new("telegram", "u1", "42", "look")
                    .with_media(vec!["https://img.example/cat.png".into()]),
            )
            .await
            .unwrap();
        let reply = tokio::time::timeout(TIMEOUT, outbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(reply.content, "nice photo");
        drop(inbound_tx);
        runner.await.unwrap();

        let request = provider.requests().remove(0);
        assert_eq!(
            request.last().unwrap().content,
            Content::Parts(vec![
                ContentPart::text("look"),
                ContentPart::image("https://img.example/cat.png"),
            ])
        );
    }
}
