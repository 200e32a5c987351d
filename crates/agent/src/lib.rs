//! The core agent loop for Pincer.
//!
//! A turn follows a **build → call → act** cycle:
//!
//! 1. **Receive** a message (inbound channel, direct call, or subagent task)
//! 2. **Build context** (persona, workspace documents, skills, memory, history)
//! 3. **Compact** older turns into a summary if the prompt outgrows the window
//! 4. **Send to LLM** via the configured provider
//! 5. **If tool calls**: execute tools, truncate and append results, loop back to step 4
//! 6. **If text response**: record the turn and return it
//!
//! The loop continues until the LLM responds with text only, the iteration
//! limit is reached, or the turn's deadline passes.

pub mod context;
pub mod heuristics;
pub mod loop_runner;
pub mod session;

pub use context::{
    ContextBuilder, build_user_content, compact_if_needed, estimate_tokens,
    max_tool_result_chars, parse_history_item, truncate_tool_result,
};
pub use heuristics::suggests_incomplete_action;
pub use loop_runner::{AgentLoop, AgentLoopBuilder, DIRECT_SESSION_KEY};
pub use session::{Session, SessionStore};
