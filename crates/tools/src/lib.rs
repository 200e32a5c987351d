//! Built-in tool implementations for Pincer.
//!
//! Tools give the agent the ability to act beyond a single reply: delegate
//! work to a background subagent, message the user mid-turn, fetch web
//! pages, and write notes to the workspace memory files.

pub mod message;
pub mod spawn;
pub mod supervisor;
pub mod web_fetch;
pub mod write_memory;

pub use message::MessageTool;
pub use spawn::{DEFAULT_SUBAGENT_TIMEOUT, SpawnTool, SubagentRequest, SubagentRunner};
pub use supervisor::{SubagentHandle, SubagentSupervisor};
pub use web_fetch::WebFetchTool;
pub use write_memory::WriteMemoryTool;
