//! Prompt assembly and context-window management.
//!
//! - [`builder`]: ordered prompt from persona, workspace documents, skills,
//!   memory and history
//! - [`token`]: character-based token estimate
//! - [`compact`]: summarize older turns when the prompt outgrows the window
//! - [`truncate`]: cap individual tool results

pub mod builder;
pub mod compact;
pub mod token;
pub mod truncate;

pub use builder::{ContextBuilder, build_user_content, parse_history_item};
pub use compact::compact_if_needed;
pub use token::estimate_tokens;
pub use truncate::{max_tool_result_chars, truncate_tool_result};
