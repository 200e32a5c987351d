//! # Pincer Core
//!
//! Domain types, traits, and error definitions for the Pincer agent runtime.
//! This crate has no framework dependencies beyond tokio's sync primitives.
//! It defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is defined as a trait here
//! (model provider, memory ranker, skill source, workspace reader, tools).
//! Implementations live in their respective crates, which keeps the
//! dependency graph pointing inward and makes scripted test doubles trivial.

pub mod error;
pub mod event;
pub mod hub;
pub mod memory;
pub mod message;
pub mod provider;
pub mod skill;
pub mod tool;
pub mod workspace;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use hub::{Hub, InboundMessage, OutboundMessage, OutboundSink};
pub use memory::{MemoryItem, MemoryKind, MemoryRanker};
pub use message::{Content, ContentPart, Message, Role, ToolCall};
pub use provider::{LlmResponse, Provider, ToolDefinition, Usage};
pub use skill::{Skill, SkillDirectory, SkillSource};
pub use tool::{
    SUBAGENT_CHANNEL, SUBAGENT_SESSION_PREFIX, Tool, ToolContext, ToolRegistry, ToolResult,
    parse_arguments,
};
pub use workspace::{BOOTSTRAP_FILES, DocumentReader, FsWorkspace};
