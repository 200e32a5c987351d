//! Prompt assembly.
//!
//! Builds the message list for one model call in a fixed order:
//!
//! | # | Message | Source |
//! |---|---------|--------|
//! | 1 | Persona | fixed |
//! | 2 | `## SOUL.md` … `## TOOLS.md` | workspace bootstrap documents, when present |
//! | 3 | Memory-write and anti-stall policy | fixed |
//! | 4 | `Available Skills:` | skill source, when non-empty |
//! | 5 | `Memory:` | pre-rendered memory context, when non-empty |
//! | 6 | `Relevant memories:` | ranked memory items, when non-empty |
//! | 7 | History replay | session history entries |
//! | 8 | Current user message | text, or text + image parts |
//!
//! Nothing here fails: missing documents, skills or memories are omitted.

use pincer_core::memory::{MemoryItem, MemoryRanker};
use pincer_core::message::{Content, ContentPart, Message, Role};
use pincer_core::skill::SkillSource;
use pincer_core::workspace::{BOOTSTRAP_FILES, DocumentReader};
use std::sync::Arc;
use tracing::{debug, warn};

pub const PERSONA: &str = "You are Pincer, a helpful assistant.";

pub const MEMORY_POLICY: &str = "If you decide something should be remembered, call the tool \
'write_memory' with JSON arguments: {\"target\": \"today\"|\"long\", \"content\": \"...\", \
\"append\": true|false}. Use a tool call rather than plain chat text when writing memory.";

pub const ANTI_STALL_POLICY: &str = "When you finish a task and the last step was using a tool, \
still give a normal conversational response so the user knows what you did. Never leave the \
user with only raw tool output. Never promise to do something without actually doing it; call \
the tools immediately.";

/// Text used for an image-only user message.
pub const IMAGE_PLACEHOLDER: &str = "[Image attached]";

pub const DEFAULT_MEMORY_TOP_K: usize = 5;

/// Split a `"<role>: <content>"` history entry.
///
/// `assistant` and `system` keep their role; `tool`, unknown roles and
/// entries without a separator replay as `user`.
pub fn parse_history_item(entry: &str) -> (Role, &str) {
    let Some((role, content)) = entry.split_once(": ") else {
        return (Role::User, entry.trim());
    };
    let role = match role.trim().to_lowercase().as_str() {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    };
    (role, content.trim())
}

/// The current user turn: plain text, or a text part followed by one image
/// part per media URL in order.
pub fn build_user_content(text: &str, media: &[String]) -> Content {
    if media.is_empty() {
        return Content::Text(text.to_string());
    }
    let text = if text.trim().is_empty() {
        IMAGE_PLACEHOLDER
    } else {
        text
    };
    let mut parts = Vec::with_capacity(media.len() + 1);
    parts.push(ContentPart::text(text));
    parts.extend(media.iter().map(ContentPart::image));
    Content::Parts(parts)
}

/// Assembles the prompt for each model call.
#[derive(Clone, Default)]
pub struct ContextBuilder {
    workspace: Option<Arc<dyn DocumentReader>>,
    ranker: Option<Arc<dyn MemoryRanker>>,
    skills: Option<Arc<dyn SkillSource>>,
    top_k: usize,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            top_k: DEFAULT_MEMORY_TOP_K,
            ..Default::default()
        }
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn DocumentReader>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn MemoryRanker>, top_k: usize) -> Self {
        self.ranker = Some(ranker);
        self.top_k = top_k;
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillSource>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Assemble the ordered message list for one model call.
    ///
    /// `channel` and `chat_id` identify the session for logging only.
    #[allow(clippy::too_many_arguments)]
    pub fn build_messages(
        &self,
        history: &[String],
        current_message: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
        memory_context: &str,
        memories: &[MemoryItem],
    ) -> Vec<Message> {
        let mut msgs = Vec::with_capacity(history.len() + 10);
        msgs.push(Message::system(PERSONA));

        // --- Workspace documents ---
        if let Some(workspace) = &self.workspace {
            for name in BOOTSTRAP_FILES {
                if let Some(doc) = workspace.read_document(name) {
                    let doc = doc.trim();
                    if !doc.is_empty() {
                        msgs.push(Message::system(format!("## {name}\n\n{doc}")));
                    }
                }
            }
        }

        msgs.push(Message::system(MEMORY_POLICY));
        msgs.push(Message::system(ANTI_STALL_POLICY));

        // --- Skills ---
        if let Some(skills) = self.load_skills() {
            msgs.push(Message::system(skills));
        }

        // --- Memory ---
        if !memory_context.is_empty() {
            msgs.push(Message::system(format!("Memory:\n{memory_context}")));
        }
        let selected = self.select_memories(current_message, memories);
        if !selected.is_empty() {
            let mut block = String::from("Relevant memories:\n");
            for item in &selected {
                block.push_str(&format!("- {} ({})\n", item.text, item.kind));
            }
            msgs.push(Message::system(block));
        }

        // --- History replay ---
        for entry in history.iter().filter(|h| !h.is_empty()) {
            let (role, content) = parse_history_item(entry);
            msgs.push(match role {
                Role::Assistant => Message::assistant(content),
                Role::System => Message::system(content),
                _ => Message::user(content),
            });
        }

        msgs.push(Message::user(build_user_content(current_message, media)));

        debug!(
            channel,
            chat_id,
            history = history.len(),
            memories = selected.len(),
            messages = msgs.len(),
            "Context built"
        );
        msgs
    }

    fn load_skills(&self) -> Option<String> {
        let source = self.skills.as_ref()?;
        let skills = match source.load_all() {
            Ok(skills) => skills,
            Err(e) => {
                warn!(error = %e, "Failed to load skills");
                return None;
            }
        };
        if skills.is_empty() {
            return None;
        }

        let mut block = String::from("Available Skills:\n");
        for skill in &skills {
            block.push_str(&format!(
                "\n## {}\n{}\n\n{}\n",
                skill.name, skill.description, skill.content
            ));
        }
        Some(block)
    }

    /// Ranked subset when a ranker is configured; otherwise the first
    /// `top_k` items in the order given.
    fn select_memories(&self, query: &str, memories: &[MemoryItem]) -> Vec<MemoryItem> {
        if memories.is_empty() {
            return Vec::new();
        }
        match &self.ranker {
            Some(ranker) => ranker.rank(query, memories, self.top_k),
            None => memories.iter().take(self.top_k).cloned().collect(),
        }
    }
}
