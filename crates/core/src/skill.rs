//! Skills: named instruction bundles offered to the model.

use crate::error::SkillError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A loaded skill definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// The skill body (instructions)
    pub content: String,
}

/// Where skills come from. Loading failures are not fatal to a turn; the
/// context builder logs them and carries on without skills.
pub trait SkillSource: Send + Sync {
    fn load_all(&self) -> std::result::Result<Vec<Skill>, SkillError>;
}

/// A fixed set of skills, for embedding and tests.
impl SkillSource for Vec<Skill> {
    fn load_all(&self) -> std::result::Result<Vec<Skill>, SkillError> {
        Ok(self.clone())
    }
}

/// Skills stored as markdown files in a directory, one skill per `*.md`.
///
/// The file stem is the skill name, the first non-empty line (heading marks
/// stripped) its description, and the remainder its content. A missing
/// directory holds no skills.
#[derive(Debug, Clone)]
pub struct SkillDirectory {
    dir: PathBuf,
}

impl SkillDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SkillSource for SkillDirectory {
    fn load_all(&self) -> std::result::Result<Vec<Skill>, SkillError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SkillError::LoadFailed(format!("{}: {e}", self.dir.display())));
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        paths.iter().map(|p| read_skill(p)).collect()
    }
}

fn read_skill(path: &Path) -> std::result::Result<Skill, SkillError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SkillError::LoadFailed(format!("{}: {e}", path.display())))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let text = text.trim();
    let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
    Ok(Skill {
        name,
        description: first.trim_start_matches('#').trim().to_string(),
        content: rest.trim().to_string(),
    })
}
