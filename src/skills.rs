//! Skill lookup.
//!
//! Skills are folders of markdown instructions the agent can pull in on
//! demand. The [`SkillStore`] trait is the seam; [`DirSkillStore`] serves
//! `<dir>/<name>/SKILL.md` plus any supporting files next to it.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::{AppError, Result};

/// File that holds a skill's main instructions.
pub const SKILL_FILE: &str = "SKILL.md";

/// A skill as listed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSummary {
    /// Folder name, used to load the skill.
    pub name: String,
    /// First meaningful line of `SKILL.md`.
    pub description: String,
}

/// Source of skills.
pub trait SkillStore: Send + Sync {
    /// List all available skills, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Skill` if the store cannot be read.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SkillSummary>>> + Send + '_>>;

    /// Load a skill's main instructions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Skill` for invalid names and `AppError::NotFound`
    /// for unknown skills.
    fn load(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Load a supporting file that lives inside a skill's folder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` for absolute or `..` paths (before any
    /// file system access) and `AppError::NotFound` for missing files.
    fn load_supporting(
        &self,
        name: &str,
        relative_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// Validate a skill name: one plain path component.
///
/// # Errors
///
/// Returns `AppError::Skill` if `name` is empty or is not a single normal
/// component.
pub fn validate_skill_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::Skill(format!("invalid skill name: {name:?}"))),
    }
}

/// Validate a supporting-file path: relative, no `..`, no root or prefix.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if the path could leave the skill folder.
pub fn validate_relative_path(relative_path: &str) -> Result<PathBuf> {
    if relative_path.trim().is_empty() {
        return Err(AppError::PathViolation("relative path is empty".into()));
    }

    let path = Path::new(relative_path);
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(AppError::PathViolation(format!(
                    "relative path must not contain `..`: {relative_path}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(format!(
                    "relative path must not be absolute: {relative_path}"
                )));
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(AppError::PathViolation(format!(
            "relative path names no file: {relative_path}"
        )));
    }
    Ok(cleaned)
}

/// [`SkillStore`] backed by a directory of skill folders.
#[derive(Debug, Clone)]
pub struct DirSkillStore {
    root: PathBuf,
}

impl DirSkillStore {
    /// Serve skills from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(path: &Path, what: &str) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("{what} not found")))
            }
            Err(err) => Err(AppError::Skill(format!("cannot read {what}: {err}"))),
        }
    }
}

impl SkillStore for DirSkillStore {
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SkillSummary>>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&self.root)
                .await
                .map_err(|e| AppError::Skill(format!("cannot list skills: {e}")))?;

            let mut skills = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AppError::Skill(format!("cannot list skills: {e}")))?
            {
                let skill_file = entry.path().join(SKILL_FILE);
                let Ok(body) = tokio::fs::read_to_string(&skill_file).await else {
                    continue;
                };
                skills.push(SkillSummary {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    description: describe(&body),
                });
            }

            skills.sort_by(|a, b| a.name.cmp(&b.name));
            debug!(count = skills.len(), "skills listed");
            Ok(skills)
        })
    }

    fn load(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let name = name.to_owned();
        Box::pin(async move {
            validate_skill_name(&name)?;
            let path = self.root.join(&name).join(SKILL_FILE);
            Self::read(&path, &format!("skill '{name}'")).await
        })
    }

    fn load_supporting(
        &self,
        name: &str,
        relative_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let name = name.to_owned();
        let relative_path = relative_path.to_owned();
        Box::pin(async move {
            validate_skill_name(&name)?;
            let rel = validate_relative_path(&relative_path)?;
            let path = self.root.join(&name).join(rel);
            Self::read(&path, &format!("file '{relative_path}' of skill '{name}'")).await
        })
    }
}

/// First non-empty line with markdown heading markers stripped.
fn describe(body: &str) -> String {
    body.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty() && *line != "---")
        .unwrap_or_default()
        .to_owned()
}
