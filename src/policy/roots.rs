//! Allowed-root path containment.
//!
//! Candidate paths are cleaned lexically: `.` segments are dropped and `..`
//! pops the previous component. Symlinks are never resolved for candidates,
//! so the check is a pure function of the path string and the roots.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Immutable set of absolute directories file-touching tools may access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Build the root set, canonicalizing each entry when it exists.
    ///
    /// Roots that do not exist yet are kept in lexically cleaned form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if a root is not absolute.
    pub fn new<I, P>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut out = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_absolute() {
                return Err(AppError::PathViolation(format!(
                    "allowed root must be absolute: {}",
                    root.display()
                )));
            }
            let resolved = root.canonicalize().unwrap_or_else(|_| clean_path(root));
            if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
        Ok(Self { roots: out })
    }

    /// The configured roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether `candidate` (absolute, or relative to `base`) is inside a root.
    #[must_use]
    pub fn is_allowed(&self, candidate: impl AsRef<Path>, base: &Path) -> bool {
        let candidate = candidate.as_ref();
        let absolute = if candidate.is_absolute() {
            clean_path(candidate)
        } else {
            clean_path(&base.join(candidate))
        };
        // `Path::starts_with` compares whole components, so `/srv/app-old`
        // is not inside `/srv/app`.
        self.roots.iter().any(|root| absolute.starts_with(root))
    }
}

/// Lexically normalize `path`, resolving `.` and `..` without touching disk.
///
/// `..` at the root stays at the root, as the kernel does.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                let at_root = matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if at_root {
                    if !normalized.has_root() {
                        normalized.push("..");
                    }
                } else if normalized.ends_with("..") {
                    normalized.push("..");
                } else {
                    normalized.pop();
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }
    normalized
}
