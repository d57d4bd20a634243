//! Bare repository and worktree management — the Repo Store and Worktree
//! Manager. Split the way this codebase splits its own git layer: a
//! `repository` module owning the bare repo's lifecycle, and a `worktree`
//! module owning per-commit checkouts.

pub mod repository;
pub mod worktree;

pub use repository::Repository;
pub use worktree::WorktreeManager;

/// A 40-character (or shorter, abbreviated) hex commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(hash: impl Into<String>) -> Self {
        CommitHash(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CommitHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
