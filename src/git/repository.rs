//! The Repo Store: the bare repository backing every worktree.
//!
//! A cheap, `Clone`-able handle onto `<root>`, the same shape this
//! codebase's own `Repository` type takes — construction never touches the
//! filesystem beyond `root`'s own existence, and every git invocation is
//! funneled through [`crate::exec::Cmd`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::GcPolicy;
use crate::error::SyncError;
use crate::exec::Cmd;
use crate::git::CommitHash;

#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Repository { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure `<root>` is a valid bare repository with `origin` set to
    /// `remote_url`, creating or repairing it as needed.
    ///
    /// If `root` exists but fails [`Repository::sanity_check`], its
    /// *contents* are wiped (not the directory itself, which may be a mount
    /// point) and initialization is retried once.
    pub fn init_or_validate(&self, remote_url: &str, dir_mode: u32) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| SyncError::Io {
                context: format!("creating repo root {}", self.root.display()),
                source: e,
            })?;
            set_mode(&self.root, dir_mode);
        } else if self.root.read_dir().map(|mut d| d.next().is_some()).unwrap_or(false)
            && self.sanity_check().is_err()
        {
            self.wipe_contents()?;
        }

        if self.root.read_dir().map(|mut d| d.next().is_none()).unwrap_or(true) {
            Cmd::new("git")
                .arg("init")
                .arg("-b")
                .arg("git-sync")
                .dir(&self.root)
                .context("repo-store")
                .run()?;
        }

        self.sanity_check()?;
        self.ensure_origin(remote_url)?;
        Ok(())
    }

    fn wipe_contents(&self) -> Result<(), SyncError> {
        for entry in std::fs::read_dir(&self.root).map_err(|e| SyncError::Io {
            context: format!("reading repo root {}", self.root.display()),
            source: e,
        })? {
            let entry = entry.map_err(|e| SyncError::Io {
                context: "reading directory entry".into(),
                source: e,
            })?;
            let path = entry.path();
            let result = if path.is_dir() { std::fs::remove_dir_all(&path) } else { std::fs::remove_file(&path) };
            result.map_err(|e| SyncError::Io {
                context: format!("removing {}", path.display()),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Structural validity: `rev-parse --show-toplevel` resolves to `root`
    /// and `fsck --connectivity-only` succeeds, with no leftover shallow
    /// fetch lock.
    pub fn sanity_check(&self) -> Result<(), SyncError> {
        if self.root.join("shallow.lock").exists() {
            return Err(SyncError::Structural("leftover shallow.lock from an interrupted fetch".into()));
        }

        let toplevel = Cmd::new("git")
            .arg("rev-parse")
            .arg("--show-toplevel")
            .dir(&self.root)
            .context("repo-store")
            .run()
            .map_err(|e| SyncError::Structural(format!("rev-parse --show-toplevel failed: {e}")))?;

        let toplevel_path = crate::path::AbsPath::canonicalize(toplevel.stdout.trim())
            .map_err(|e| SyncError::Structural(format!("resolving reported toplevel: {e}")))?;
        let expected = crate::path::AbsPath::canonicalize(&self.root)
            .map_err(|e| SyncError::Structural(format!("resolving repo root: {e}")))?;
        if toplevel_path != expected {
            return Err(SyncError::Structural(format!(
                "git reports toplevel {toplevel_path} but expected {expected}"
            )));
        }

        Cmd::new("git")
            .arg("fsck")
            .arg("--no-progress")
            .arg("--connectivity-only")
            .dir(&self.root)
            .context("repo-store")
            .run()
            .map_err(|e| SyncError::Structural(format!("fsck failed: {e}")))?;

        Ok(())
    }

    fn ensure_origin(&self, remote_url: &str) -> Result<(), SyncError> {
        let remotes = Cmd::new("git")
            .arg("remote")
            .dir(&self.root)
            .context("repo-store")
            .run()?;

        if remotes.stdout.lines().any(|l| l.trim() == "origin") {
            Cmd::new("git")
                .arg("remote")
                .arg("set-url")
                .arg("origin")
                .arg(remote_url)
                .dir(&self.root)
                .context("repo-store")
                .run()?;
        } else {
            Cmd::new("git")
                .arg("remote")
                .arg("add")
                .arg("origin")
                .arg(remote_url)
                .dir(&self.root)
                .context("repo-store")
                .run()?;
        }
        Ok(())
    }

    /// `fetch origin <rev>`, appending `--depth`/`--unshallow` as configured,
    /// then resolve `FETCH_HEAD^{}` (peeling annotated tags) to a commit hash.
    pub fn fetch_and_resolve(
        &self,
        rev: &str,
        depth: u32,
        envs: &HashMap<String, String>,
        deadline: Duration,
    ) -> Result<CommitHash, SyncError> {
        let mut cmd = Cmd::new("git")
            .arg("fetch")
            .arg("origin")
            .arg(rev)
            .arg("--verbose")
            .arg("--no-progress")
            .arg("--prune")
            .arg("--no-auto-gc")
            .dir(&self.root)
            .envs(envs)
            .context("repo-store")
            .deadline(deadline);

        if depth > 0 {
            cmd = cmd.arg("--depth").arg(depth.to_string());
        } else if self.is_shallow()? {
            cmd = cmd.arg("--unshallow");
        }

        cmd.run()?;

        let resolved = Cmd::new("git")
            .arg("rev-parse")
            .arg("FETCH_HEAD^{}")
            .dir(&self.root)
            .context("repo-store")
            .run()?;

        Ok(CommitHash::new(resolved.stdout.trim().to_string()))
    }

    fn is_shallow(&self) -> Result<bool, SyncError> {
        let out = Cmd::new("git")
            .arg("rev-parse")
            .arg("--is-shallow-repository")
            .dir(&self.root)
            .context("repo-store")
            .run()?;
        Ok(out.stdout.trim() == "true")
    }

    /// `reset --soft <hash>` so subsequent fetches stay cheap.
    pub fn reset_soft(&self, hash: &CommitHash) -> Result<(), SyncError> {
        Cmd::new("git")
            .arg("reset")
            .arg("--soft")
            .arg(hash.as_str())
            .arg("--")
            .dir(&self.root)
            .context("repo-store")
            .run()?;
        Ok(())
    }

    /// Remove worktrees under `.worktrees/` older than `retention`, other
    /// than `keep`, then prune/expire/GC. Returns whether any worktree was
    /// actually removed (maintenance below that is skipped entirely when
    /// nothing was stale, per the orchestrator's tick algorithm).
    pub fn run_maintenance(
        &self,
        worktrees_dir: &Path,
        keep: &CommitHash,
        retention: Duration,
        gc: GcPolicy,
    ) -> Result<bool, SyncError> {
        let removed = self.remove_stale_worktrees(worktrees_dir, keep, retention)?;
        if !removed {
            return Ok(false);
        }

        Cmd::new("git")
            .arg("worktree")
            .arg("prune")
            .arg("--verbose")
            .dir(&self.root)
            .context("repo-store")
            .run()?;

        Cmd::new("git")
            .arg("reflog")
            .arg("expire")
            .arg("--expire-unreachable=all")
            .arg("--all")
            .dir(&self.root)
            .context("repo-store")
            .run()?;

        match gc {
            GcPolicy::Off => {}
            GcPolicy::Auto => {
                Cmd::new("git").arg("gc").arg("--auto").dir(&self.root).context("repo-store").run()?;
            }
            GcPolicy::Always => {
                Cmd::new("git").arg("gc").dir(&self.root).context("repo-store").run()?;
            }
            GcPolicy::Aggressive => {
                Cmd::new("git").arg("gc").arg("--aggressive").dir(&self.root).context("repo-store").run()?;
            }
        }

        Ok(true)
    }

    fn remove_stale_worktrees(
        &self,
        worktrees_dir: &Path,
        keep: &CommitHash,
        retention: Duration,
    ) -> Result<bool, SyncError> {
        let Ok(entries) = std::fs::read_dir(worktrees_dir) else { return Ok(false) };
        let mut removed_any = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name == keep.as_str() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(age) = metadata.modified().and_then(|m| m.elapsed().map_err(std::io::Error::other)) else {
                continue;
            };
            if age < retention {
                continue;
            }
            std::fs::remove_dir_all(&path).map_err(|e| SyncError::Io {
                context: format!("removing stale worktree {}", path.display()),
                source: e,
            })?;
            removed_any = true;
        }

        Ok(removed_any)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(mode);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::init_origin_with_commit;

    #[test]
    fn init_or_validate_creates_bare_repo_in_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let repo = Repository::at(&root);
        repo.init_or_validate("https://example.com/x.git", 0o775).unwrap();
        assert!(root.join("HEAD").exists());
        repo.sanity_check().unwrap();
    }

    #[test]
    fn init_or_validate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let repo = Repository::at(&root);
        repo.init_or_validate("https://example.com/x.git", 0o775).unwrap();
        repo.init_or_validate("https://example.com/x.git", 0o775).unwrap();
        repo.sanity_check().unwrap();
    }

    #[test]
    fn fetch_and_resolve_returns_head_commit() {
        let (origin, expected_hash) = init_origin_with_commit();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mirror");
        let repo = Repository::at(&root);
        let url = origin.path().display().to_string();
        repo.init_or_validate(&url, 0o775).unwrap();

        let hash = repo
            .fetch_and_resolve("main", 0, &HashMap::new(), Duration::from_secs(30))
            .unwrap();
        assert_eq!(hash.as_str(), expected_hash.as_str());
    }

    #[test]
    fn ensure_origin_updates_existing_remote_url() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let repo = Repository::at(&root);
        repo.init_or_validate("https://example.com/first.git", 0o775).unwrap();
        repo.init_or_validate("https://example.com/second.git", 0o775).unwrap();

        let out = Cmd::new("git")
            .arg("remote")
            .arg("get-url")
            .arg("origin")
            .dir(&root)
            .run()
            .unwrap();
        assert_eq!(out.stdout.trim(), "https://example.com/second.git");
    }
}
