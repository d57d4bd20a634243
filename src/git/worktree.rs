//! The Worktree Manager: materializing one commit as a checked-out directory
//! under `.worktrees/<hash>/`.

use std::path::{Path, PathBuf};

use crate::config::SubmodulePolicy;
use crate::error::SyncError;
use crate::exec::Cmd;
use crate::git::CommitHash;

pub struct WorktreeManager {
    bare_repo: PathBuf,
    worktrees_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(bare_repo: impl Into<PathBuf>, worktrees_dir: impl Into<PathBuf>) -> Self {
        WorktreeManager {
            bare_repo: bare_repo.into(),
            worktrees_dir: worktrees_dir.into(),
        }
    }

    pub fn path_for(&self, hash: &CommitHash) -> PathBuf {
        self.worktrees_dir.join(hash.as_str())
    }

    /// Build a fully checked-out worktree for `hash`. Any pre-existing
    /// directory at the target path (e.g. left over from a crash mid-build)
    /// is removed first so a half-built worktree can never be mistaken for a
    /// complete one.
    pub fn build(
        &self,
        hash: &CommitHash,
        sparse_checkout_file: Option<&Path>,
        submodules: SubmodulePolicy,
        submodule_depth: u32,
    ) -> Result<PathBuf, SyncError> {
        let path = self.path_for(hash);

        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| SyncError::Io {
                context: format!("removing stale worktree at {}", path.display()),
                source: e,
            })?;
            Cmd::new("git")
                .arg("worktree")
                .arg("prune")
                .dir(&self.bare_repo)
                .context("worktree-manager")
                .run()?;
        }

        std::fs::create_dir_all(&self.worktrees_dir).map_err(|e| SyncError::Io {
            context: format!("creating {}", self.worktrees_dir.display()),
            source: e,
        })?;

        Cmd::new("git")
            .arg("worktree")
            .arg("add")
            .arg("--force")
            .arg("--detach")
            .arg(path.display().to_string())
            .arg(hash.as_str())
            .arg("--no-checkout")
            .dir(&self.bare_repo)
            .context("worktree-manager")
            .run()?;

        self.rewrite_gitdir_relative(&path)?;
        self.configure_sparse_checkout(hash, &path, sparse_checkout_file)?;

        Cmd::new("git")
            .arg("reset")
            .arg("--hard")
            .arg(hash.as_str())
            .arg("--")
            .dir(&path)
            .context("worktree-manager")
            .run()?;

        if submodules != SubmodulePolicy::Off {
            let mut cmd = Cmd::new("git")
                .arg("submodule")
                .arg("update")
                .arg("--init")
                .dir(&path)
                .context("worktree-manager");
            if submodules == SubmodulePolicy::Recursive {
                cmd = cmd.arg("--recursive");
            }
            if submodule_depth > 0 {
                cmd = cmd.arg("--depth").arg(submodule_depth.to_string());
            }
            cmd.run()?;
        }

        Ok(path)
    }

    /// `git worktree add` writes `<path>/.git` as `gitdir: <absolute path>`;
    /// rewrite it relative to `path` so the worktree survives being moved or
    /// bind-mounted to a different absolute location alongside the bare repo.
    fn rewrite_gitdir_relative(&self, worktree_path: &Path) -> Result<(), SyncError> {
        let git_file = worktree_path.join(".git");
        let contents = std::fs::read_to_string(&git_file).map_err(|e| SyncError::Io {
            context: format!("reading {}", git_file.display()),
            source: e,
        })?;

        let Some(abs_gitdir) = contents.trim().strip_prefix("gitdir: ") else {
            return Err(SyncError::Structural(format!("{} has unexpected contents", git_file.display())));
        };

        let relative = pathdiff::diff_paths(abs_gitdir, worktree_path).unwrap_or_else(|| PathBuf::from(abs_gitdir));

        std::fs::write(&git_file, format!("gitdir: {}\n", relative.display())).map_err(|e| SyncError::Io {
            context: format!("rewriting {}", git_file.display()),
            source: e,
        })
    }

    fn configure_sparse_checkout(
        &self,
        hash: &CommitHash,
        worktree_path: &Path,
        sparse_checkout_file: Option<&Path>,
    ) -> Result<(), SyncError> {
        let info_dir = self.bare_repo.join(".git").join("worktrees").join(hash.as_str()).join("info");

        match sparse_checkout_file {
            None => {
                let target = info_dir.join("sparse-checkout");
                if target.exists() {
                    std::fs::remove_file(&target).map_err(|e| SyncError::Io {
                        context: format!("removing {}", target.display()),
                        source: e,
                    })?;
                }
            }
            Some(src) => {
                std::fs::create_dir_all(&info_dir).map_err(|e| SyncError::Io {
                    context: format!("creating {}", info_dir.display()),
                    source: e,
                })?;
                std::fs::copy(src, info_dir.join("sparse-checkout")).map_err(|e| SyncError::Io {
                    context: format!("copying sparse-checkout file from {}", src.display()),
                    source: e,
                })?;
                Cmd::new("git")
                    .arg("sparse-checkout")
                    .arg("init")
                    .dir(worktree_path)
                    .context("worktree-manager")
                    .run()?;
            }
        }
        Ok(())
    }

    /// `rev-parse HEAD` matches `hash`, the directory is non-empty, and
    /// `fsck --connectivity-only` succeeds against the bare repo.
    pub fn sanity_check(&self, hash: &CommitHash) -> Result<(), SyncError> {
        let path = self.path_for(hash);
        if !path.exists() || path.read_dir().map(|mut d| d.next().is_none()).unwrap_or(true) {
            return Err(SyncError::Structural(format!("worktree {} is missing or empty", path.display())));
        }

        let head = Cmd::new("git")
            .arg("rev-parse")
            .arg("HEAD")
            .dir(&path)
            .context("worktree-manager")
            .run()
            .map_err(|e| SyncError::Structural(format!("rev-parse HEAD failed in worktree: {e}")))?;

        if head.stdout.trim() != hash.as_str() {
            return Err(SyncError::Structural(format!(
                "worktree HEAD {} does not match expected {hash}",
                head.stdout.trim()
            )));
        }

        Cmd::new("git")
            .arg("fsck")
            .arg("--no-progress")
            .arg("--connectivity-only")
            .dir(&self.bare_repo)
            .context("worktree-manager")
            .run()
            .map_err(|e| SyncError::Structural(format!("fsck failed: {e}")))?;

        Ok(())
    }

    /// Update a worktree directory's mtime to now, starting its retention
    /// timer fresh from the moment it stops being the published one.
    pub fn touch(&self, hash: &CommitHash) -> Result<(), SyncError> {
        let path = self.path_for(hash);
        let now = std::time::SystemTime::now();
        let times = std::fs::FileTimes::new().set_modified(now).set_accessed(now);
        let file = std::fs::File::open(&path).map_err(|e| SyncError::Io {
            context: format!("opening {} to touch mtime", path.display()),
            source: e,
        })?;
        file.set_times(times).map_err(|e| SyncError::Io {
            context: format!("updating mtime of {}", path.display()),
            source: e,
        })
    }

    pub fn remove(&self, hash: &CommitHash) -> Result<(), SyncError> {
        let path = self.path_for(hash);
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| SyncError::Io {
                context: format!("removing worktree {}", path.display()),
                source: e,
            })?;
        }
        Cmd::new("git")
            .arg("worktree")
            .arg("prune")
            .dir(&self.bare_repo)
            .context("worktree-manager")
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Repository;
    use crate::testutil::init_origin_with_commit;
    use std::collections::HashMap;
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, Repository, WorktreeManager, CommitHash) {
        let (origin, _) = init_origin_with_commit();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mirror");
        let repo = Repository::at(&root);
        let url = origin.path().display().to_string();
        repo.init_or_validate(&url, 0o775).unwrap();
        let hash = repo.fetch_and_resolve("main", 0, &HashMap::new(), Duration::from_secs(30)).unwrap();
        let worktrees_dir = root.join(".worktrees");
        let mgr = WorktreeManager::new(&root, &worktrees_dir);
        (dir, repo, mgr, hash)
    }

    #[test]
    fn build_materializes_checked_out_files() {
        let (_dir, _repo, mgr, hash) = setup();
        let path = mgr.build(&hash, None, SubmodulePolicy::Off, 0).unwrap();
        assert!(path.join("README.md").exists());
        mgr.sanity_check(&hash).unwrap();
    }

    #[test]
    fn build_removes_stale_partial_worktree_first() {
        let (_dir, _repo, mgr, hash) = setup();
        let path = mgr.path_for(&hash);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("garbage"), "partial").unwrap();

        let rebuilt = mgr.build(&hash, None, SubmodulePolicy::Off, 0).unwrap();
        assert!(rebuilt.join("README.md").exists());
        assert!(!rebuilt.join("garbage").exists());
    }

    #[test]
    fn sanity_check_fails_on_missing_worktree() {
        let (_dir, _repo, mgr, hash) = setup();
        assert!(mgr.sanity_check(&hash).is_err());
    }

    #[test]
    fn remove_deletes_worktree_directory() {
        let (_dir, _repo, mgr, hash) = setup();
        mgr.build(&hash, None, SubmodulePolicy::Off, 0).unwrap();
        mgr.remove(&hash).unwrap();
        assert!(!mgr.path_for(&hash).exists());
    }

    #[test]
    fn build_rewrites_gitdir_as_relative() {
        let (_dir, _repo, mgr, hash) = setup();
        let path = mgr.build(&hash, None, SubmodulePolicy::Off, 0).unwrap();
        let contents = std::fs::read_to_string(path.join(".git")).unwrap();
        let gitdir = contents.trim().strip_prefix("gitdir: ").unwrap();
        assert!(!Path::new(gitdir).is_absolute(), "expected relative gitdir, got {gitdir}");
        // And it must still resolve correctly to the worktree's actual metadata dir.
        assert!(path.join(gitdir).join("HEAD").exists());
    }

    #[test]
    fn touch_updates_worktree_mtime() {
        let (_dir, _repo, mgr, hash) = setup();
        let path = mgr.build(&hash, None, SubmodulePolicy::Off, 0).unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        mgr.touch(&hash).unwrap();
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(after > before);
    }
}
