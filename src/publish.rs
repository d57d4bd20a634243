//! The Publisher: the atomic symlink flip consumers rely on.
//!
//! `<link>` either doesn't exist yet, or resolves fully to a complete
//! worktree — readers must never observe an in-progress publication. That's
//! achieved with `symlink` to a temporary name followed by `rename` over the
//! real link path, the only step visible to consumers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SyncError;
use crate::git::CommitHash;

pub struct Publisher {
    link_path: PathBuf,
    touch_file: Option<PathBuf>,
    ready: Arc<AtomicBool>,
}

impl Publisher {
    pub fn new(link_path: PathBuf, touch_file: Option<PathBuf>, ready: Arc<AtomicBool>) -> Self {
        Publisher { link_path, touch_file, ready }
    }

    /// Flip `link_path` to point at `worktree_path`, computing the link
    /// target relative to the link's parent directory so the whole
    /// arrangement survives being bind-mounted elsewhere.
    pub fn publish(&self, worktree_path: &Path) -> Result<(), SyncError> {
        let link_dir = self.link_path.parent().ok_or_else(|| {
            SyncError::Config(format!("link path {} has no parent directory", self.link_path.display()))
        })?;
        std::fs::create_dir_all(link_dir).map_err(|e| SyncError::Io {
            context: format!("creating {}", link_dir.display()),
            source: e,
        })?;

        let relative_target = pathdiff::diff_paths(worktree_path, link_dir).unwrap_or_else(|| worktree_path.to_path_buf());

        let tmp_link = link_dir.join(format!(".gitsync-link-{}.tmp", std::process::id()));
        if tmp_link.exists() || tmp_link.symlink_metadata().is_ok() {
            let _ = std::fs::remove_file(&tmp_link);
        }

        symlink(&relative_target, &tmp_link).map_err(|e| SyncError::Io {
            context: format!("creating temporary symlink at {}", tmp_link.display()),
            source: e,
        })?;

        std::fs::rename(&tmp_link, &self.link_path).map_err(|e| SyncError::Io {
            context: format!("renaming into place at {}", self.link_path.display()),
            source: e,
        })?;

        Ok(())
    }

    /// Update (or create) the configured touch-file's mtime.
    pub fn touch(&self) -> Result<(), SyncError> {
        let Some(touch_file) = &self.touch_file else { return Ok(()) };
        if let Some(parent) = touch_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::Io {
                context: format!("creating {}", parent.display()),
                source: e,
            })?;
        }
        let file = std::fs::File::options()
            .write(true)
            .create(true)
            .open(touch_file)
            .map_err(|e| SyncError::Io { context: format!("touching {}", touch_file.display()), source: e })?;
        let now = std::time::SystemTime::now();
        let times = std::fs::FileTimes::new().set_modified(now).set_accessed(now);
        file.set_times(times).map_err(|e| SyncError::Io {
            context: format!("updating mtime of {}", touch_file.display()),
            source: e,
        })
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Read the currently-published hash, if any, from `basename(readlink(link))`.
    pub fn current_hash(&self) -> Option<CommitHash> {
        let target = std::fs::read_link(&self.link_path).ok()?;
        let name = target.file_name()?.to_str()?;
        Some(CommitHash::new(name.to_string()))
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher_for(dir: &Path) -> (Publisher, Arc<AtomicBool>) {
        let ready = Arc::new(AtomicBool::new(false));
        (Publisher::new(dir.join("link"), Some(dir.join("touch")), ready.clone()), ready)
    }

    #[test]
    fn publish_creates_link_pointing_at_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let worktree = dir.path().join("wt");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(worktree.join("file"), "x").unwrap();

        let (publisher, _ready) = publisher_for(dir.path());
        publisher.publish(&worktree).unwrap();

        let link = dir.path().join("link");
        assert!(link.join("file").exists());
        assert_eq!(publisher.current_hash().unwrap().as_str(), "wt");
    }

    #[test]
    fn publish_is_atomic_across_repeated_calls() {
        let dir = tempfile::tempdir().unwrap();
        let wt1 = dir.path().join("abc");
        let wt2 = dir.path().join("def");
        std::fs::create_dir_all(&wt1).unwrap();
        std::fs::create_dir_all(&wt2).unwrap();

        let (publisher, _ready) = publisher_for(dir.path());
        publisher.publish(&wt1).unwrap();
        assert_eq!(publisher.current_hash().unwrap().as_str(), "abc");
        publisher.publish(&wt2).unwrap();
        assert_eq!(publisher.current_hash().unwrap().as_str(), "def");
    }

    #[test]
    fn set_ready_updates_shared_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, ready) = publisher_for(dir.path());
        assert!(!ready.load(Ordering::SeqCst));
        publisher.set_ready();
        assert!(ready.load(Ordering::SeqCst));
    }

    #[test]
    fn touch_creates_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _ready) = publisher_for(dir.path());
        publisher.touch().unwrap();
        assert!(dir.path().join("touch").exists());
    }

    #[test]
    fn current_hash_is_none_without_a_link() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, _ready) = publisher_for(dir.path());
        assert!(publisher.current_hash().is_none());
    }
}
