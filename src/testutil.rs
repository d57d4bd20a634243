//! Shared test fixtures: a throwaway bare "origin" repo with one commit.

use tempfile::TempDir;

use crate::exec::Cmd;
use crate::git::CommitHash;

/// Create a temporary, non-bare git repository with a single commit on
/// `main`, suitable for use as a fetch `origin` in tests.
pub fn init_origin_with_commit() -> (TempDir, CommitHash) {
    let dir = tempfile::tempdir().unwrap();

    Cmd::new("git").arg("init").arg("-b").arg("main").dir(dir.path()).run().unwrap();
    Cmd::new("git").arg("config").arg("user.email").arg("test@example.com").dir(dir.path()).run().unwrap();
    Cmd::new("git").arg("config").arg("user.name").arg("Test").dir(dir.path()).run().unwrap();

    std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
    Cmd::new("git").arg("add").arg("README.md").dir(dir.path()).run().unwrap();
    Cmd::new("git").arg("commit").arg("-m").arg("initial").dir(dir.path()).run().unwrap();

    let out = Cmd::new("git").arg("rev-parse").arg("HEAD").dir(dir.path()).run().unwrap();
    let hash = CommitHash::new(out.stdout.trim().to_string());

    (dir, hash)
}

/// Add and commit a new file, advancing `main` by one commit.
pub fn commit_file(repo_dir: &std::path::Path, name: &str, contents: &str) -> CommitHash {
    std::fs::write(repo_dir.join(name), contents).unwrap();
    Cmd::new("git").arg("add").arg(name).dir(repo_dir).run().unwrap();
    Cmd::new("git").arg("commit").arg("-m").arg(format!("add {name}")).dir(repo_dir).run().unwrap();
    let out = Cmd::new("git").arg("rev-parse").arg("HEAD").dir(repo_dir).run().unwrap();
    CommitHash::new(out.stdout.trim().to_string())
}
