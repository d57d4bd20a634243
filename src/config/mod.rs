//! Configuration for one sync target.
//!
//! A [`RepoConfig`] is loaded once at startup and treated as immutable for
//! the life of the process. CLI/environment parsing into a `RepoConfig` is
//! out of scope for this crate (see the crate-level docs); what's here is
//! the typed shape plus TOML (de)serialization and, for parity with the
//! layered loading this codebase uses for its own user config, an optional
//! environment-variable overlay.

mod credentials;
mod hooks;

pub use credentials::{CredentialConfig, GithubAppConfig, SshConfig, StaticCredential};
pub use hooks::{ExecHookConfig, HookMode, HookOrdering, HooksConfig, WebhookConfig};

use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How aggressively to garbage-collect the bare repository after each sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GcPolicy {
    #[default]
    Auto,
    Always,
    Aggressive,
    Off,
}

/// How submodules of the synced repository should be materialized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SubmodulePolicy {
    Recursive,
    Shallow,
    #[default]
    Off,
}

fn default_period() -> Duration {
    Duration::from_secs(60)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_stale_worktree_timeout() -> Duration {
    Duration::from_secs(3600)
}

/// Complete configuration for mirroring one remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct RepoConfig {
    /// Directory the engine owns entirely: bare repo, `.worktrees/`, link.
    pub root: PathBuf,

    /// Remote URL passed to `git fetch`.
    pub repo: String,

    /// Ref to track: a branch name, tag name, or commit hash. `HEAD` tracks
    /// whatever the remote's default branch is.
    #[serde(default = "default_ref")]
    pub rev: String,

    /// Path of the symlink consumers follow. Defaults to `<root>/link`.
    pub link: Option<PathBuf>,

    /// Optional file touched (mtime updated) after every successful sync.
    pub touch_file: Option<PathBuf>,

    /// Optional file holding the text of the most recent fatal error;
    /// removed on the next successful sync.
    pub error_file: Option<PathBuf>,

    /// 0 means a full clone.
    #[serde(default)]
    pub depth: u32,

    #[serde(default)]
    pub submodules: SubmodulePolicy,

    #[serde(default)]
    pub gc: GcPolicy,

    /// Path to a sparse-checkout patterns file, copied into each worktree.
    pub sparse_checkout_file: Option<PathBuf>,

    #[serde(with = "humantime_duration", default = "default_stale_worktree_timeout")]
    pub stale_worktree_timeout: Duration,

    /// How often to reconcile when nothing else wakes the loop early.
    #[serde(with = "humantime_duration", default = "default_period")]
    pub period: Duration,

    /// Deadline for one full reconciliation pass.
    #[serde(with = "humantime_duration", default = "default_sync_timeout")]
    pub sync_timeout: Duration,

    /// Number of consecutive failures tolerated before the process exits.
    /// Negative means unlimited.
    #[serde(default = "default_max_failures")]
    pub max_failures: i64,

    /// Exit after the first successful sync instead of looping.
    #[serde(default)]
    pub one_time: bool,

    /// Name or number of the signal that wakes the sleep between ticks early.
    pub resync_signal: Option<String>,

    /// `0002` when true (group-writable directories), else `0022`.
    #[serde(default)]
    pub group_writable: bool,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub hooks: HooksConfig,
}

fn default_ref() -> String {
    "HEAD".to_string()
}

fn default_max_failures() -> i64 {
    -1
}

impl RepoConfig {
    /// Parse a `RepoConfig` from a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// Load from a TOML file on disk, then apply `GITSYNC_`-prefixed
    /// environment variable overrides (double underscore separates nested
    /// fields, e.g. `GITSYNC_CREDENTIALS__GITHUB_APP__APP_ID`), mirroring the
    /// layered file-then-env loading this codebase uses for its user config.
    pub fn load(path: &std::path::Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(
                config::Environment::with_prefix("GITSYNC")
                    .prefix_separator("_")
                    .separator("__"),
            );
        builder.build()?.try_deserialize()
    }

    pub fn link_path(&self) -> PathBuf {
        self.link.clone().unwrap_or_else(|| self.root.join("link"))
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join(".worktrees")
    }

    pub fn directory_mode(&self) -> u32 {
        0o775
    }

    pub fn umask(&self) -> u32 {
        if self.group_writable { 0o002 } else { 0o022 }
    }

    /// Whether the configured `rev` resolved to exactly `remote_hash`,
    /// meaning `rev` names a fixed commit and no further sync can ever
    /// observe a change. A branch or tag whose name happens to look like a
    /// hash doesn't count; only equality with what it actually resolved to
    /// does.
    pub fn rev_is_hash(&self, remote_hash: &str) -> bool {
        self.rev == remote_hash
    }
}

/// (De)serialize a `Duration` as a humantime-style string ("60s", "5m").
pub(crate) mod humantime_duration {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        root = "/var/lib/gitsync/repo"
        repo = "https://github.com/example/example.git"
    "#;

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg = RepoConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.rev, "HEAD");
        assert_eq!(cfg.depth, 0);
        assert_eq!(cfg.max_failures, -1);
        assert!(!cfg.one_time);
        assert_eq!(cfg.period, default_period());
        assert_eq!(cfg.link_path(), PathBuf::from("/var/lib/gitsync/repo/link"));
    }

    #[test]
    fn explicit_link_overrides_default() {
        let toml = format!("{MINIMAL}\nlink = \"/run/gitsync/current\"\n");
        let cfg = RepoConfig::from_toml_str(&toml).unwrap();
        assert_eq!(cfg.link_path(), PathBuf::from("/run/gitsync/current"));
    }

    #[test]
    fn rev_is_hash_compares_against_resolved_hash() {
        let mut cfg = RepoConfig::from_toml_str(MINIMAL).unwrap();
        cfg.rev = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string();
        assert!(cfg.rev_is_hash("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"));
        assert!(!cfg.rev_is_hash("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"));

        cfg.rev = "main".to_string();
        assert!(!cfg.rev_is_hash("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"));

        // A branch or tag that happens to look like a hash must not be
        // mistaken for one just because it's syntactically hex.
        cfg.rev = "deadbeef".to_string();
        assert!(!cfg.rev_is_hash("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"));
        assert!(cfg.rev_is_hash("deadbeef"));
    }

    #[test]
    fn umask_follows_group_writable() {
        let mut cfg = RepoConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.umask(), 0o022);
        cfg.group_writable = true;
        assert_eq!(cfg.umask(), 0o002);
    }

    #[test]
    fn period_accepts_humantime_strings() {
        let toml = format!("{MINIMAL}\nperiod = \"30s\"\nsync-timeout = \"2m\"\n");
        let cfg = RepoConfig::from_toml_str(&toml).unwrap();
        assert_eq!(cfg.period, Duration::from_secs(30));
        assert_eq!(cfg.sync_timeout, Duration::from_secs(120));
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RepoConfig::from_toml_str(MINIMAL).unwrap();
        let serialized = toml::to_string(&cfg).unwrap();
        let reparsed = RepoConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(reparsed.repo, cfg.repo);
        assert_eq!(reparsed.rev, cfg.rev);
    }
}
