//! Credential Manager.
//!
//! Installs whatever the configured credential sources require before each
//! sync pass: static `{url, username, password}` pairs pushed into git's
//! credential store, an askpass HTTP callback, a GitHub App installation
//! token, an SSH command string, and a cookie file. Every installation is
//! independent; a failure in one fails the sync pass (see the orchestrator's
//! `fail_count` handling).

mod askpass;
mod cookie;
mod github_app;
mod ssh;
mod static_creds;

pub use github_app::{GithubAppCredential, TokenExpiry};

use std::collections::HashMap;
use std::path::Path;

use crate::config::{CredentialConfig, StaticCredential};
use crate::error::SyncError;

/// Env var overrides the Credential Manager wants every subsequent `git`
/// invocation for this sync pass to inherit (`GIT_SSH_COMMAND`, and anything
/// a future credential source needs).
pub type EnvOverrides = HashMap<String, String>;

pub struct CredentialManager {
    config: CredentialConfig,
    github_app: Option<GithubAppCredential>,
}

impl CredentialManager {
    pub fn new(config: CredentialConfig) -> Self {
        let github_app = config
            .github_app
            .as_ref()
            .map(|cfg| GithubAppCredential::new(cfg.clone()));
        CredentialManager { config, github_app }
    }

    /// Install every configured credential source, returning env overrides
    /// that must be passed to subsequent `git` invocations this pass.
    ///
    /// `remote_url` is the actual `git fetch` remote (`RepoConfig.repo`) —
    /// derived credentials (askpass, GitHub App) must be installed under this
    /// URL's protocol+host, since that's what `git credential fill` looks up
    /// against when authenticating the real fetch, not whatever auxiliary
    /// endpoint the credential itself came from.
    pub fn refresh(&mut self, git_dir: &Path, remote_url: &str) -> Result<EnvOverrides, SyncError> {
        let mut envs = EnvOverrides::new();

        for cred in &self.config.static_credentials {
            static_creds::install(git_dir, cred)?;
        }

        if let Some(url) = &self.config.askpass_url {
            let (username, password) = askpass::fetch(url)?;
            static_creds::install(
                git_dir,
                &StaticCredential {
                    url: remote_url.to_string(),
                    username,
                    password: Some(password),
                    password_file: None,
                },
            )?;
        }

        if let Some(github_app) = &mut self.github_app {
            let token = github_app.token()?;
            static_creds::install(
                git_dir,
                &StaticCredential {
                    url: remote_url.to_string(),
                    username: "-".to_string(),
                    password: Some(token),
                    password_file: None,
                },
            )?;
        }

        if let Some(ssh_cfg) = &self.config.ssh {
            ssh::install(ssh_cfg, &mut envs);
        }

        if let Some(cookie_file) = &self.config.cookie_file {
            cookie::install(cookie_file)?;
        }

        Ok(envs)
    }
}
