//! Credential configuration.
//!
//! One [`CredentialConfig`] can combine a static list, an askpass callback,
//! and a GitHub App — the Credential Manager applies them in that order on
//! every sync (see [`crate::credentials`]).

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialConfig {
    #[serde(default)]
    pub static_credentials: Vec<StaticCredential>,

    /// HTTP GET endpoint returning `key=value` lines, queried fresh on every sync.
    pub askpass_url: Option<String>,

    pub github_app: Option<GithubAppConfig>,

    pub ssh: Option<SshConfig>,

    /// Value for git's `http.cookiefile`.
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct StaticCredential {
    pub url: String,
    pub username: String,
    pub password: Option<String>,
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct GithubAppConfig {
    /// GitHub App client ID or application ID; becomes the JWT `iss` claim.
    pub app_id: String,
    pub installation_id: String,
    pub private_key_file: PathBuf,
    /// Defaults to `https://api.github.com`; override for GitHub Enterprise Server.
    #[serde(default = "default_github_base")]
    pub base_url: String,
}

fn default_github_base() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    #[serde(default)]
    pub keys: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub strict_host_key_checking: bool,
    pub known_hosts_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl SshConfig {
    /// Compose the `GIT_SSH_COMMAND` string installed for the duration of a sync.
    pub fn ssh_command(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        for key in &self.keys {
            parts.push("-i".to_string());
            parts.push(key.display().to_string());
        }
        if self.strict_host_key_checking {
            parts.push("-o".to_string());
            parts.push("StrictHostKeyChecking=yes".to_string());
            if let Some(known_hosts) = &self.known_hosts_file {
                parts.push("-o".to_string());
                parts.push(format!("UserKnownHostsFile={}", known_hosts.display()));
            }
        } else {
            parts.push("-o".to_string());
            parts.push("StrictHostKeyChecking=no".to_string());
        }
        parts.join(" ")
    }
}

impl StaticCredential {
    /// Resolve the password, reading `password_file` if `password` is unset.
    pub fn resolve_password(&self) -> std::io::Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(path) = &self.password_file {
            return Ok(std::fs::read_to_string(path)?.trim_end().to_string());
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_command_with_strict_checking_and_keys() {
        let cfg = SshConfig {
            keys: vec![PathBuf::from("/etc/gitsync/id_ed25519")],
            strict_host_key_checking: true,
            known_hosts_file: Some(PathBuf::from("/etc/gitsync/known_hosts")),
        };
        assert_eq!(
            cfg.ssh_command(),
            "ssh -i /etc/gitsync/id_ed25519 -o StrictHostKeyChecking=yes -o UserKnownHostsFile=/etc/gitsync/known_hosts"
        );
    }

    #[test]
    fn ssh_command_without_strict_checking() {
        let cfg = SshConfig {
            keys: vec![],
            strict_host_key_checking: false,
            known_hosts_file: None,
        };
        assert_eq!(cfg.ssh_command(), "ssh -o StrictHostKeyChecking=no");
    }

    #[test]
    fn resolves_password_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "s3cret\n").unwrap();
        let cred = StaticCredential {
            url: "https://example.com".into(),
            username: "x".into(),
            password: None,
            password_file: Some(path),
        };
        assert_eq!(cred.resolve_password().unwrap(), "s3cret");
    }
}
