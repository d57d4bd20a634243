//! Composes the `GIT_SSH_COMMAND` env override for an SSH credential source.

use crate::config::SshConfig;
use crate::credentials::EnvOverrides;

pub fn install(ssh: &SshConfig, envs: &mut EnvOverrides) {
    envs.insert("GIT_SSH_COMMAND".to_string(), ssh.ssh_command());
}
