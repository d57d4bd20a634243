//! Hook configuration.
//!
//! Shape mirrors this codebase's own `HooksConfig` (one `Option<_>` field per
//! kind, kebab-case TOML names), but the two kinds here are exec/webhook
//! notification targets rather than lifecycle commands.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HookMode {
    #[default]
    Async,
    Sync,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HookOrdering {
    #[default]
    AfterSymlink,
    BeforeSymlink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct HooksConfig {
    pub exec: Option<ExecHookConfig>,
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub mode: HookMode,
    #[serde(default)]
    pub ordering: HookOrdering,
    #[serde(with = "super::humantime_duration", default = "default_backoff")]
    pub backoff: Duration,
}

fn default_backoff() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct ExecHookConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(with = "super::humantime_duration", default = "default_hook_timeout")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Expected response status; 0 means fire-and-forget (don't check).
    #[serde(default)]
    pub success_status: u16,
    #[serde(with = "super::humantime_duration", default = "default_hook_timeout")]
    pub timeout: Duration,
}

fn default_hook_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_method() -> String {
    "POST".to_string()
}
