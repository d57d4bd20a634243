use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;

/// Thin harness around the library: locate a config file, load it, run.
/// Real CLI parsing, multi-repo fan-out, and the liveness HTTP surface are
/// external collaborators (see the crate docs) and not built here.
fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let config_path = config_path()?;
    let config = git_sync::config::RepoConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    git_sync::sync::run(config)
}

fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    if let Ok(path) = std::env::var("GITSYNC_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    anyhow::bail!("usage: git-sync <config.toml> (or set GITSYNC_CONFIG)")
}
