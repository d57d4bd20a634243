//! Installs a cookie file via git's `http.cookiefile` setting.

use std::path::Path;

use crate::error::SyncError;
use crate::exec::Cmd;

pub fn install(cookie_file: &Path) -> Result<(), SyncError> {
    Cmd::new("git")
        .arg("config")
        .arg("--global")
        .arg("http.cookiefile")
        .arg(cookie_file.display().to_string())
        .context("credentials")
        .run()?;
    Ok(())
}
