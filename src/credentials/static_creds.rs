//! Installs a single static `{url, username, password}` triple into git's
//! credential store via `git credential approve`.

use std::path::Path;

use crate::config::StaticCredential;
use crate::error::SyncError;
use crate::exec::Cmd;

pub fn install(git_dir: &Path, cred: &StaticCredential) -> Result<(), SyncError> {
    let password = cred
        .resolve_password()
        .map_err(|e| SyncError::Credential(format!("reading password file: {e}")))?;
    let stdin = format!("url={}\nusername={}\npassword={}\n\n", cred.url, cred.username, password);
    Cmd::new("git")
        .arg("-C")
        .arg(git_dir.display().to_string())
        .arg("credential")
        .arg("approve")
        .stdin(stdin)
        .context("credentials")
        .run()?;
    Ok(())
}
