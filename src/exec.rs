//! External command execution.
//!
//! This is the **only** way the sync engine runs external programs (`git`,
//! and anything configured as an exec hook). Every call goes through here so
//! logging, timing, and deadline handling are consistent.
//!
//! ```text
//! $ git fetch origin main --verbose --no-progress [repo-store]
//! [gitsync-trace] context=repo-store cmd="git fetch origin main ..." dur=482.3ms ok=true
//! ```

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::{CommandFailure, SyncError};

/// Output captured from a finished command.
#[derive(Debug, Clone)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status_code: Option<i32>,
    pub success: bool,
}

/// One external command invocation, built up before running.
pub struct Cmd<'a> {
    program: &'a str,
    args: Vec<String>,
    dir: Option<&'a Path>,
    env: HashMap<String, String>,
    stdin: Option<String>,
    context: Option<&'a str>,
    deadline: Option<Duration>,
}

impl<'a> Cmd<'a> {
    pub fn new(program: &'a str) -> Self {
        Cmd {
            program,
            args: Vec::new(),
            dir: None,
            env: HashMap::new(),
            stdin: None,
            context: None,
            deadline: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: &'a Path) -> Self {
        self.dir = Some(dir);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, envs: &HashMap<String, String>) -> Self {
        self.env.extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn context(mut self, context: &'a str) -> Self {
        self.context = Some(context);
        self
    }

    /// Bound the invocation to `deadline`; on expiry the child is killed and
    /// reaped (never left a zombie) and a `Timeout` failure is returned.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run to completion, returning structured output on success.
    ///
    /// A nonzero exit is itself an `Err` — callers that want to inspect a
    /// nonzero exit without treating it as an error should use [`Cmd::run_raw`].
    #[track_caller]
    pub fn run(self) -> Result<Output, SyncError> {
        let caller = std::panic::Location::caller();
        let out = self.run_raw(caller)?;
        if !out.success {
            return Err(SyncError::Command {
                program: self.program_owned(),
                args: self.args.clone(),
                detail: CommandFailure::NonZero {
                    code: out.status_code,
                    stderr: out.stderr,
                },
            });
        }
        Ok(out)
    }

    fn program_owned(&self) -> String {
        self.program.to_string()
    }

    fn run_raw(&self, caller: &std::panic::Location<'_>) -> Result<Output, SyncError> {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args);
        if let Some(dir) = self.dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let cmd_str = self.display_string();
        match self.context {
            Some(ctx) => log::debug!("$ {cmd_str} [{ctx}] ({}:{})", caller.file(), caller.line()),
            None => log::debug!("$ {cmd_str} ({}:{})", caller.file(), caller.line()),
        }

        let t0 = Instant::now();
        let result = self.spawn_and_wait(cmd);
        let dur = t0.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(out) => log::debug!(
                "[gitsync-trace] context={} cmd=\"{cmd_str}\" dur={dur:.1}ms ok={}",
                self.context.unwrap_or(""),
                out.success
            ),
            Err(e) => log::debug!(
                "[gitsync-trace] context={} cmd=\"{cmd_str}\" dur={dur:.1}ms err=\"{e}\"",
                self.context.unwrap_or("")
            ),
        }

        result
    }

    fn display_string(&self) -> String {
        if self.args.is_empty() {
            self.program.to_string()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn spawn_and_wait(&self, mut cmd: Command) -> Result<Output, SyncError> {
        let mut child = cmd.spawn().map_err(|e| SyncError::Command {
            program: self.program_owned(),
            args: self.args.clone(),
            detail: CommandFailure::Spawn(e),
        })?;

        if let Some(input) = &self.stdin {
            use std::io::Write;
            if let Some(mut stdin) = child.stdin.take() {
                // A hook/credential helper that never reads stdin shouldn't wedge
                // the sync loop; ignore broken-pipe write failures.
                let _ = stdin.write_all(input.as_bytes());
            }
        }

        let status = match self.deadline {
            Some(deadline) => match child.wait_timeout(deadline) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SyncError::Command {
                        program: self.program_owned(),
                        args: self.args.clone(),
                        detail: CommandFailure::Timeout { after_secs: deadline.as_secs_f64() },
                    });
                }
                Err(e) => {
                    return Err(SyncError::Command {
                        program: self.program_owned(),
                        args: self.args.clone(),
                        detail: CommandFailure::Spawn(e),
                    });
                }
            },
            None => child.wait().map_err(|e: io::Error| SyncError::Command {
                program: self.program_owned(),
                args: self.args.clone(),
                detail: CommandFailure::Spawn(e),
            })?,
        };

        let stdout = child.stdout.take().map(read_all).unwrap_or_default();
        let stderr = child.stderr.take().map(read_all).unwrap_or_default();

        Ok(Output {
            stdout,
            stderr,
            status_code: status.code(),
            success: status.success(),
        })
    }
}

fn read_all(mut r: impl io::Read) -> String {
    let mut buf = Vec::new();
    let _ = r.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let err = Cmd::new("sh").arg("-c").arg("exit 3").run().unwrap_err();
        match err {
            SyncError::Command { detail: CommandFailure::NonZero { code, .. }, .. } => {
                assert_eq!(code, Some(3));
            }
            other => panic!("expected NonZero, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let err = Cmd::new("definitely-not-a-real-binary-xyz").run().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Command { detail: CommandFailure::Spawn(_), .. }
        ));
    }

    #[test]
    fn deadline_kills_long_running_child() {
        let err = Cmd::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .deadline(Duration::from_millis(50))
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Command { detail: CommandFailure::Timeout { .. }, .. }
        ));
    }

    #[test]
    fn stdin_is_piped_through() {
        let out = Cmd::new("cat").stdin("piped text").run().unwrap();
        assert_eq!(out.stdout, "piped text");
    }
}
