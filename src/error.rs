//! Structured error taxonomy for the sync engine.
//!
//! Mirrors the hand-rolled enum + manual `Display` pattern used throughout
//! this codebase's git layer, but without any terminal styling: this crate
//! has no interactive surface, so error text is plain and meant for logs.

use std::fmt;

/// An error surfaced by one reconciliation pass.
///
/// Each variant maps to one bucket of the sync loop's error taxonomy:
/// configuration errors are terminal, transient ones are retried up to
/// `max-failures`, structural ones trigger a wipe-and-reinit, and hook
/// failures never reach this type at all (they're isolated in the hook
/// runner).
#[derive(Debug)]
pub enum SyncError {
    /// Bad or missing configuration, detected at startup or on first use.
    /// Always terminal.
    Config(String),

    /// A subprocess could not be spawned, timed out, or exited non-zero.
    Command {
        program: String,
        args: Vec<String>,
        detail: CommandFailure,
    },

    /// The bare repository or a worktree failed its structural sanity check
    /// (`rev-parse --show-toplevel`, `fsck --connectivity-only`, or a
    /// HEAD/hash mismatch).
    Structural(String),

    /// Credential acquisition or installation failed (askpass HTTP call,
    /// GitHub App token exchange, static credential push).
    Credential(String),

    /// Filesystem I/O failed outside of a subprocess (symlink rename,
    /// directory creation, touch-file update).
    Io {
        context: String,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub enum CommandFailure {
    Spawn(std::io::Error),
    Timeout { after_secs: f64 },
    NonZero { code: Option<i32>, stderr: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Config(msg) => write!(f, "configuration error: {msg}"),
            SyncError::Command { program, args, detail } => {
                let cmd = if args.is_empty() {
                    program.clone()
                } else {
                    format!("{program} {}", args.join(" "))
                };
                match detail {
                    CommandFailure::Spawn(e) => write!(f, "failed to run `{cmd}`: {e}"),
                    CommandFailure::Timeout { after_secs } => {
                        write!(f, "`{cmd}` timed out after {after_secs:.1}s")
                    }
                    CommandFailure::NonZero { code, stderr } => {
                        let stderr = stderr.trim();
                        match code {
                            Some(code) => write!(f, "`{cmd}` exited with status {code}: {stderr}"),
                            None => write!(f, "`{cmd}` was terminated by a signal: {stderr}"),
                        }
                    }
                }
            }
            SyncError::Structural(msg) => write!(f, "structural repository error: {msg}"),
            SyncError::Credential(msg) => write!(f, "credential error: {msg}"),
            SyncError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Command { detail: CommandFailure::Spawn(e), .. } => Some(e),
            SyncError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl SyncError {
    /// Whether this error should be remediated by wiping repository contents
    /// and re-initializing, rather than simply retried.
    pub fn is_structural(&self) -> bool {
        matches!(self, SyncError::Structural(_))
    }

    /// Whether this error is terminal regardless of `max-failures`.
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}
