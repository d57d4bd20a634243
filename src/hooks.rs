//! The Hook Runner: a coalescing, retrying notifier per configured hook
//! target.
//!
//! Each runner owns a single-slot overwriting mailbox (a `Mutex<Option<_>>`
//! guarding the pending hash, plus a bounded `crossbeam-channel` wake signal)
//! so a burst of hash changes only ever notifies the most recent one. The
//! worker thread lives for the process and serializes invocations of its one
//! hook.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::config::{ExecHookConfig, HookMode, WebhookConfig};
use crate::exec::Cmd;
use crate::git::CommitHash;

enum Invocation {
    Exec(ExecHookConfig),
    Webhook(WebhookConfig),
}

struct Mailbox {
    pending: Mutex<Option<CommitHash>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Handle to one running hook. `Send` is cheap and non-blocking in async
/// mode; in sync mode it blocks until the invocation this call triggered
/// has terminated. The worker thread lives for the whole process, so the
/// working directory an exec hook runs in is read fresh out of a shared
/// cell at invocation time rather than fixed at spawn time.
pub struct HookRunner {
    mailbox: Arc<Mailbox>,
    mode: HookMode,
    completion: Arc<(Mutex<bool>, std::sync::Condvar)>,
    give_up: Arc<Mutex<bool>>,
    shutdown: Arc<Mutex<bool>>,
    current_dir: Arc<Mutex<std::path::PathBuf>>,
    last_success: Arc<Mutex<bool>>,
    _worker: std::thread::JoinHandle<()>,
}

impl HookRunner {
    pub fn spawn(
        invocation_kind: Invocation,
        mode: HookMode,
        backoff: Duration,
        initial_dir: std::path::PathBuf,
    ) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        let mailbox = Arc::new(Mailbox { pending: Mutex::new(None), wake_tx, wake_rx });
        let completion = Arc::new((Mutex::new(true), std::sync::Condvar::new()));
        let give_up = Arc::new(Mutex::new(false));
        let shutdown = Arc::new(Mutex::new(false));
        let current_dir = Arc::new(Mutex::new(initial_dir));
        let last_success = Arc::new(Mutex::new(true));

        let worker_mailbox = mailbox.clone();
        let worker_completion = completion.clone();
        let worker_give_up = give_up.clone();
        let worker_shutdown = shutdown.clone();
        let worker_dir = current_dir.clone();
        let worker_last_success = last_success.clone();

        let worker = std::thread::spawn(move || {
            worker_loop(
                worker_mailbox,
                invocation_kind,
                backoff,
                worker_completion,
                worker_give_up,
                worker_shutdown,
                worker_dir,
                worker_last_success,
            );
        });

        HookRunner { mailbox, mode, completion, give_up, shutdown, current_dir, last_success, _worker: worker }
    }

    /// Point subsequent invocations at a new working directory (the
    /// worktree that's about to be, or has just been, published).
    pub fn set_current_dir(&self, dir: std::path::PathBuf) {
        *self.current_dir.lock().unwrap() = dir;
    }

    /// Enqueue `hash`, replacing any earlier unprocessed hash. In sync mode,
    /// blocks until that attempt's terminal outcome (success or
    /// exhausted retries via give-up) is observed.
    pub fn send(&self, hash: CommitHash) {
        {
            let mut pending = self.mailbox.pending.lock().unwrap();
            *pending = Some(hash);
        }
        {
            let (lock, _) = &*self.completion;
            *lock.lock().unwrap() = false;
        }
        let _ = self.mailbox.wake_tx.try_send(());

        if self.mode == HookMode::Sync {
            self.wait_for_completion_blocking();
        }
    }

    /// Block without a bound until the in-flight attempt for the
    /// currently-pending hash terminates.
    pub fn wait_for_completion_blocking(&self) {
        let (lock, cvar) = &*self.completion;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }

    /// Block up to `timeout` for the in-flight attempt to terminate.
    /// Returns whether it did.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.completion;
        let guard = lock.lock().unwrap();
        let (guard, result) = cvar.wait_timeout_while(guard, timeout, |done| !*done).unwrap();
        drop(guard);
        !result.timed_out()
    }

    /// Tell the worker to stop retrying the in-flight (or next) attempt and
    /// report failure instead of retrying forever. Does not itself block or
    /// join the worker thread.
    pub fn request_giveup(&self) {
        *self.give_up.lock().unwrap() = true;
        let _ = self.mailbox.wake_tx.try_send(());
    }

    /// Whether the most recently completed attempt succeeded. `true` if no
    /// attempt has run yet.
    pub fn last_succeeded(&self) -> bool {
        *self.last_success.lock().unwrap()
    }

    pub fn shutdown(self) {
        *self.give_up.lock().unwrap() = true;
        *self.shutdown.lock().unwrap() = true;
        let _ = self.mailbox.wake_tx.try_send(());
        let _ = self._worker.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    mailbox: Arc<Mailbox>,
    invocation: Invocation,
    backoff: Duration,
    completion: Arc<(Mutex<bool>, std::sync::Condvar)>,
    give_up: Arc<Mutex<bool>>,
    shutdown: Arc<Mutex<bool>>,
    current_dir: Arc<Mutex<std::path::PathBuf>>,
    last_success: Arc<Mutex<bool>>,
) {
    loop {
        let _ = mailbox.wake_rx.recv_timeout(Duration::from_millis(200));

        let hash = {
            let mut pending = mailbox.pending.lock().unwrap();
            pending.take()
        };

        // A pending hash is always seen through to a terminal outcome, even
        // if shutdown was requested concurrently — otherwise a caller
        // blocked in `wait_for_completion_*` would never be woken.
        if let Some(hash) = hash {
            let mut succeeded = false;
            loop {
                let dir = current_dir.lock().unwrap().clone();
                match invoke(&invocation, &hash, &dir) {
                    Ok(()) => {
                        succeeded = true;
                        break;
                    }
                    Err(_) if *give_up.lock().unwrap() => break,
                    Err(_) => std::thread::sleep(backoff),
                }
            }

            *last_success.lock().unwrap() = succeeded;
            let (lock, cvar) = &*completion;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        if *shutdown.lock().unwrap() {
            return;
        }
    }
}

fn invoke(invocation: &Invocation, hash: &CommitHash, worktree_dir: &std::path::Path) -> Result<(), String> {
    match invocation {
        Invocation::Exec(cfg) => {
            let out = Cmd::new(&cfg.command)
                .args(cfg.args.clone())
                .dir(worktree_dir)
                .env("GITSYNC_HASH", hash.as_str())
                .context("hook-runner")
                .deadline(cfg.timeout)
                .run();
            out.map(|_| ()).map_err(|e| e.to_string())
        }
        Invocation::Webhook(cfg) => {
            let client = reqwest::blocking::Client::builder()
                .timeout(cfg.timeout)
                .build()
                .map_err(|e| e.to_string())?;
            let method: reqwest::Method = cfg.method.parse().map_err(|_| format!("invalid HTTP method {}", cfg.method))?;
            let resp = client
                .request(method, &cfg.url)
                .header("Gitsync-Hash", hash.as_str())
                .send()
                .map_err(|e| e.to_string())?;

            if cfg.success_status == 0 {
                return Ok(());
            }
            if resp.status().as_u16() == cfg.success_status {
                Ok(())
            } else {
                Err(format!("webhook returned status {}", resp.status()))
            }
        }
    }
}

/// Owns the set of active hook runners configured for this process, and
/// fires them according to their configured before/after-symlink ordering.
pub struct HookSet {
    exec: Option<HookRunner>,
    webhook: Option<HookRunner>,
}

impl HookSet {
    pub fn new(config: &crate::config::HooksConfig, initial_dir: std::path::PathBuf) -> Self {
        let exec = config.exec.clone().map(|cfg| {
            HookRunner::spawn(Invocation::Exec(cfg), config.mode, config.backoff, initial_dir.clone())
        });
        let webhook = config.webhook.clone().map(|cfg| {
            HookRunner::spawn(Invocation::Webhook(cfg), config.mode, config.backoff, initial_dir)
        });
        HookSet { exec, webhook }
    }

    /// Point both runners' exec working directory at the worktree that's
    /// about to be, or has just been, published.
    pub fn set_current_dir(&self, dir: std::path::PathBuf) {
        if let Some(exec) = &self.exec {
            exec.set_current_dir(dir.clone());
        }
        if let Some(webhook) = &self.webhook {
            webhook.set_current_dir(dir);
        }
    }

    pub fn send(&self, hash: CommitHash) {
        if let Some(exec) = &self.exec {
            exec.send(hash.clone());
        }
        if let Some(webhook) = &self.webhook {
            webhook.send(hash);
        }
    }

    /// Block without a bound until every configured runner's in-flight
    /// attempt terminates.
    pub fn wait_for_completion_blocking(&self) {
        if let Some(exec) = &self.exec {
            exec.wait_for_completion_blocking();
        }
        if let Some(webhook) = &self.webhook {
            webhook.wait_for_completion_blocking();
        }
    }

    /// Block up to `timeout` total across every configured runner. Returns
    /// whether all of them completed within that budget.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut all_done = true;
        if let Some(exec) = &self.exec {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            all_done &= exec.wait_for_completion_timeout(remaining);
        }
        if let Some(webhook) = &self.webhook {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            all_done &= webhook.wait_for_completion_timeout(remaining);
        }
        all_done
    }

    /// Tell every configured runner to give up retrying its in-flight
    /// attempt rather than block forever.
    pub fn request_giveup(&self) {
        if let Some(exec) = &self.exec {
            exec.request_giveup();
        }
        if let Some(webhook) = &self.webhook {
            webhook.request_giveup();
        }
    }

    /// Whether every configured runner's most recent attempt succeeded
    /// (vacuously `true` for runners that have never fired).
    pub fn all_succeeded(&self) -> bool {
        self.exec.as_ref().is_none_or(|h| h.last_succeeded()) && self.webhook.as_ref().is_none_or(|h| h.last_succeeded())
    }

    pub fn shutdown(self) {
        if let Some(exec) = self.exec {
            exec.shutdown();
        }
        if let Some(webhook) = self.webhook {
            webhook.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exec_hook_runs_with_hash_in_env() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let cfg = ExecHookConfig {
            command: "sh".into(),
            args: vec!["-c".into(), format!("echo $GITSYNC_HASH > {}", marker.display())],
            timeout: Duration::from_secs(5),
        };
        let runner = HookRunner::spawn(Invocation::Exec(cfg), HookMode::Sync, Duration::from_millis(10), dir.path().to_path_buf());
        runner.send(CommitHash::new("deadbeef"));
        let content = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(content.trim(), "deadbeef");
        runner.shutdown();
    }

    #[test]
    fn coalescing_mailbox_drops_superseded_hash() {
        // A hash sent before the worker wakes is replaced, not queued.
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (wake_tx, wake_rx) = bounded(1);
        let mailbox = Arc::new(Mailbox { pending: Mutex::new(None), wake_tx, wake_rx });

        {
            let mut pending = mailbox.pending.lock().unwrap();
            *pending = Some(CommitHash::new("first"));
        }
        {
            let mut pending = mailbox.pending.lock().unwrap();
            *pending = Some(CommitHash::new("second"));
        }

        let taken = mailbox.pending.lock().unwrap().take();
        assert_eq!(taken.unwrap().as_str(), "second");
        let _ = dir;
        let _ = calls;
    }

    #[test]
    fn async_send_returns_before_hook_completes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExecHookConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "sleep 0.2".into()],
            timeout: Duration::from_secs(5),
        };
        let runner = HookRunner::spawn(Invocation::Exec(cfg), HookMode::Async, Duration::from_millis(10), dir.path().to_path_buf());
        let t0 = std::time::Instant::now();
        runner.send(CommitHash::new("abc"));
        assert!(t0.elapsed() < Duration::from_millis(150));
        runner.wait_for_completion_blocking();
        assert!(runner.last_succeeded());
        runner.shutdown();
    }

    #[test]
    fn giveup_unblocks_a_hook_that_never_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExecHookConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "exit 1".into()],
            timeout: Duration::from_secs(5),
        };
        let runner = HookRunner::spawn(Invocation::Exec(cfg), HookMode::Async, Duration::from_millis(20), dir.path().to_path_buf());
        runner.send(CommitHash::new("deadbeef"));

        // Without a give-up request this would retry forever.
        assert!(!runner.wait_for_completion_timeout(Duration::from_millis(100)));
        runner.request_giveup();
        runner.wait_for_completion_blocking();
        assert!(!runner.last_succeeded());
        runner.shutdown();
    }
}
