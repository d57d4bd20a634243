//! The Sync Orchestrator: the main reconciliation loop.
//!
//! Drives one sync pass at a time through a fixed order — credentials,
//! fetch, resolve, optional sanity-check, optional pre-symlink hooks,
//! build/publish, post-symlink hooks, maintenance — and sleeps between
//! passes against a timer selected with the signal watcher so a configured
//! resync signal wakes it early.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::select;

use crate::config::{HookOrdering, RepoConfig};
use crate::credentials::CredentialManager;
use crate::error::SyncError;
use crate::git::{Repository, WorktreeManager};
use crate::hooks::HookSet;
use crate::publish::Publisher;
use crate::signals::SignalWatcher;

/// Counters and last-known state, shared (read-only) with whatever external
/// collaborator serves the liveness/metrics surface. This crate never serves
/// it itself — see the crate-level docs' out-of-scope list.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub sync_count: u64,
    pub fail_count: i64,
    pub last_sync_hash: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncOutcome {
    Changed,
    NoOp,
}

pub struct Orchestrator {
    config: RepoConfig,
    repo: Repository,
    credentials: CredentialManager,
    ready: Arc<AtomicBool>,
    status: Arc<Mutex<SyncStatus>>,
    last_env_overrides: Option<HashMap<String, String>>,
    hooks: Option<HookSet>,
}

impl Orchestrator {
    pub fn new(config: RepoConfig) -> Self {
        let repo = Repository::at(&config.root);
        let credentials = CredentialManager::new(config.credentials.clone());
        let hooks = HookSet::new(&config.hooks, config.root.clone());
        Orchestrator {
            config,
            repo,
            credentials,
            ready: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SyncStatus::default())),
            last_env_overrides: None,
            hooks: Some(hooks),
        }
    }

    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn status(&self) -> Arc<Mutex<SyncStatus>> {
        self.status.clone()
    }

    fn status_mut(&self) -> MutexGuard<'_, SyncStatus> {
        self.status.lock().unwrap()
    }
}

/// Run the sync loop to completion. Returns `Ok(())` on a clean exit (only
/// reachable in `one-time` mode); a running, non-`one-time` loop ends only
/// via `max-failures` being exceeded or a fatal configuration error.
pub fn run(mut config: RepoConfig) -> anyhow::Result<()> {
    set_umask(config.umask());

    // Canonicalized once, up front, per the Path Model's load-bearing
    // contract: every downstream comparison (sanity checks, the worktree
    // manager's own paths) assumes `root` is already symlink-resolved.
    // `root` may not exist yet on a first run, so resolve its nearest
    // existing ancestor and rejoin the rest rather than requiring it exist.
    config.root = crate::path::canonicalize_nearest_ancestor(&config.root)
        .with_context(|| format!("canonicalizing root {}", config.root.display()))?
        .into_path_buf();

    let signals = SignalWatcher::install(config.resync_signal.as_deref())?;
    let mut orchestrator = Orchestrator::new(config);

    loop {
        let outcome = orchestrator.tick(&signals);

        match outcome {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Exit(code)) => {
                if code == 0 {
                    return Ok(());
                } else {
                    anyhow::bail!("one-time sync completed with failing hooks");
                }
            }
            Ok(TickOutcome::IdleForever) => {
                wait_for_interrupt(&signals);
                return Ok(());
            }
            Err(fatal) => return Err(fatal),
        }

        sleep_or_wake(&orchestrator.config, &signals);
    }
}

enum TickOutcome {
    Continue,
    Exit(i32),
    IdleForever,
}

impl Orchestrator {
    fn tick(&mut self, signals: &SignalWatcher) -> anyhow::Result<TickOutcome> {
        let deadline = self.config.sync_timeout;

        if let Err(e) = self.refresh_credentials() {
            let mut status = self.status_mut();
            status.fail_count += 1;
            status.last_error = Some(e.to_string());
            self.write_error_file(&e);
            if self.config.max_failures >= 0 && status.fail_count > self.config.max_failures {
                anyhow::bail!("exceeded max-failures ({}) refreshing credentials: {e}", self.config.max_failures);
            }
            log::warn!("credential refresh failed (fail_count={}): {e}", status.fail_count);
            return Ok(TickOutcome::Continue);
        }
        let env_overrides = self.last_env_overrides.clone().unwrap_or_default();

        match self.run_pass(&env_overrides, deadline) {
            Ok(outcome) => {
                let mut status = self.status_mut();
                status.fail_count = 0;
                drop(status);
                self.handle_post_pass(outcome, signals)
            }
            Err(e) => {
                let mut status = self.status_mut();
                status.fail_count += 1;
                status.last_error = Some(e.to_string());
                let fail_count = status.fail_count;
                drop(status);
                self.write_error_file(&e);
                if e.is_structural() {
                    log::warn!("structural repo error, will reinitialize next tick: {e}");
                }
                if self.config.max_failures >= 0 && fail_count > self.config.max_failures {
                    anyhow::bail!("exceeded max-failures ({}) during sync: {e}", self.config.max_failures);
                }
                log::warn!("sync pass failed (fail_count={fail_count}): {e}");
                Ok(TickOutcome::Continue)
            }
        }
    }

    fn refresh_credentials(&mut self) -> Result<(), SyncError> {
        let envs = self.credentials.refresh(&self.config.root, &self.config.repo)?;
        self.last_env_overrides = Some(envs);
        Ok(())
    }

    fn run_pass(
        &mut self,
        envs: &HashMap<String, String>,
        deadline: Duration,
    ) -> Result<SyncOutcome, SyncError> {
        self.repo.init_or_validate(&self.config.repo, self.config.directory_mode())?;

        let worktrees_dir = self.config.worktrees_dir();
        let worktree_mgr = WorktreeManager::new(&self.config.root, &worktrees_dir);
        let publisher = Publisher::new(self.config.link_path(), self.config.touch_file.clone(), self.ready.clone());

        let current_hash = publisher.current_hash();

        let remote_hash = self.repo.fetch_and_resolve(&self.config.rev, self.config.depth, envs, deadline)?;

        // `hash_changed` drives whether hooks fire and whether the symlink
        // moves; `needs_rebuild` additionally covers a sanity-check failure
        // on an otherwise-unchanged hash, which must republish the same
        // commit from scratch without treating it as a change for hook
        // purposes.
        let hash_changed = current_hash.as_ref() != Some(&remote_hash);
        let mut needs_rebuild = hash_changed;

        if !hash_changed && worktree_mgr.sanity_check(&remote_hash).is_err() {
            worktree_mgr.remove(&remote_hash)?;
            needs_rebuild = true;
        }

        let expected_path = worktree_mgr.path_for(&remote_hash);
        let outgoing_hash = current_hash;
        let first_sync = self.status_mut().sync_count == 0;

        let hooks = self.hooks.as_ref().expect("hook set lives for the orchestrator's lifetime");

        if needs_rebuild || first_sync {
            self.repo.reset_soft(&remote_hash)?;
            worktree_mgr.build(
                &remote_hash,
                self.config.sparse_checkout_file.as_deref(),
                self.config.submodules,
                self.config.depth,
            )?;
            hooks.set_current_dir(expected_path.clone());

            if self.config.hooks.ordering == HookOrdering::BeforeSymlink && (hash_changed || first_sync) {
                hooks.send(remote_hash.clone());
            }
            if needs_rebuild {
                publisher.publish(&expected_path)?;
                // Start the outgoing worktree's retention timer from the
                // moment it stops being the published one, not from whenever
                // it was originally built.
                if hash_changed {
                    if let Some(prev_hash) = &outgoing_hash {
                        worktree_mgr.touch(prev_hash)?;
                    }
                }
            }
        }

        publisher.set_ready();
        {
            let mut status = self.status_mut();
            status.sync_count += 1;
            status.last_sync_hash = Some(remote_hash.as_str().to_string());
        }

        if needs_rebuild || first_sync {
            publisher.touch()?;
            if self.config.hooks.ordering == HookOrdering::AfterSymlink && (hash_changed || first_sync) {
                hooks.send(remote_hash.clone());
            }
            self.repo.run_maintenance(
                &worktrees_dir,
                &remote_hash,
                self.config.stale_worktree_timeout,
                self.config.gc,
            )?;
        }

        self.clear_error_file();

        Ok(if hash_changed { SyncOutcome::Changed } else { SyncOutcome::NoOp })
    }

    fn handle_post_pass(&mut self, outcome: SyncOutcome, _signals: &SignalWatcher) -> anyhow::Result<TickOutcome> {
        if self.config.one_time {
            if let Some(hooks) = self.hooks.take() {
                let completed = hooks.wait_for_completion(self.config.sync_timeout);
                if !completed {
                    hooks.request_giveup();
                    hooks.wait_for_completion_blocking();
                }
                let success = hooks.all_succeeded();
                hooks.shutdown();
                return Ok(TickOutcome::Exit(if success { 0 } else { 1 }));
            }
            return Ok(TickOutcome::Exit(0));
        }

        let last_hash = self.status_mut().last_sync_hash.clone();
        if let Some(last_hash) = last_hash {
            if self.config.rev_is_hash(&last_hash) {
                log::info!("configured rev is a commit hash; no further syncs are possible");
                return Ok(TickOutcome::IdleForever);
            }
        }

        let _ = outcome;
        Ok(TickOutcome::Continue)
    }

    fn write_error_file(&self, err: &(impl std::fmt::Display + ?Sized)) {
        let Some(path) = &self.config.error_file else { return };
        let _ = std::fs::write(path, format!("{} {err}\n", crate::utils::now_iso8601()));
    }

    fn clear_error_file(&self) {
        let Some(path) = &self.config.error_file else { return };
        let _ = std::fs::remove_file(path);
    }
}

fn sleep_or_wake(config: &RepoConfig, signals: &SignalWatcher) {
    let timer = crossbeam_channel::after(config.period);
    select! {
        recv(timer) -> _ => {}
        recv(signals.receiver()) -> _ => {
            log::debug!("woken early by resync signal");
        }
    }
}

fn wait_for_interrupt(signals: &SignalWatcher) {
    loop {
        if signals.is_interrupted() {
            return;
        }
        let _ = signals.receiver().recv_timeout(Duration::from_secs(1));
    }
}

#[cfg(unix)]
fn set_umask(mask: u32) {
    use nix::sys::stat::{Mode, umask};
    umask(Mode::from_bits_truncate(mask));
}

#[cfg(not(unix))]
fn set_umask(_mask: u32) {}
