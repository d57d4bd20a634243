//! Signal-driven wakeup for the sync loop's sleep, and clean SIGINT shutdown
//! from the "ref is a hash, no more syncs possible" idle state.
//!
//! Built on `nix`/`signal-hook`, the same combination this codebase already
//! depends on for Unix process/signal handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, bounded};

/// A receiver that fires once whenever the configured resync signal (or
/// SIGINT) arrives.
pub struct SignalWatcher {
    rx: Receiver<()>,
    interrupted: Arc<AtomicBool>,
}

impl SignalWatcher {
    /// `resync_signal` names an additional signal (e.g. `"SIGHUP"`) that
    /// wakes the sleep between ticks early; SIGINT always terminates.
    #[cfg(unix)]
    pub fn install(resync_signal: Option<&str>) -> anyhow::Result<Self> {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let (tx, rx) = bounded(1);
        let interrupted = Arc::new(AtomicBool::new(false));

        let mut signal_nums = vec![SIGINT, SIGTERM];
        if let Some(name) = resync_signal {
            signal_nums.push(parse_signal_name(name)?);
        }
        signal_nums.sort_unstable();
        signal_nums.dedup();

        let mut signals = Signals::new(&signal_nums)?;
        let interrupted_for_thread = interrupted.clone();

        std::thread::spawn(move || {
            for sig in signals.forever() {
                if sig == SIGINT || sig == SIGTERM {
                    interrupted_for_thread.store(true, Ordering::SeqCst);
                }
                let _ = tx.try_send(());
            }
        });

        Ok(SignalWatcher { rx, interrupted })
    }

    #[cfg(not(unix))]
    pub fn install(_resync_signal: Option<&str>) -> anyhow::Result<Self> {
        let (_tx, rx) = bounded(1);
        Ok(SignalWatcher { rx, interrupted: Arc::new(AtomicBool::new(false)) })
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn parse_signal_name(name: &str) -> anyhow::Result<std::os::raw::c_int> {
    use signal_hook::consts::*;
    let normalized = name.trim().to_ascii_uppercase();
    Ok(match normalized.as_str() {
        "SIGHUP" | "HUP" => SIGHUP,
        "SIGUSR1" | "USR1" => SIGUSR1,
        "SIGUSR2" | "USR2" => SIGUSR2,
        "SIGTERM" | "TERM" => SIGTERM,
        "SIGINT" | "INT" => SIGINT,
        other => anyhow::bail!("unrecognized signal name: {other}"),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn parses_known_signal_names() {
        assert!(parse_signal_name("SIGHUP").is_ok());
        assert!(parse_signal_name("usr1").is_ok());
    }

    #[test]
    fn rejects_unknown_signal_names() {
        assert!(parse_signal_name("NOT_A_SIGNAL").is_err());
    }
}
