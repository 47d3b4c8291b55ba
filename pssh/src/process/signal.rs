use anyhow::{Context as _, Result};
use libc::c_int;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use signal_hook::consts::SIGCHLD;
use signal_hook::iterator::Signals;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Forwards child-state-change notifications to the main loop.
///
/// The handler side does nothing but enqueue: a dedicated thread turns
/// each `SIGCHLD` into a wake token on a channel. All reaping and every
/// job-table mutation happen on the thread that drains
/// (`Shell::drain_child_events`), so a notification can never observe a
/// half-updated table.
pub struct SignalRelay {
    rx: Receiver<c_int>,
}

impl SignalRelay {
    pub fn install() -> Result<Self> {
        let (tx, rx) = channel();
        let mut signals = Signals::new([SIGCHLD]).context("failed to register SIGCHLD")?;
        thread::Builder::new()
            .name("signal-relay".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    debug!("relay: signal {sig}");
                    if tx.send(sig).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn signal relay thread")?;
        Ok(SignalRelay { rx })
    }

    /// Discard queued wake tokens. The caller is about to drain `waitpid`
    /// itself, which covers everything the tokens announced.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Block until a child-state notification arrives or the timeout
    /// elapses, whichever is first.
    pub fn wait(&self, timeout: Duration) {
        match self.rx.recv_timeout(timeout) {
            Ok(_) | Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }
}

/// Continue a stopped job; the signal goes to the whole process group.
pub(crate) fn send_cont(pgid: Pid) -> Result<()> {
    debug!("sending SIGCONT to pgid {pgid}");
    killpg(pgid, Signal::SIGCONT).with_context(|| format!("failed to send SIGCONT to {pgid}"))
}

pub(crate) fn kill_group(pgid: Pid, signal: Signal) -> Result<()> {
    debug!("sending {signal:?} to pgid {pgid}");
    killpg(pgid, signal).with_context(|| format!("failed to send {signal:?} to {pgid}"))
}
