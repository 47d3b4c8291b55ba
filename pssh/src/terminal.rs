use anyhow::{Context as _, Result};
use libc::{STDOUT_FILENO, c_int};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{Pid, isatty, tcsetpgrp};
use tracing::debug;

pub const SHELL_TERMINAL: c_int = libc::STDIN_FILENO;

/// Hand the controlling terminal to `pgid`.
///
/// This is the only place terminal ownership changes. SIGTTOU is ignored
/// for the duration of the reassignment and the previous disposition
/// restored afterwards; the kernel raises it when a process group that
/// does not own the terminal calls `tcsetpgrp`, which would otherwise
/// stop the shell. Both the input and output sides are reassigned.
pub fn set_foreground(pgid: Pid) -> Result<()> {
    if !isatty(SHELL_TERMINAL).unwrap_or(false) {
        debug!("no controlling terminal, skipping tcsetpgrp");
        return Ok(());
    }

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let previous =
        unsafe { sigaction(Signal::SIGTTOU, &ignore).context("failed to ignore SIGTTOU")? };

    let result = tcsetpgrp(SHELL_TERMINAL, pgid).and_then(|_| tcsetpgrp(STDOUT_FILENO, pgid));

    unsafe {
        sigaction(Signal::SIGTTOU, &previous).context("failed to restore SIGTTOU")?;
    }

    result.with_context(|| format!("failed tcsetpgrp to {pgid}"))?;
    debug!("terminal granted to pgid {pgid}");
    Ok(())
}
