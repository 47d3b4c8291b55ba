use anyhow::{Context as _, Result};
use nix::unistd::{ForkResult, Pid, fork, getpid};
use tracing::debug;

use super::process::Process;

/// Fork one pipeline stage. The child installs itself into `pgid` (or
/// becomes the group leader when `pgid` is `None`) and execs; it never
/// returns into shell logic.
pub(crate) fn fork_process(
    process: &mut Process,
    pgid: Option<Pid>,
    interactive: bool,
    foreground: bool,
) -> Result<Pid> {
    let pid = unsafe { fork().context("failed fork")? };

    match pid {
        ForkResult::Parent { child } => {
            debug!("forked {} as pid {}", process.cmd, child);
            process.pid = Some(child);
            Ok(child)
        }
        ForkResult::Child => {
            let pid = getpid();
            let pgid = pgid.unwrap_or(pid);
            if let Err(err) = process.launch(pid, pgid, interactive, foreground) {
                eprintln!("pssh: {err:#}");
            }
            // launch only returns on error; exec replaced us otherwise
            std::process::exit(1);
        }
    }
}
