use anyhow::{Context as _, Result};
use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{Pid, close, execv, setpgid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use tracing::debug;

use super::io::copy_fd;
use crate::terminal;

/// One pipeline stage: the resolved program and the descriptors it will
/// own once exec'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub cmd: String,
    pub path: PathBuf,
    pub argv: Vec<String>,
    pub pid: Option<Pid>,
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub stderr: RawFd,
    /// The read end of this stage's output pipe; it belongs to the next
    /// stage and must not survive into this one's image.
    pub close_before_exec: Option<RawFd>,
}

impl Process {
    pub fn new(cmd: String, path: PathBuf, argv: Vec<String>) -> Self {
        Process {
            cmd,
            path,
            argv,
            pid: None,
            stdin: STDIN_FILENO,
            stdout: STDOUT_FILENO,
            stderr: STDERR_FILENO,
            close_before_exec: None,
        }
    }

    /// Restore the job-control signals the shell ignores; the child must
    /// see the default dispositions before exec.
    fn set_signals(&self) -> Result<()> {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        unsafe {
            sigaction(Signal::SIGINT, &action).context("failed to reset SIGINT")?;
            sigaction(Signal::SIGQUIT, &action).context("failed to reset SIGQUIT")?;
            sigaction(Signal::SIGTSTP, &action).context("failed to reset SIGTSTP")?;
            sigaction(Signal::SIGTTIN, &action).context("failed to reset SIGTTIN")?;
            sigaction(Signal::SIGTTOU, &action).context("failed to reset SIGTTOU")?;
            sigaction(Signal::SIGCHLD, &action).context("failed to reset SIGCHLD")?;
        }
        Ok(())
    }

    /// Runs in the child between fork and exec; only returns on error.
    pub fn launch(&self, pid: Pid, pgid: Pid, interactive: bool, foreground: bool) -> Result<()> {
        if interactive {
            // both parent and child set the group to close the fork race
            setpgid(pid, pgid).context("failed setpgid")?;
            if foreground {
                terminal::set_foreground(pgid)?;
            }
            self.set_signals()?;
        }

        let cmd = CString::new(self.path.as_os_str().as_bytes()).context("failed new CString")?;
        let argv = self
            .argv
            .iter()
            .map(|a| CString::new(a.as_str()).context("failed new CString"))
            .collect::<Result<Vec<CString>>>()?;

        debug!(
            "execv cmd:{:?} argv:{:?} pid:{} pgid:{} stdin:{} stdout:{}",
            cmd, argv, pid, pgid, self.stdin, self.stdout,
        );

        if let Some(fd) = self.close_before_exec {
            let _ = close(fd);
        }
        copy_fd(self.stdin, STDIN_FILENO)?;
        copy_fd(self.stdout, STDOUT_FILENO)?;
        copy_fd(self.stderr, STDERR_FILENO)?;

        match execv(&cmd, &argv) {
            Ok(_) => unreachable!(),
            Err(err) => {
                debug!("execv failed: {err}");
                println!("pssh: found but can't exec: {}", self.cmd);
                std::process::exit(1);
            }
        }
    }
}
