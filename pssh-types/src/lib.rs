use anyhow::Result;
use libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{Pid, isatty};
use std::fmt::Debug;
use std::fs::File;
use std::io::Write;
use std::mem;
use std::os::unix::io::{FromRawFd, RawFd};
use thiserror::Error;

/// User-input errors whose `Display` text is the exact diagnostic the
/// shell prints (prefixed with `pssh: `).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PsshError {
    #[error("invalid syntax")]
    InvalidSyntax,

    #[error("too many arguments")]
    TooManyArguments,

    #[error("invalid job number: [{0}]")]
    InvalidJobNumber(String),

    #[error("invalid pid: [{0}]")]
    InvalidPid(String),

    #[error("invalid signal: [{0}]")]
    InvalidSignal(String),
}

pub type PsshResult<T> = std::result::Result<T, PsshError>;

/// Per-execution-cycle state handed to the executor and the builtins.
///
/// `outfile`/`errfile` default to the shell's own descriptors; the
/// executor retargets `outfile` when a builtin command carries an output
/// redirection, so builtin output written through [`Context::write_stdout`]
/// lands in the right place without touching the shell's descriptors.
#[derive(Clone)]
pub struct Context {
    pub shell_pid: Pid,
    pub shell_pgid: Pid,
    pub foreground: bool,
    pub interactive: bool,
    pub infile: RawFd,
    pub outfile: RawFd,
    pub errfile: RawFd,
}

impl Context {
    pub fn new(shell_pid: Pid, shell_pgid: Pid, foreground: bool) -> Self {
        let interactive = isatty(STDIN_FILENO).unwrap_or(false);
        Context {
            shell_pid,
            shell_pgid,
            foreground,
            interactive,
            infile: STDIN_FILENO,
            outfile: STDOUT_FILENO,
            errfile: STDERR_FILENO,
        }
    }

    pub fn write_stdout(&self, msg: &str) -> Result<()> {
        let mut file = unsafe { File::from_raw_fd(self.outfile) };
        writeln!(&mut file, "{msg}")?;
        // the fd belongs to the shell; only the File wrapper is temporary
        mem::forget(file);
        Ok(())
    }

    pub fn write_stderr(&self, msg: &str) -> Result<()> {
        let mut file = unsafe { File::from_raw_fd(self.errfile) };
        writeln!(&mut file, "{msg}")?;
        mem::forget(file);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.foreground = true;
        self.infile = STDIN_FILENO;
        self.outfile = STDOUT_FILENO;
        self.errfile = STDERR_FILENO;
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        f.debug_struct("Context")
            .field("shell_pid", &self.shell_pid)
            .field("shell_pgid", &self.shell_pgid)
            .field("foreground", &self.foreground)
            .field("interactive", &self.interactive)
            .field("infile", &self.infile)
            .field("outfile", &self.outfile)
            .field("errfile", &self.errfile)
            .finish()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitStatus {
    ExitedWith(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_matches_diagnostics() {
        assert_eq!(PsshError::InvalidSyntax.to_string(), "invalid syntax");
        assert_eq!(
            PsshError::TooManyArguments.to_string(),
            "too many arguments"
        );
        assert_eq!(
            PsshError::InvalidJobNumber("99".to_string()).to_string(),
            "invalid job number: [99]"
        );
        assert_eq!(
            PsshError::InvalidPid("abc".to_string()).to_string(),
            "invalid pid: [abc]"
        );
        assert_eq!(
            PsshError::InvalidSignal("64".to_string()).to_string(),
            "invalid signal: [64]"
        );
    }

    #[test]
    fn context_defaults_to_standard_descriptors() {
        let ctx = Context::new(Pid::from_raw(1), Pid::from_raw(1), true);
        assert_eq!(ctx.infile, STDIN_FILENO);
        assert_eq!(ctx.outfile, STDOUT_FILENO);
        assert_eq!(ctx.errfile, STDERR_FILENO);
        assert!(ctx.foreground);
    }

    #[test]
    fn reset_restores_descriptors() {
        let mut ctx = Context::new(Pid::from_raw(1), Pid::from_raw(1), true);
        ctx.outfile = 42;
        ctx.foreground = false;
        ctx.reset();
        assert_eq!(ctx.outfile, STDOUT_FILENO);
        assert!(ctx.foreground);
    }
}
