use anyhow::{Context as _, Result};
use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{Pid, close, getpid, pipe, setpgid};
use pssh_types::{Context, ExitStatus, PsshError};
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, warn};

use crate::jobs::{JobStatus, JobTable};
use crate::parser::{self, Parse};
use crate::process::fork::fork_process;
use crate::process::signal::{self, SignalRelay};
use crate::process::wait::{wait_next_child, wait_pid_blocking};
use crate::process::{io, Process};
use crate::terminal;

pub struct Shell {
    pub pid: Pid,
    pub pgid: Pid,
    pub exited: Option<ExitStatus>,
    pub(crate) jobs: JobTable,
    relay: SignalRelay,
}

impl Shell {
    pub fn new() -> Result<Self> {
        let pid = getpid();
        let pgid = pid;
        // may fail when we are already a session leader
        if let Err(err) = setpgid(pid, pgid) {
            debug!("setpgid: {err}");
        }
        let relay = SignalRelay::install()?;
        Ok(Shell {
            pid,
            pgid,
            exited: None,
            jobs: JobTable::new(),
            relay,
        })
    }

    /// Ignore the signals a job-control shell must survive; children
    /// restore the defaults before exec.
    pub fn set_signals(&mut self) {
        let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        unsafe {
            sigaction(Signal::SIGINT, &action).expect("failed sigaction");
            sigaction(Signal::SIGQUIT, &action).expect("failed sigaction");
            sigaction(Signal::SIGTSTP, &action).expect("failed sigaction");
            sigaction(Signal::SIGTTIN, &action).expect("failed sigaction");
            sigaction(Signal::SIGTTOU, &action).expect("failed sigaction");
        }
    }

    /// Parse and run one command line.
    pub fn eval_str(&mut self, ctx: &mut Context, line: &str) -> Result<()> {
        let Some(parse) = parser::parse_cmdline(line) else {
            return Ok(());
        };
        if parse.invalid_syntax {
            println!("pssh: invalid syntax");
            return Ok(());
        }
        debug!("eval: {parse:?}");

        if pssh_builtin::is_builtin(&parse.tasks[0].command) {
            self.run_builtin(ctx, &parse)
        } else {
            self.execute_pipeline(ctx, &parse, line)
        }
    }

    /// Builtins run in-process and never become jobs. An output
    /// redirection is applied by retargeting the context's stdout fd.
    fn run_builtin(&mut self, ctx: &mut Context, parse: &Parse) -> Result<()> {
        let task = &parse.tasks[0];
        let Some(cmd_fn) = pssh_builtin::get_command(&task.command) else {
            return Ok(());
        };

        let mut opened: Option<RawFd> = None;
        if let Some(ref path) = parse.outfile {
            match io::open_output(path) {
                Ok(fd) => {
                    ctx.outfile = fd;
                    opened = Some(fd);
                }
                Err(err) => {
                    eprintln!("pssh: {err:#}");
                    return Ok(());
                }
            }
        }

        let status = cmd_fn(ctx, task.argv.clone(), self);
        debug!("builtin {} -> {:?}", task.command, status);

        if let Some(fd) = opened {
            let _ = close(fd);
            ctx.reset();
        }
        Ok(())
    }

    /// The Pipeline Executor: launch every stage of an external pipeline
    /// into one process group, register the job, and hand over the
    /// terminal when it runs in the foreground.
    fn execute_pipeline(&mut self, ctx: &mut Context, parse: &Parse, cmdline: &str) -> Result<()> {
        let ntasks = parse.tasks.len();
        let foreground = !parse.background;
        ctx.foreground = foreground;

        let mut pids: Vec<Pid> = Vec::with_capacity(ntasks);
        let mut pgid: Option<Pid> = None;
        let mut prev_read: Option<RawFd> = None;

        for (t, task) in parse.tasks.iter().enumerate() {
            // resolve before forking so the diagnostic comes from the
            // shell, not a half-built child
            let path = match which::which(&task.command) {
                Ok(path) => path,
                Err(_) => {
                    println!("pssh: command not found: {}", task.command);
                    self.abort_launch(pgid, &pids, prev_read.take(), foreground);
                    return Ok(());
                }
            };

            let pipe_fds = if t + 1 < ntasks {
                match pipe() {
                    Ok(fds) => Some(fds),
                    Err(err) => {
                        self.abort_launch(pgid, &pids, prev_read.take(), foreground);
                        if t == 0 {
                            // an unrecoverable resource condition
                            return Err(err).context("failed to create pipe");
                        }
                        eprintln!("pssh: failed to create pipe: {err}");
                        return Ok(());
                    }
                }
            } else {
                None
            };

            // stage stdin: the previous pipe's read end, or the input
            // file on stage 0
            let stdin = match prev_read.take() {
                Some(fd) => fd,
                None => match parse.infile {
                    Some(ref path) if t == 0 => match io::open_input(path) {
                        Ok(fd) => fd,
                        Err(err) => {
                            eprintln!("pssh: {err:#}");
                            close_pipe(pipe_fds);
                            self.abort_launch(pgid, &pids, None, foreground);
                            return Ok(());
                        }
                    },
                    _ => STDIN_FILENO,
                },
            };

            // stage stdout: the current pipe's write end, or the output
            // file on the last stage
            let stdout = match pipe_fds {
                Some((_, pin)) => pin,
                None => match parse.outfile {
                    Some(ref path) => match io::open_output(path) {
                        Ok(fd) => fd,
                        Err(err) => {
                            eprintln!("pssh: {err:#}");
                            if stdin != STDIN_FILENO {
                                let _ = close(stdin);
                            }
                            self.abort_launch(pgid, &pids, None, foreground);
                            return Ok(());
                        }
                    },
                    None => STDOUT_FILENO,
                },
            };

            let mut process = Process::new(task.command.clone(), path, task.argv.clone());
            process.stdin = stdin;
            process.stdout = stdout;
            process.close_before_exec = pipe_fds.map(|(pout, _)| pout);

            let pid = match fork_process(&mut process, pgid, ctx.interactive, foreground) {
                Ok(pid) => pid,
                Err(err) => {
                    close_pipe(pipe_fds);
                    if stdin != STDIN_FILENO {
                        let _ = close(stdin);
                    }
                    self.abort_launch(pgid, &pids, None, foreground);
                    if t == 0 {
                        return Err(err);
                    }
                    eprintln!("pssh: {err:#}");
                    return Ok(());
                }
            };

            // the first child's pid is the group for the whole pipeline;
            // both sides call setpgid to close the fork race
            if pgid.is_none() {
                pgid = Some(pid);
                if foreground && ctx.interactive {
                    terminal::set_foreground(pid)?;
                }
            }
            if ctx.interactive
                && let Err(err) = setpgid(pid, pgid.unwrap_or(pid))
            {
                debug!("setpgid {pid}: {err}");
            }

            // drop the descriptors the child now owns; the pipe's write
            // end must go immediately or its reader never sees EOF
            if stdin != STDIN_FILENO {
                let _ = close(stdin);
            }
            if stdout != STDOUT_FILENO {
                let _ = close(stdout);
            }
            prev_read = pipe_fds.map(|(pout, _)| pout);

            pids.push(pid);
        }

        let Some(pgid) = pgid else {
            return Ok(());
        };

        let Some(job_number) = self.jobs.register(cmdline, pids.clone(), parse.background) else {
            warn!("job table full, refusing pipeline pgid {pgid}");
            eprintln!("pssh: too many jobs");
            let _ = signal::kill_group(pgid, Signal::SIGKILL);
            for pid in &pids {
                let _ = wait_pid_blocking(*pid);
            }
            if foreground {
                terminal::set_foreground(self.pgid)?;
            }
            return Ok(());
        };

        if parse.background {
            let mut line = format!("[{job_number}]");
            for pid in &pids {
                line.push_str(&format!(" {pid}"));
            }
            println!("{line}");
            Ok(())
        } else {
            self.foreground_wait(job_number)
        }
    }

    /// A stage failed to launch mid-pipeline: kill whatever part of the
    /// group is already running and reap it, so no orphan outlives the
    /// failed launch.
    fn abort_launch(
        &mut self,
        pgid: Option<Pid>,
        pids: &[Pid],
        prev_read: Option<RawFd>,
        foreground: bool,
    ) {
        if let Some(fd) = prev_read {
            let _ = close(fd);
        }
        let Some(pgid) = pgid else {
            return;
        };
        debug!("aborting launch, killing pgid {pgid}");
        if let Err(err) = signal::kill_group(pgid, Signal::SIGKILL) {
            debug!("kill_group: {err}");
        }
        for pid in pids {
            let _ = wait_pid_blocking(*pid);
        }
        if foreground {
            if let Err(err) = terminal::set_foreground(self.pgid) {
                warn!("failed to reclaim terminal: {err}");
            }
        }
    }

    /// Block until the foreground job stops or terminates, then take the
    /// terminal back. This is the only place the shell waits on a job.
    pub(crate) fn foreground_wait(&mut self, job_number: usize) -> Result<()> {
        debug!("waiting for foreground job {job_number}");
        loop {
            self.drain_child_events();
            if self.jobs.status(job_number) != Some(JobStatus::Foreground) {
                break;
            }
            if let Some(job) = self.jobs.get(job_number) {
                debug!(
                    "job {job_number}: {} of {} stages outstanding",
                    job.remaining(),
                    job.total()
                );
            }
            self.relay.wait(Duration::from_millis(100));
        }
        terminal::set_foreground(self.pgid)
    }

    /// The Signal Relay's main-loop half: drain every pending child-state
    /// change without blocking and run it through the job table.
    pub fn drain_child_events(&mut self) {
        self.relay.clear();
        while let Some(event) = wait_next_child() {
            debug!("reaped {event:?}");
            if self.jobs.apply(event).is_none() {
                debug!("event for untracked pid {}", event.pid());
            }
        }
    }

    /// Print deferred stop/continue/done notices and reclaim reported
    /// terminated slots. Called once per prompt.
    pub fn report_notices(&mut self) {
        for (n, notice, name) in self.jobs.take_notices() {
            println!("[{n}] + {notice}    {name}");
        }
    }

    // shell-side halves of the job-control builtins, reached through
    // ShellProxy::dispatch

    pub(crate) fn builtin_fg(&mut self, ctx: &Context, argv: Vec<String>) -> Result<()> {
        let n = parse_job_token(&argv)?;
        let Some(pgid) = self.jobs.live_pgid(n) else {
            return Err(PsshError::InvalidJobNumber(n.to_string()).into());
        };
        self.jobs.set_foreground(n);
        if let Some(job) = self.jobs.get(n) {
            ctx.write_stdout(job.name())?;
        }
        terminal::set_foreground(pgid)?;
        signal::send_cont(pgid)?;
        self.foreground_wait(n)
    }

    pub(crate) fn builtin_bg(&mut self, _ctx: &Context, argv: Vec<String>) -> Result<()> {
        let n = parse_job_token(&argv)?;
        let Some(pgid) = self.jobs.live_pgid(n) else {
            return Err(PsshError::InvalidJobNumber(n.to_string()).into());
        };
        self.jobs.set_background(n);
        signal::send_cont(pgid)
    }

    pub(crate) fn builtin_jobs(&mut self, ctx: &Context) -> Result<()> {
        for (n, job) in self.jobs.iter_live() {
            ctx.write_stdout(&format!("[{n}] + {}    {}", job.run_label(), job.name()))?;
        }
        Ok(())
    }
}

/// Validate the single `%<digits>` argument of `fg`/`bg`. `argv[0]` is
/// the command name; the caller has already checked an argument exists.
pub(crate) fn parse_job_token(argv: &[String]) -> Result<usize, PsshError> {
    if argv.len() > 2 {
        return Err(PsshError::TooManyArguments);
    }
    let token = &argv[1];
    let Some(digits) = token.strip_prefix('%') else {
        return Err(PsshError::InvalidSyntax);
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PsshError::InvalidJobNumber(token.clone()));
    }
    digits
        .parse()
        .map_err(|_| PsshError::InvalidJobNumber(token.clone()))
}

fn close_pipe(fds: Option<(RawFd, RawFd)>) {
    if let Some((pout, pin)) = fds {
        let _ = close(pout);
        let _ = close(pin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn job_token_accepts_percent_digits() {
        assert_eq!(parse_job_token(&args(&["fg", "%0"])), Ok(0));
        assert_eq!(parse_job_token(&args(&["fg", "%42"])), Ok(42));
    }

    #[test]
    fn job_token_rejects_extra_arguments() {
        assert_eq!(
            parse_job_token(&args(&["fg", "%1", "%2"])),
            Err(PsshError::TooManyArguments)
        );
    }

    #[test]
    fn job_token_requires_percent_prefix() {
        assert_eq!(
            parse_job_token(&args(&["fg", "1"])),
            Err(PsshError::InvalidSyntax)
        );
    }

    #[test]
    fn job_token_rejects_non_digits() {
        assert_eq!(
            parse_job_token(&args(&["fg", "%x"])),
            Err(PsshError::InvalidJobNumber("%x".to_string()))
        );
        assert_eq!(
            parse_job_token(&args(&["bg", "%"])),
            Err(PsshError::InvalidJobNumber("%".to_string()))
        );
    }
}
