use anyhow::{Result, bail};
use nix::unistd::Pid;
use pssh_builtin::ShellProxy;
use pssh_types::{Context, ExitStatus};
use tracing::debug;

use crate::shell::Shell;

impl ShellProxy for Shell {
    fn exit_shell(&mut self) {
        debug!("shell exit requested");
        self.exited = Some(ExitStatus::ExitedWith(0));
    }

    fn dispatch(&mut self, ctx: &Context, cmd: &str, argv: Vec<String>) -> Result<()> {
        match cmd {
            "fg" => self.builtin_fg(ctx, argv),
            "bg" => self.builtin_bg(ctx, argv),
            "jobs" => self.builtin_jobs(ctx),
            _ => bail!("unknown dispatch target: {cmd}"),
        }
    }

    fn job_pgid(&self, job_number: usize) -> Option<Pid> {
        self.jobs.live_pgid(job_number)
    }
}
