use anyhow::Result;
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use pssh_types::{Context, ExitStatus};
use std::collections::HashMap;
use tracing::debug;

mod bg;
mod fg;
mod jobs;
mod kill;
mod which;

/// Interface builtin commands use to reach back into the shell. Commands
/// that must read or mutate the job table go through `dispatch`; `kill`
/// only needs to resolve a `%job` token to its process group.
pub trait ShellProxy {
    /// Initiates shell exit; the read-eval loop terminates afterwards.
    fn exit_shell(&mut self);

    /// Hands a command back to the shell's own dispatch (fg/bg/jobs).
    fn dispatch(&mut self, ctx: &Context, cmd: &str, argv: Vec<String>) -> Result<()>;

    /// Resolves a live job number to its process-group id.
    fn job_pgid(&self, job_number: usize) -> Option<Pid>;
}

/// All builtin commands conform to this signature. `argv[0]` is the
/// command name.
pub type BuiltinCommand =
    fn(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus;

static BUILTIN_COMMAND: Lazy<HashMap<&'static str, BuiltinCommand>> = Lazy::new(|| {
    let mut builtin: HashMap<&'static str, BuiltinCommand> = HashMap::new();
    builtin.insert("exit", exit as BuiltinCommand);
    builtin.insert("which", which::command as BuiltinCommand);
    builtin.insert("fg", fg::command as BuiltinCommand);
    builtin.insert("bg", bg::command as BuiltinCommand);
    builtin.insert("kill", kill::command as BuiltinCommand);
    builtin.insert("jobs", jobs::command as BuiltinCommand);
    builtin
});

pub fn get_command(name: &str) -> Option<BuiltinCommand> {
    BUILTIN_COMMAND.get(name).copied()
}

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_COMMAND.contains_key(name)
}

pub fn exit(_ctx: &Context, _argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    debug!("exit builtin called");
    proxy.exit_shell();
    ExitStatus::ExitedWith(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_builtin() {
        for name in ["exit", "which", "fg", "bg", "kill", "jobs"] {
            assert!(is_builtin(name), "{name} missing from registry");
            assert!(get_command(name).is_some());
        }
        assert!(!is_builtin("ls"));
        assert!(get_command("ls").is_none());
    }
}
