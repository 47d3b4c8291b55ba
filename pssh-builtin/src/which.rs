use super::ShellProxy;
use libc::STDOUT_FILENO;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, dup2, execv, fork};
use pssh_types::{Context, ExitStatus};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use tracing::debug;

/// `which <name>`. Builtin names are answered in-process; everything else
/// is handed to the external `which` helper in a forked child so that an
/// output redirection can be applied without disturbing the shell's own
/// descriptors.
pub fn command(ctx: &Context, argv: Vec<String>, _proxy: &mut dyn ShellProxy) -> ExitStatus {
    let Some(name) = argv.get(1) else {
        return ExitStatus::ExitedWith(0);
    };

    if crate::is_builtin(name) {
        ctx.write_stdout(&format!("{name}: shell built-in command")).ok();
        return ExitStatus::ExitedWith(0);
    }

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("which helper forked as {child}");
            match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => ExitStatus::ExitedWith(code),
                _ => ExitStatus::ExitedWith(1),
            }
        }
        Ok(ForkResult::Child) => {
            exec_helper(ctx, name);
        }
        Err(e) => {
            ctx.write_stderr(&format!("pssh: failed to fork: {e}")).ok();
            ExitStatus::ExitedWith(1)
        }
    }
}

/// Child side: apply the redirection and become `which <name>`.
fn exec_helper(ctx: &Context, name: &str) -> ! {
    if ctx.outfile != STDOUT_FILENO {
        let _ = dup2(ctx.outfile, STDOUT_FILENO);
    }

    if let Ok(path) = ::which::which("which")
        && let Ok(helper) = CString::new(path.as_os_str().as_bytes())
        && let Ok(arg) = CString::new(name)
    {
        let argv = vec![helper.clone(), arg];
        let _ = execv(&helper, &argv);
    }

    println!("pssh: found but can't exec: which");
    std::process::exit(1);
}
