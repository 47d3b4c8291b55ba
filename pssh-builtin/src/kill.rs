use super::ShellProxy;
use anyhow::Result;
use getopts::Options;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal, killpg};
use nix::unistd::Pid;
use pssh_types::{Context, ExitStatus, PsshError, PsshResult};
use tracing::debug;

/// A single `kill` operand: a raw process id or a `%job` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Pid(i32),
    Job(usize),
}

fn parse_target(token: &str) -> PsshResult<Target> {
    if let Some(digits) = token.strip_prefix('%') {
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PsshError::InvalidJobNumber(token.to_string()));
        }
        digits
            .parse()
            .map(Target::Job)
            .map_err(|_| PsshError::InvalidJobNumber(token.to_string()))
    } else {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return Err(PsshError::InvalidPid(token.to_string()));
        }
        token
            .parse()
            .map(Target::Pid)
            .map_err(|_| PsshError::InvalidPid(token.to_string()))
    }
}

/// Signal numbers 0 (existence probe) through 31 are accepted; anything
/// else is rejected.
fn parse_signal(arg: &str) -> PsshResult<i32> {
    let invalid = || PsshError::InvalidSignal(arg.to_string());
    if arg.is_empty() || !arg.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let num: i32 = arg.parse().map_err(|_| invalid())?;
    if (0..=31).contains(&num) {
        Ok(num)
    } else {
        Err(invalid())
    }
}

pub fn command(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> ExitStatus {
    match run(ctx, argv, proxy) {
        Ok(code) => ExitStatus::ExitedWith(code),
        Err(e) => {
            ctx.write_stderr(&format!("pssh: {e}")).ok();
            ExitStatus::ExitedWith(1)
        }
    }
}

fn run(ctx: &Context, argv: Vec<String>, proxy: &mut dyn ShellProxy) -> Result<i32> {
    let mut opts = Options::new();
    opts.optopt("s", "signal", "signal number to send", "SIGNAL");

    let matches = match opts.parse(&argv[1..]) {
        Ok(m) => m,
        Err(f) => {
            ctx.write_stderr(&format!("pssh: kill: {f}")).ok();
            return Ok(1);
        }
    };

    if matches.free.is_empty() {
        ctx.write_stdout("\nUsage: kill [-s <signal>] <pid> | %<job> ...\n")?;
        return Ok(if matches.opt_present("s") { 1 } else { 0 });
    }

    let signum = match matches.opt_str("s") {
        Some(arg) => match parse_signal(&arg) {
            Ok(num) => num,
            Err(e) => {
                ctx.write_stderr(&format!("pssh: {e}")).ok();
                return Ok(1);
            }
        },
        None => libc::SIGTERM,
    };

    let mut code = 0;
    for token in &matches.free {
        if let Err(e) = kill_one(ctx, proxy, token, signum) {
            ctx.write_stderr(&format!("pssh: {e}")).ok();
            code = 1;
        }
    }
    Ok(code)
}

fn kill_one(
    ctx: &Context,
    proxy: &mut dyn ShellProxy,
    token: &str,
    signum: i32,
) -> PsshResult<()> {
    let target = parse_target(token)?;
    debug!("kill: target {:?} signal {}", target, signum);

    // %job tokens address the whole process group
    let (id, is_job) = match target {
        Target::Job(n) => {
            let pgid = proxy
                .job_pgid(n)
                .ok_or_else(|| PsshError::InvalidJobNumber(n.to_string()))?;
            (pgid, true)
        }
        Target::Pid(raw) => (Pid::from_raw(raw), false),
    };

    if signum == 0 {
        probe(ctx, id, is_job);
        return Ok(());
    }

    // 1..=31 was validated up front, so the conversion cannot fail
    let signal = Signal::try_from(signum)
        .map_err(|_| PsshError::InvalidSignal(signum.to_string()))?;
    let result = if is_job {
        killpg(id, signal)
    } else {
        signal::kill(id, signal)
    };
    match result {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) if is_job => Err(PsshError::InvalidJobNumber(token.to_string())),
        Err(Errno::ESRCH) => Err(PsshError::InvalidPid(token.to_string())),
        Err(e) => {
            ctx.write_stderr(&format!("pssh: kill: failed to signal {token}: {e}"))
                .ok();
            Ok(())
        }
    }
}

/// Signal 0: report whether the target exists and accepts signals,
/// without delivering anything.
fn probe(ctx: &Context, id: Pid, is_job: bool) {
    let label = if is_job { "PGID" } else { "PID" };
    let result = if is_job {
        killpg(id, None)
    } else {
        signal::kill(id, None)
    };
    let msg = match result {
        Ok(()) => format!("{label} {id} exists and is able to receive signals"),
        Err(Errno::EPERM) => format!("{label} {id} exists, but we can't send it signals"),
        _ => format!("{label} {id} does not exist"),
    };
    ctx.write_stdout(&msg).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_pids() {
        assert_eq!(parse_target("1234"), Ok(Target::Pid(1234)));
        assert_eq!(
            parse_target("12a4"),
            Err(PsshError::InvalidPid("12a4".to_string()))
        );
        assert_eq!(
            parse_target("-5"),
            Err(PsshError::InvalidPid("-5".to_string()))
        );
    }

    #[test]
    fn parses_job_tokens() {
        assert_eq!(parse_target("%0"), Ok(Target::Job(0)));
        assert_eq!(parse_target("%12"), Ok(Target::Job(12)));
        assert_eq!(
            parse_target("%"),
            Err(PsshError::InvalidJobNumber("%".to_string()))
        );
        assert_eq!(
            parse_target("%x1"),
            Err(PsshError::InvalidJobNumber("%x1".to_string()))
        );
    }

    #[test]
    fn signal_range_is_enforced() {
        assert_eq!(parse_signal("0"), Ok(0));
        assert_eq!(parse_signal("9"), Ok(9));
        assert_eq!(parse_signal("31"), Ok(31));
        assert_eq!(
            parse_signal("32"),
            Err(PsshError::InvalidSignal("32".to_string()))
        );
        assert_eq!(
            parse_signal("hup"),
            Err(PsshError::InvalidSignal("hup".to_string()))
        );
        assert_eq!(
            parse_signal("-1"),
            Err(PsshError::InvalidSignal("-1".to_string()))
        );
    }
}
