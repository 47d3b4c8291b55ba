use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, error};

/// One reaped child-state change, as consumed by the job table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Exited(Pid, i32),
    Signaled(Pid, Signal),
    Stopped(Pid, Signal),
    Continued(Pid),
}

impl ChildEvent {
    pub fn pid(&self) -> Pid {
        match *self {
            ChildEvent::Exited(pid, _)
            | ChildEvent::Signaled(pid, _)
            | ChildEvent::Stopped(pid, _)
            | ChildEvent::Continued(pid) => pid,
        }
    }
}

/// One non-blocking, all-state wait over every child. `None` when nothing
/// is pending; callers loop until then to drain a notification burst.
pub fn wait_next_child() -> Option<ChildEvent> {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        return match waitpid(None, Some(flags)) {
            Ok(WaitStatus::Exited(pid, code)) => Some(ChildEvent::Exited(pid, code)),
            Ok(WaitStatus::Signaled(pid, signal, _)) => Some(ChildEvent::Signaled(pid, signal)),
            Ok(WaitStatus::Stopped(pid, signal)) => Some(ChildEvent::Stopped(pid, signal)),
            Ok(WaitStatus::Continued(pid)) => Some(ChildEvent::Continued(pid)),
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => None,
            Err(Errno::EINTR) => continue,
            status => {
                error!("unexpected waitpid event: {:?}", status);
                None
            }
        };
    }
}

/// Blocking reap of a single pid. Used for children the shell never
/// registers as jobs (the `which` helper, killed orphan stages).
pub fn wait_pid_blocking(pid: Pid) -> Option<i32> {
    loop {
        return match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => Some(code),
            Ok(WaitStatus::Signaled(_, _, _)) => Some(1),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => None,
            status => {
                debug!("wait_pid_blocking: unexpected event: {:?}", status);
                None
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_children_means_no_event() {
        // the test process has no children of its own
        assert_eq!(wait_next_child(), None);
    }

    #[test]
    fn event_exposes_its_pid() {
        let pid = Pid::from_raw(42);
        assert_eq!(ChildEvent::Exited(pid, 0).pid(), pid);
        assert_eq!(ChildEvent::Signaled(pid, Signal::SIGKILL).pid(), pid);
        assert_eq!(ChildEvent::Stopped(pid, Signal::SIGTSTP).pid(), pid);
        assert_eq!(ChildEvent::Continued(pid).pid(), pid);
    }
}
