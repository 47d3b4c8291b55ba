//! The shell's single source of truth for what is running.
//!
//! Every status change funnels through [`JobTable`] methods; the reaping
//! loop and the builtins never touch a [`Job`] directly.

use nix::unistd::Pid;
use tracing::debug;

use crate::process::ChildEvent;

pub const JOB_TABLE_CAPACITY: usize = 100;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobStatus {
    Foreground,
    Background,
    Stopped,
    Terminated,
}

/// A status transition not yet reported to the user; surfaced at the next
/// prompt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Notice {
    Suspended,
    Continued,
    Done,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Notice::Suspended => f.write_str("suspended"),
            Notice::Continued => f.write_str("continued"),
            Notice::Done => f.write_str("done"),
        }
    }
}

/// One pipeline launch: one process group, one table slot.
#[derive(Debug)]
pub struct Job {
    name: String,
    /// One entry per stage; `None` marks a reaped stage.
    pids: Vec<Option<Pid>>,
    remaining: usize,
    pgid: Pid,
    status: JobStatus,
    notice: Option<Notice>,
}

impl Job {
    fn new(name: &str, pids: Vec<Pid>, background: bool) -> Self {
        let pgid = pids[0];
        Job {
            name: name.to_string(),
            remaining: pids.len(),
            pids: pids.into_iter().map(Some).collect(),
            pgid,
            status: if background {
                JobStatus::Background
            } else {
                JobStatus::Foreground
            },
            notice: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn total(&self) -> usize {
        self.pids.len()
    }

    pub fn is_live(&self) -> bool {
        self.status != JobStatus::Terminated
    }

    /// Label used by the `jobs` listing.
    pub fn run_label(&self) -> &'static str {
        match self.status {
            JobStatus::Foreground | JobStatus::Background => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Terminated => "done",
        }
    }

    fn contains(&self, pid: Pid) -> bool {
        self.pids.iter().any(|p| *p == Some(pid))
    }

    /// Clear the slot for `pid`; true if it was still outstanding.
    fn reap(&mut self, pid: Pid) -> bool {
        if let Some(slot) = self.pids.iter_mut().find(|p| **p == Some(pid)) {
            *slot = None;
            self.remaining -= 1;
            debug!("reaped {pid}, {} remaining", self.remaining);
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    /// Exclusive upper bound on occupied slots; keeps scans short.
    highest_used: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            slots: (0..JOB_TABLE_CAPACITY).map(|_| None).collect(),
            highest_used: 0,
        }
    }

    /// Install a freshly launched pipeline. The job number is the lowest
    /// free slot, scanning from 0; `None` when the table is full.
    pub fn register(&mut self, name: &str, pids: Vec<Pid>, background: bool) -> Option<usize> {
        debug_assert!(!pids.is_empty());
        let slot = self.slots.iter().position(|s| s.is_none())?;
        debug!("registering job {slot}: {name}");
        self.slots[slot] = Some(Job::new(name, pids, background));
        self.highest_used = self.highest_used.max(slot + 1);
        Some(slot)
    }

    pub fn get(&self, n: usize) -> Option<&Job> {
        self.slots.get(n)?.as_ref()
    }

    pub fn status(&self, n: usize) -> Option<JobStatus> {
        self.get(n).map(|j| j.status)
    }

    /// The process group of job `n`, when the slot holds a live job.
    pub fn live_pgid(&self, n: usize) -> Option<Pid> {
        self.get(n).filter(|j| j.is_live()).map(|j| j.pgid)
    }

    fn position_of_pid(&self, pid: Pid) -> Option<usize> {
        (0..self.highest_used)
            .find(|&i| self.slots[i].as_ref().is_some_and(|j| j.contains(pid)))
    }

    /// The state machine: translate one reaped child event into a job
    /// transition. Returns the affected job number; events for pids the
    /// table does not know (e.g. the `which` helper) are ignored.
    pub fn apply(&mut self, event: ChildEvent) -> Option<usize> {
        let n = self.position_of_pid(event.pid())?;
        let job = self.slots[n].as_mut()?;

        match event {
            ChildEvent::Stopped(pid, signal) => {
                if matches!(job.status, JobStatus::Foreground | JobStatus::Background) {
                    debug!("job {n} stopped by {signal:?} (pid {pid})");
                    job.status = JobStatus::Stopped;
                    job.notice = Some(Notice::Suspended);
                }
            }
            ChildEvent::Continued(pid) => {
                if job.status == JobStatus::Stopped {
                    job.status = JobStatus::Background;
                }
                // one notice per group, keyed on the leader
                if job.status == JobStatus::Background && pid == job.pgid {
                    job.notice = Some(Notice::Continued);
                }
            }
            ChildEvent::Exited(pid, _) | ChildEvent::Signaled(pid, _) => {
                if job.reap(pid) && job.remaining == 0 {
                    debug!("job {n} fully reaped ({} stages)", job.total());
                    let was = job.status;
                    job.status = JobStatus::Terminated;
                    job.notice = match was {
                        JobStatus::Background | JobStatus::Stopped => Some(Notice::Done),
                        // a foreground job's completion needs no report
                        _ => None,
                    };
                }
            }
        }
        Some(n)
    }

    /// `fg`: flip a live job to foreground. Returns its pgid.
    pub fn set_foreground(&mut self, n: usize) -> Option<Pid> {
        let job = self.slots.get_mut(n)?.as_mut().filter(|j| j.is_live())?;
        job.status = JobStatus::Foreground;
        Some(job.pgid)
    }

    /// `bg`: flip a live job to background. Returns its pgid.
    pub fn set_background(&mut self, n: usize) -> Option<Pid> {
        let job = self.slots.get_mut(n)?.as_mut().filter(|j| j.is_live())?;
        job.status = JobStatus::Background;
        Some(job.pgid)
    }

    /// Drain pending notices in slot order, reclaiming every `Terminated`
    /// slot on the way out; its number becomes reusable.
    pub fn take_notices(&mut self) -> Vec<(usize, Notice, String)> {
        let mut out = Vec::new();
        for i in 0..self.highest_used {
            if let Some(job) = self.slots[i].as_mut() {
                if let Some(notice) = job.notice.take() {
                    out.push((i, notice, job.name.clone()));
                }
                if job.status == JobStatus::Terminated {
                    self.slots[i] = None;
                }
            }
        }
        while self.highest_used > 0 && self.slots[self.highest_used - 1].is_none() {
            self.highest_used -= 1;
        }
        out
    }

    /// Live jobs in slot order, for the `jobs` listing.
    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.slots[..self.highest_used]
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|j| j.is_live()).map(|j| (i, j)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn numbering_starts_at_zero_and_reuses_lowest() {
        let mut table = JobTable::new();
        assert_eq!(table.register("a", vec![pid(10)], true), Some(0));
        assert_eq!(table.register("b", vec![pid(20)], true), Some(1));
        assert_eq!(table.register("c", vec![pid(30)], true), Some(2));

        // terminate and reclaim job 1
        table.apply(ChildEvent::Exited(pid(20), 0));
        assert_eq!(table.status(1), Some(JobStatus::Terminated));
        table.take_notices();
        assert!(table.get(1).is_none());

        // the freed slot is reused before the table grows
        assert_eq!(table.register("d", vec![pid(40)], true), Some(1));
    }

    #[test]
    fn remaining_counts_down_and_triggers_termination() {
        let mut table = JobTable::new();
        let n = table
            .register("cat | sort | uniq", vec![pid(1), pid(2), pid(3)], false)
            .unwrap();
        assert_eq!(table.get(n).unwrap().remaining(), 3);
        assert_eq!(table.get(n).unwrap().total(), 3);

        table.apply(ChildEvent::Exited(pid(2), 0));
        assert_eq!(table.get(n).unwrap().remaining(), 2);
        assert_eq!(table.status(n), Some(JobStatus::Foreground));

        table.apply(ChildEvent::Exited(pid(1), 0));
        assert_eq!(table.get(n).unwrap().remaining(), 1);
        assert_eq!(table.status(n), Some(JobStatus::Foreground));

        table.apply(ChildEvent::Signaled(pid(3), Signal::SIGKILL));
        assert_eq!(table.get(n).unwrap().remaining(), 0);
        assert_eq!(table.status(n), Some(JobStatus::Terminated));
    }

    #[test]
    fn reaping_a_pid_twice_is_harmless() {
        let mut table = JobTable::new();
        let n = table.register("a | b", vec![pid(1), pid(2)], true).unwrap();
        table.apply(ChildEvent::Exited(pid(1), 0));
        table.apply(ChildEvent::Exited(pid(1), 0));
        assert_eq!(table.get(n).unwrap().remaining(), 1);
        assert_eq!(table.status(n), Some(JobStatus::Background));
    }

    #[test]
    fn background_termination_is_reported_once() {
        let mut table = JobTable::new();
        let n = table.register("sleep 5", vec![pid(7)], true).unwrap();
        table.apply(ChildEvent::Exited(pid(7), 0));

        let notices = table.take_notices();
        assert_eq!(notices.len(), 1);
        let (num, notice, name) = &notices[0];
        assert_eq!((*num, *notice, name.as_str()), (n, Notice::Done, "sleep 5"));

        // reported and reclaimed
        assert!(table.get(n).is_none());
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn foreground_termination_is_silent() {
        let mut table = JobTable::new();
        let n = table.register("ls", vec![pid(5)], false).unwrap();
        table.apply(ChildEvent::Exited(pid(5), 0));
        assert_eq!(table.status(n), Some(JobStatus::Terminated));
        assert!(table.take_notices().is_empty());
        assert!(table.get(n).is_none());
    }

    #[test]
    fn stop_latches_a_suspended_notice() {
        let mut table = JobTable::new();
        let n = table.register("vim", vec![pid(9)], false).unwrap();
        table.apply(ChildEvent::Stopped(pid(9), Signal::SIGTSTP));
        assert_eq!(table.status(n), Some(JobStatus::Stopped));

        let notices = table.take_notices();
        assert_eq!(notices[0].1, Notice::Suspended);
        // job is still live, only the notice was consumed
        assert_eq!(table.status(n), Some(JobStatus::Stopped));
    }

    #[test]
    fn continue_moves_stopped_to_background() {
        let mut table = JobTable::new();
        let n = table.register("a | b", vec![pid(1), pid(2)], true).unwrap();
        table.apply(ChildEvent::Stopped(pid(1), Signal::SIGSTOP));
        table.take_notices();

        // non-leader continue transitions but stays quiet
        table.apply(ChildEvent::Continued(pid(2)));
        assert_eq!(table.status(n), Some(JobStatus::Background));
        assert!(table.take_notices().is_empty());

        // the leader's continue is the one reported
        table.apply(ChildEvent::Continued(pid(1)));
        let notices = table.take_notices();
        assert_eq!(notices[0].1, Notice::Continued);
    }

    #[test]
    fn continue_of_foreground_job_is_quiet() {
        let mut table = JobTable::new();
        let n = table.register("make", vec![pid(4)], false).unwrap();
        table.apply(ChildEvent::Continued(pid(4)));
        assert_eq!(table.status(n), Some(JobStatus::Foreground));
        assert!(table.take_notices().is_empty());
    }

    #[test]
    fn unknown_pids_are_ignored() {
        let mut table = JobTable::new();
        table.register("a", vec![pid(1)], true);
        assert_eq!(table.apply(ChildEvent::Exited(pid(999), 0)), None);
        assert_eq!(table.get(0).unwrap().remaining(), 1);
    }

    #[test]
    fn fg_bg_only_touch_live_jobs() {
        let mut table = JobTable::new();
        let n = table.register("sleep 9", vec![pid(3)], true).unwrap();
        table.apply(ChildEvent::Stopped(pid(3), Signal::SIGTSTP));

        assert_eq!(table.set_background(n), Some(pid(3)));
        assert_eq!(table.status(n), Some(JobStatus::Background));
        assert_eq!(table.set_foreground(n), Some(pid(3)));
        assert_eq!(table.status(n), Some(JobStatus::Foreground));

        table.apply(ChildEvent::Exited(pid(3), 0));
        assert_eq!(table.set_foreground(n), None);
        assert_eq!(table.set_background(n), None);
        assert_eq!(table.live_pgid(n), None);
    }

    #[test]
    fn jobs_listing_skips_terminated_slots() {
        let mut table = JobTable::new();
        table.register("first", vec![pid(1)], true);
        table.register("second", vec![pid(2)], true);
        table.apply(ChildEvent::Exited(pid(1), 0));

        let live: Vec<_> = table.iter_live().map(|(i, j)| (i, j.name())).collect();
        assert_eq!(live, vec![(1, "second")]);
        assert_eq!(table.get(1).unwrap().run_label(), "running");
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut table = JobTable::new();
        for i in 0..JOB_TABLE_CAPACITY {
            assert_eq!(
                table.register("j", vec![pid(1000 + i as i32)], true),
                Some(i)
            );
        }
        assert_eq!(table.register("overflow", vec![pid(5000)], true), None);
    }
}
