use std::io::Write;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{describe_status, ShellError};
use crate::probe::{self, Completion};

/// The registry shared between the read loop and the timer interrupt.
///
/// The interrupt side only ever uses `try_lock`, so a tick that lands while
/// the lock is held is dropped instead of spinning.
pub type SharedScheduler = spin::Mutex<BackgroundScheduler>;

/// The OS operations the scheduler needs. Real processes go through
/// [`OsProcesses`]; tests substitute a recording fake.
pub trait ProcessControl {
    fn suspend(&self, pid: Pid) -> Result<(), Errno>;
    fn resume(&self, pid: Pid) -> Result<(), Errno>;
    /// Signal-0 existence check.
    fn exists(&self, pid: Pid) -> bool;
    fn probe(&self, pid: Pid) -> Result<Completion, ShellError>;
}

pub struct OsProcesses;

impl ProcessControl for OsProcesses {
    fn suspend(&self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGSTOP)
    }

    fn resume(&self, pid: Pid) -> Result<(), Errno> {
        kill(pid, Signal::SIGCONT)
    }

    fn exists(&self, pid: Pid) -> bool {
        kill(pid, None).is_ok()
    }

    fn probe(&self, pid: Pid) -> Result<Completion, ShellError> {
        probe::probe(pid)
    }
}

/// Round-robin time slicing of suspended background jobs.
///
/// Job state is never stored: whether a job is running, stopped or done is
/// asked of the OS on every tick. `running` is the slot resumed by the last
/// tick, or `None` when nothing has been resumed yet or the registry is empty.
pub struct BackgroundScheduler {
    jobs: Vec<Pid>,
    running: Option<usize>,
}

impl BackgroundScheduler {
    pub const fn new() -> Self {
        Self {
            jobs: Vec::new(),
            running: None,
        }
    }

    /// Append a suspended job. It gets its first slice after every job
    /// already registered has had one.
    pub fn register(&mut self, pid: Pid) {
        if !self.jobs.contains(&pid) {
            self.jobs.push(pid);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.jobs.contains(&pid)
    }

    /// The job resumed by the most recent tick.
    pub fn running(&self) -> Option<Pid> {
        self.running.map(|slot| self.jobs[slot])
    }

    /// One scheduling pass: stop the running job, reap it if it finished,
    /// then resume the next live job in insertion order.
    ///
    /// Runs inside a signal handler, so it must not allocate or block.
    /// Completions go to `out`, failures to `err`.
    pub fn tick<P, O, E>(&mut self, procs: &P, out: &mut O, err: &mut E)
    where
        P: ProcessControl,
        O: Write,
        E: Write,
    {
        if self.jobs.is_empty() {
            self.running = None;
            return;
        }

        let mut next = match self.running {
            None => 0,
            Some(current) => {
                let pid = self.jobs[current];
                // not reportable from the handler; a job that cannot be
                // signalled is settled by the completion check below or by
                // the liveness check when its turn comes again
                let _ = procs.suspend(pid);
                match procs.probe(pid) {
                    Ok(Completion::Finished { exit_code }) => {
                        report(pid, exit_code, out, err);
                        self.jobs.remove(current);
                        // the successor has shifted into `current`
                        current
                    }
                    // a failed probe leaves the job for the liveness check
                    Ok(Completion::StillRunning) | Err(_) => current + 1,
                }
            }
        };

        loop {
            if self.jobs.is_empty() {
                self.running = None;
                return;
            }
            if next >= self.jobs.len() {
                next = 0;
            }
            let pid = self.jobs[next];
            if procs.exists(pid) {
                // a refused resume still takes the slice; the next tick
                // checks the job again
                let _ = procs.resume(pid);
                self.running = Some(next);
                return;
            }
            // vanished without us reaping it: drop silently
            self.jobs.remove(next);
        }
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn report<O: Write, E: Write>(pid: Pid, exit_code: Option<i32>, out: &mut O, err: &mut E) {
    match exit_code {
        Some(code) if code != 0 => {
            let _ = writeln!(
                err,
                "Pid {} failed: {} (exit status {})",
                pid,
                describe_status(code),
                code
            );
        }
        _ => {
            let _ = writeln!(out, "\nPid {} completed", pid);
        }
    }
}
