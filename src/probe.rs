use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::ShellError;

/// What a non-blocking status query learned about a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    StillRunning,
    /// The child is gone. `exit_code` is `None` when it did not exit normally.
    Finished { exit_code: Option<i32> },
}

/// Check whether `pid` has terminated, without blocking.
///
/// Stop and continue notifications are not terminations and report
/// [`Completion::StillRunning`]. A finished child is reaped by this call.
pub fn probe(pid: Pid) -> Result<Completion, ShellError> {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
    match waitpid(pid, Some(flags)) {
        Ok(WaitStatus::Exited(_, code)) => Ok(Completion::Finished {
            exit_code: Some(code),
        }),
        Ok(WaitStatus::Signaled(..)) => Ok(Completion::Finished { exit_code: None }),
        Ok(_) => Ok(Completion::StillRunning),
        Err(source) => Err(ShellError::Probe { pid, source }),
    }
}
