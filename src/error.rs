use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

/// Exit status a child uses when its program image could not be loaded.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Everything the engine can report back to the read loop.
///
/// Failures inside a child never show up here directly; they become the
/// child's exit status and surface as [`ShellError::CommandFailed`].
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("could not create process: {0}")]
    Fork(#[source] Errno),

    #[error("could not redirect: {0}")]
    Io(#[source] Errno),

    #[error("could not create pipe: {0}")]
    PipeCreation(#[source] Errno),

    #[error("{text} (exit status {code})", text = status_text(.0), code = .0)]
    CommandFailed(i32),

    #[error("process {pid} terminated unexpectedly by {}", .signal.as_str())]
    UnexpectedTermination { pid: Pid, signal: Signal },

    #[error("could not signal process {pid}: {source}")]
    Scheduling {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("could not query process {pid}: {source}")]
    Probe {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("could not arm the scheduling timer: {0}")]
    Timer(#[source] Errno),
}

impl ShellError {
    /// The exit code a forked child should leave with for this error.
    pub fn child_status(&self) -> i32 {
        match self {
            ShellError::Io(source)
            | ShellError::Fork(source)
            | ShellError::PipeCreation(source) => *source as i32,
            ShellError::CommandFailed(code) => *code,
            _ => 1,
        }
    }
}

/// Platform text for an exit status, read as an errno value the way
/// children report redirection failures.
pub fn describe_status(code: i32) -> &'static str {
    if code == EXEC_FAILURE_STATUS {
        return "command not found";
    }
    match Errno::from_i32(code) {
        Errno::UnknownErrno => "unknown error",
        errno => errno.desc(),
    }
}

fn status_text(code: &i32) -> &'static str {
    describe_status(*code)
}
