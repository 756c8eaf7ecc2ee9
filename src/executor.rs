use std::ffi::CString;
use std::os::unix::io::RawFd;

use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execvp, fork, pipe2, ForkResult, Pid};
use tracing::debug;

use crate::command::{path_cstring, CommandLine, CommandRequest};
use crate::error::{ShellError, EXEC_FAILURE_STATUS};
use crate::job::SharedScheduler;
use crate::redirect;

/// How a dispatched command line left the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ran in the foreground and exited with status 0.
    Completed,
    /// Handed to the background scheduler; this pid is now registered.
    Backgrounded(Pid),
}

/// Run a parsed command line, blocking for foreground work.
pub fn execute(line: &CommandLine, jobs: &SharedScheduler) -> Result<Outcome, ShellError> {
    debug!(background = line.is_background(), "dispatching");
    match line {
        CommandLine::Single(request) => launch(request, jobs),
        CommandLine::Pipeline(first, second) => launch_pipeline(first, second, jobs),
    }
}

/// Fork and exec a single command.
///
/// Foreground: wait for it and map a non-zero exit to `CommandFailed`.
/// Background: stop it immediately and register it with the scheduler.
pub fn launch(request: &CommandRequest, jobs: &SharedScheduler) -> Result<Outcome, ShellError> {
    let child = ChildSpec::new(request)?;
    let pid = spawn(&child, &Plumbing::default())?;
    debug!(%pid, program = %request.program, background = request.background, "launched");

    if request.background {
        return background(pid, jobs);
    }
    match wait_exit(pid)? {
        Exit::Code(0) => Ok(Outcome::Completed),
        Exit::Code(code) => Err(ShellError::CommandFailed(code)),
        Exit::Signaled(signal) => Err(ShellError::UnexpectedTermination {
            pid,
            signal,
        }),
    }
}

/// Run `first | second`.
///
/// The first stage always runs to completion before anything is decided.
/// If it exits non-zero the second stage is killed and the failure returned.
/// In the background only the second stage is registered.
pub fn launch_pipeline(
    first: &CommandRequest,
    second: &CommandRequest,
    jobs: &SharedScheduler,
) -> Result<Outcome, ShellError> {
    let producer = ChildSpec::new(first)?;
    let consumer = ChildSpec::new(second)?;

    let (read_end, write_end) = stage_pipe()?;
    debug!(read_end, write_end, "pipe allocated");
    let ends = [read_end, write_end];

    let producer_pid = match spawn(
        &producer,
        &Plumbing {
            stdout: Some(write_end),
            close: &ends,
            ..Plumbing::default()
        },
    ) {
        Ok(pid) => pid,
        Err(e) => {
            close_all(&ends);
            return Err(e);
        }
    };

    let consumer_pid = match spawn(
        &consumer,
        &Plumbing {
            stdin: Some(read_end),
            close: &ends,
            ..Plumbing::default()
        },
    ) {
        Ok(pid) => pid,
        Err(e) => {
            close_all(&ends);
            terminate(producer_pid);
            return Err(e);
        }
    };
    close_all(&ends);
    debug!(%producer_pid, %consumer_pid, background = second.background, "pipeline launched");

    settle_first_stage(wait_exit(producer_pid), consumer_pid)?;

    if second.background {
        return background(consumer_pid, jobs);
    }
    match wait_exit(consumer_pid)? {
        Exit::Code(0) => Ok(Outcome::Completed),
        Exit::Code(code) => Err(ShellError::CommandFailed(code)),
        Exit::Signaled(signal) => Err(ShellError::UnexpectedTermination {
            pid: consumer_pid,
            signal,
        }),
    }
}

/// The pipe between the two stages. Both ends are close-on-exec, so a
/// child forked concurrently by another thread never keeps them open past
/// its exec.
fn stage_pipe() -> Result<(RawFd, RawFd), ShellError> {
    pipe2(OFlag::O_CLOEXEC).map_err(ShellError::PipeCreation)
}

/// Decide the pipeline from how the first stage ended. Any outcome that
/// fails the pipeline kills and reaps the second stage first.
///
/// Only a real non-zero exit fails it. A first stage killed by a signal
/// (typically SIGPIPE after the second quit) does not.
fn settle_first_stage(waited: Result<Exit, ShellError>, consumer: Pid) -> Result<(), ShellError> {
    let failure = match waited {
        Ok(Exit::Code(0)) | Ok(Exit::Signaled(_)) => return Ok(()),
        Ok(Exit::Code(code)) => ShellError::CommandFailed(code),
        Err(e) => e,
    };
    terminate(consumer);
    Err(failure)
}

/// Everything a child needs, converted before `fork`. The child only
/// reads from it, so nothing between `fork` and `exec` allocates.
struct ChildSpec {
    program: CString,
    argv: Vec<CString>,
    redir_in: Option<CString>,
    /// Output path and append flag.
    redir_out: Option<(CString, bool)>,
}

impl ChildSpec {
    fn new(request: &CommandRequest) -> Result<Self, ShellError> {
        let (program, argv) = request.argv()?;
        let redir_in = request.redir_in.as_deref().map(path_cstring).transpose()?;
        let redir_out = match &request.redir_out {
            Some(target) => Some((path_cstring(&target.path)?, target.append)),
            None => None,
        };
        Ok(Self {
            program,
            argv,
            redir_in,
            redir_out,
        })
    }
}

/// Pipe ends to splice onto the child's standard streams.
#[derive(Default)]
struct Plumbing<'a> {
    stdin: Option<RawFd>,
    stdout: Option<RawFd>,
    /// Inherited descriptors the child must close before exec.
    close: &'a [RawFd],
}

fn spawn(image: &ChildSpec, plumbing: &Plumbing<'_>) -> Result<Pid, ShellError> {
    // SAFETY: the child only performs descriptor operations and exec before
    // leaving through `_exit`.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => exec_child(image, plumbing),
        Err(e) => {
            debug!(error = %e, "fork failed");
            Err(ShellError::Fork(e))
        }
    }
}

/// Runs in the forked child. Never returns: it either becomes the target
/// program or exits with a failure status the parent will observe.
fn exec_child(image: &ChildSpec, plumbing: &Plumbing<'_>) -> ! {
    if let Some(fd) = plumbing.stdin {
        if let Err(e) = dup2(fd, STDIN_FILENO) {
            child_exit(e as i32);
        }
    }
    if let Some(fd) = plumbing.stdout {
        if let Err(e) = dup2(fd, STDOUT_FILENO) {
            child_exit(e as i32);
        }
    }
    for fd in plumbing.close {
        let _ = close(*fd);
    }

    let input = match &image.redir_in {
        Some(path) => match redirect::open_for_input(path.as_c_str()) {
            Ok(r) => Some(r),
            Err(e) => child_exit(e.child_status()),
        },
        None => None,
    };
    let output = match &image.redir_out {
        Some((path, append)) => match redirect::open_for_output(path.as_c_str(), *append) {
            Ok(r) => Some(r),
            Err(e) => child_exit(e.child_status()),
        },
        None => None,
    };
    redirect::release(input);
    redirect::release(output);

    match execvp(&image.program, &image.argv) {
        Ok(never) => match never {},
        // the parent reports the fixed status as a single line
        Err(_) => child_exit(EXEC_FAILURE_STATUS),
    }
}

fn child_exit(status: i32) -> ! {
    // SAFETY: `_exit` skips atexit handlers and stdio flushing inherited
    // from the parent, which must not run twice.
    unsafe { libc::_exit(status) }
}

fn background(pid: Pid, jobs: &SharedScheduler) -> Result<Outcome, ShellError> {
    if let Err(source) = kill(pid, Signal::SIGSTOP) {
        debug!(%pid, error = %source, "could not suspend new background job");
        return Err(ShellError::Scheduling { pid, source });
    }
    jobs.lock().register(pid);
    debug!(%pid, "registered background job");
    Ok(Outcome::Backgrounded(pid))
}

enum Exit {
    Code(i32),
    Signaled(Signal),
}

/// Block until `pid` exits or is killed. Stops and timer interruptions are
/// waited through.
fn wait_exit(pid: Pid) -> Result<Exit, ShellError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Exit::Code(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(Exit::Signaled(signal)),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(source) => return Err(ShellError::Probe { pid, source }),
        }
    }
}

/// Kill and reap a child that is no longer wanted.
fn terminate(pid: Pid) {
    if kill(pid, Signal::SIGKILL).is_ok() {
        let _ = wait_exit(pid);
    }
    debug!(%pid, "terminated");
}

fn close_all(fds: &[RawFd]) {
    for fd in fds {
        let _ = close(*fd);
    }
}
