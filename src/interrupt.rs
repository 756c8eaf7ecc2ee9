//! The process-wide timer that drives background scheduling.
//!
//! `SIGALRM` fires every interval and runs one scheduler tick from inside
//! the signal handler. Everything on that path is allocation-free and
//! writes to the terminal with raw `write(2)`.

use std::io;
use std::ptr;
use std::time::Duration;

use libc::{STDERR_FILENO, STDOUT_FILENO};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

use crate::error::ShellError;
use crate::job::{BackgroundScheduler, OsProcesses, ProcessControl, SharedScheduler};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

static SCHEDULER: SharedScheduler = spin::Mutex::new(BackgroundScheduler::new());

/// The registry the timer interrupt rotates.
pub fn scheduler() -> &'static SharedScheduler {
    &SCHEDULER
}

/// Install the `SIGALRM` handler and arm a recurring real-time timer.
///
/// System calls interrupted by a tick are restarted, so a blocking read or
/// wait on the main thread is not disturbed.
pub fn install(interval: Duration) -> Result<(), ShellError> {
    let action = SigAction::new(
        SigHandler::Handler(on_alarm),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: `on_alarm` only touches the registry through `try_lock` and
    // performs no allocation or locking that could deadlock the main thread.
    unsafe { sigaction(Signal::SIGALRM, &action) }.map_err(ShellError::Timer)?;

    let period = libc::timeval {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_usec: interval.subsec_micros() as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: `timer` is a valid itimerval and the old value is not requested.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) };
    Errno::result(rc).map_err(ShellError::Timer)?;

    debug!(interval_ms = interval.as_millis() as u64, "scheduling timer armed");
    Ok(())
}

/// Run one tick unless another is already in progress.
///
/// Returns `false` when the tick was dropped because the registry was held,
/// either by an unfinished tick or by the main thread registering a job.
pub fn dispatch_tick<P, O, E>(jobs: &SharedScheduler, procs: &P, out: &mut O, err: &mut E) -> bool
where
    P: ProcessControl,
    O: io::Write,
    E: io::Write,
{
    match jobs.try_lock() {
        Some(mut scheduler) => {
            scheduler.tick(procs, out, err);
            true
        }
        None => false,
    }
}

extern "C" fn on_alarm(_signal: libc::c_int) {
    // the tick's own kill/waitpid/write calls must not leak into the errno
    // of whatever call the main thread was in
    preserving_errno(|| {
        dispatch_tick(
            &SCHEDULER,
            &OsProcesses,
            &mut RawStream(STDOUT_FILENO),
            &mut RawStream(STDERR_FILENO),
        )
    });
}

/// Run `f` and put the thread's errno back to what it was on entry.
fn preserving_errno<T>(f: impl FnOnce() -> T) -> T {
    // SAFETY: the errno slot is thread-local and valid for the thread's life.
    let saved = unsafe { *errno_slot() };
    let result = f();
    unsafe { *errno_slot() = saved };
    result
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_slot() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
unsafe fn errno_slot() -> *mut libc::c_int {
    libc::__error()
}

/// Unbuffered writer over a raw descriptor, safe to use in a signal handler.
struct RawStream(libc::c_int);

impl io::Write for RawStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        nix::unistd::write(self.0, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Completion;
    use nix::unistd::Pid;

    struct NoProcesses;

    impl ProcessControl for NoProcesses {
        fn suspend(&self, _pid: Pid) -> Result<(), Errno> {
            Ok(())
        }
        fn resume(&self, _pid: Pid) -> Result<(), Errno> {
            Ok(())
        }
        fn exists(&self, _pid: Pid) -> bool {
            true
        }
        fn probe(&self, _pid: Pid) -> Result<Completion, ShellError> {
            Ok(Completion::StillRunning)
        }
    }

    fn set_errno(value: libc::c_int) {
        unsafe { *errno_slot() = value };
    }

    #[test]
    fn errno_survives_a_clobbering_handler_body() {
        set_errno(libc::EAGAIN);
        preserving_errno(|| {
            // fails with EBADF
            assert!(nix::unistd::close(-1).is_err());
            assert_eq!(Errno::last(), Errno::EBADF);
        });
        assert_eq!(Errno::last(), Errno::EAGAIN);
    }

    #[test]
    fn alarm_handler_leaves_errno_alone() {
        // no such process: the liveness check fails with ESRCH
        scheduler().lock().register(Pid::from_raw(i32::MAX));
        set_errno(libc::EINTR);
        on_alarm(libc::SIGALRM);
        assert_eq!(Errno::last(), Errno::EINTR);
        assert!(!scheduler().lock().contains(Pid::from_raw(i32::MAX)));
    }

    #[test]
    fn tick_is_dropped_while_registry_is_held() {
        let jobs: SharedScheduler = spin::Mutex::new(BackgroundScheduler::new());
        jobs.lock().register(Pid::from_raw(7));

        let guard = jobs.lock();
        let ran = dispatch_tick(&jobs, &NoProcesses, &mut io::sink(), &mut io::sink());
        assert!(!ran);
        assert_eq!(guard.running(), None);
        drop(guard);

        assert!(dispatch_tick(&jobs, &NoProcesses, &mut io::sink(), &mut io::sink()));
        assert_eq!(jobs.lock().running(), Some(Pid::from_raw(7)));
    }
}
