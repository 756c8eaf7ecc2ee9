//! End-to-end tests for launching, piping, redirecting and background
//! scheduling of real child processes.
//!
//! Each test owns its scheduler and drives ticks by hand instead of arming
//! the process-wide timer.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use rstest::rstest;
use tempfile::tempdir;

use rr_shell::interrupt::dispatch_tick;
use rr_shell::parser::{parse, ParsedLine};
use rr_shell::{
    execute, BackgroundScheduler, CommandLine, CommandRequest, OsProcesses, Outcome,
    SharedScheduler, ShellError,
};

const TICK: Duration = Duration::from_millis(50);

fn scheduler() -> SharedScheduler {
    spin::Mutex::new(BackgroundScheduler::new())
}

fn line(input: &str) -> CommandLine {
    match parse(input) {
        Ok(ParsedLine::Command(line)) => line,
        other => panic!("{input:?} did not parse to a command: {other:?}"),
    }
}

fn run(input: &str, jobs: &SharedScheduler) -> Result<Outcome, ShellError> {
    execute(&line(input), jobs)
}

#[derive(Default)]
struct Notices {
    out: Vec<u8>,
    err: Vec<u8>,
}

impl Notices {
    fn tick(&mut self, jobs: &SharedScheduler) {
        assert!(dispatch_tick(jobs, &OsProcesses, &mut self.out, &mut self.err));
    }

    fn out(&self) -> String {
        String::from_utf8_lossy(&self.out).into_owned()
    }

    fn err(&self) -> String {
        String::from_utf8_lossy(&self.err).into_owned()
    }
}

/// Tick until the registry is empty, or fail after a generous deadline.
fn drain(jobs: &SharedScheduler, notices: &mut Notices) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while !jobs.lock().is_empty() {
        assert!(Instant::now() < deadline, "background jobs never finished");
        notices.tick(jobs);
        thread::sleep(TICK);
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Foreground commands
// ============================================================================

#[test]
fn foreground_success_completes() {
    let jobs = scheduler();
    assert_eq!(run("true", &jobs).unwrap(), Outcome::Completed);
    assert!(jobs.lock().is_empty());
}

#[rstest]
#[case("false", 1)]
#[case("definitely_not_a_real_command_12345", 127)]
#[case("cat < /definitely/not/here.txt", Errno::ENOENT as i32)]
fn foreground_failures_carry_the_exit_status(#[case] input: &str, #[case] expected: i32) {
    match run(input, &scheduler()) {
        Err(ShellError::CommandFailed(code)) => assert_eq!(code, expected),
        other => panic!("expected CommandFailed({expected}), got {other:?}"),
    }
}

#[test]
fn exit_status_is_passed_through() {
    let request = CommandRequest::new("sh", ["-c", "exit 5"]);
    let result = execute(&CommandLine::Single(request), &scheduler());
    assert!(matches!(result, Err(ShellError::CommandFailed(5))));
}

#[test]
fn killed_child_is_an_unexpected_termination() {
    let request = CommandRequest::new("sh", ["-c", "kill -9 $$"]);
    let result = execute(&CommandLine::Single(request), &scheduler());
    assert!(matches!(
        result,
        Err(ShellError::UnexpectedTermination {
            signal: Signal::SIGKILL,
            ..
        })
    ));
}

#[test]
fn path_with_separator_is_executed_directly() {
    assert_eq!(run("/bin/sh -c true", &scheduler()).unwrap(), Outcome::Completed);
}

// ============================================================================
// Redirection
// ============================================================================

#[test]
fn input_and_output_redirection() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "from a file\n").unwrap();

    let cmd = format!("cat < {} > {}", path_arg(&input), path_arg(&output));
    assert_eq!(run(&cmd, &scheduler()).unwrap(), Outcome::Completed);
    assert_eq!(fs::read_to_string(&output).unwrap(), "from a file\n");
}

#[test]
fn append_keeps_existing_content() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("log.txt");
    fs::write(&output, "first\n").unwrap();

    let cmd = format!("echo second >> {}", path_arg(&output));
    run(&cmd, &scheduler()).unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "first\nsecond\n");
}

#[test]
fn plain_output_redirect_overwrites_without_truncating() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.txt");
    fs::write(&output, "hello world\n").unwrap();

    let cmd = format!("echo hi > {}", path_arg(&output));
    run(&cmd, &scheduler()).unwrap();
    // written from offset 0, older bytes past the new length survive
    assert_eq!(fs::read_to_string(&output).unwrap(), "hi\nlo world\n");
}

#[test]
fn output_redirect_creates_missing_file() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("new.txt");

    let cmd = format!("echo fresh > {}", path_arg(&output));
    run(&cmd, &scheduler()).unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "fresh\n");
}

#[test]
fn unusable_redirect_path_is_rejected_before_forking() {
    let jobs = scheduler();
    let request = CommandRequest::new("cat", Vec::<String>::new())
        .stdin_from("in\0.txt")
        .in_background(true);
    assert!(matches!(
        execute(&CommandLine::Single(request), &jobs),
        Err(ShellError::InvalidArgument(_))
    ));
    assert!(jobs.lock().is_empty());
}

// ============================================================================
// Pipelines
// ============================================================================

#[test]
fn pipeline_connects_the_stages() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.txt");

    let cmd = format!("echo hello | cat > {}", path_arg(&output));
    assert_eq!(run(&cmd, &scheduler()).unwrap(), Outcome::Completed);
    assert_eq!(fs::read_to_string(&output).unwrap(), "hello\n");
}

#[test]
fn pipeline_reads_first_stage_input_from_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    fs::write(&input, "b\na\n").unwrap();

    let cmd = format!("sort < {} | cat > {}", path_arg(&input), path_arg(&output));
    run(&cmd, &scheduler()).unwrap();
    assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\n");
}

#[test]
fn failing_first_stage_kills_the_second() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.txt");

    let cmd = format!("false | cat > {}", path_arg(&output));
    let jobs = scheduler();
    assert!(matches!(run(&cmd, &jobs), Err(ShellError::CommandFailed(1))));
    assert!(jobs.lock().is_empty());
    assert_eq!(fs::read_to_string(&output).unwrap_or_default(), "");
}

#[test]
fn failing_second_stage_is_reported() {
    let first = CommandRequest::new("echo", ["hi"]);
    let second = CommandRequest::new("sh", ["-c", "cat >/dev/null; exit 4"]);
    let result = execute(&CommandLine::Pipeline(first, second), &scheduler());
    assert!(matches!(result, Err(ShellError::CommandFailed(4))));
}

// ============================================================================
// Background scheduling
// ============================================================================

#[test]
fn background_job_is_rotated_until_it_completes() {
    let jobs = scheduler();
    let pid = match run("sleep 0.3 &", &jobs).unwrap() {
        Outcome::Backgrounded(pid) => pid,
        other => panic!("expected a background dispatch, got {other:?}"),
    };
    assert_eq!(jobs.lock().len(), 1);
    assert_eq!(jobs.lock().running(), None);

    let mut notices = Notices::default();
    notices.tick(&jobs);
    assert_eq!(jobs.lock().running(), Some(pid));

    drain(&jobs, &mut notices);
    assert_eq!(notices.out(), format!("\nPid {pid} completed\n"));
    assert!(notices.err().is_empty());
    assert_eq!(jobs.lock().running(), None);
}

#[test]
fn suspension_does_not_change_the_exit_status() {
    let jobs = scheduler();
    let request = CommandRequest::new("sh", ["-c", "sleep 0.2; exit 7"]).in_background(true);
    let pid = match execute(&CommandLine::Single(request), &jobs).unwrap() {
        Outcome::Backgrounded(pid) => pid,
        other => panic!("expected a background dispatch, got {other:?}"),
    };

    let mut notices = Notices::default();
    drain(&jobs, &mut notices);
    assert!(notices.out().is_empty());
    assert!(
        notices.err().starts_with(&format!("Pid {pid} failed: ")),
        "{}",
        notices.err()
    );
    assert!(notices.err().ends_with("(exit status 7)\n"));
}

#[test]
fn short_job_finishing_hands_the_slice_to_the_next() {
    let jobs = scheduler();
    let short = match run("true &", &jobs).unwrap() {
        Outcome::Backgrounded(pid) => pid,
        other => panic!("unexpected {other:?}"),
    };
    let long = match run("sleep 10 &", &jobs).unwrap() {
        Outcome::Backgrounded(pid) => pid,
        other => panic!("unexpected {other:?}"),
    };

    let mut notices = Notices::default();
    let deadline = Instant::now() + Duration::from_secs(10);
    while jobs.lock().contains(short) {
        assert!(Instant::now() < deadline, "short job never finished");
        notices.tick(&jobs);
        thread::sleep(TICK);
    }
    assert_eq!(jobs.lock().running(), Some(long));
    assert_eq!(jobs.lock().len(), 1);
    assert_eq!(notices.out(), format!("\nPid {short} completed\n"));

    kill(long, Signal::SIGKILL).unwrap();
    drain(&jobs, &mut notices);
}

#[test]
fn background_pipeline_registers_only_the_second_stage() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.txt");
    let jobs = scheduler();

    let cmd = format!("echo piped | cat > {} &", path_arg(&output));
    assert!(matches!(run(&cmd, &jobs).unwrap(), Outcome::Backgrounded(_)));
    assert_eq!(jobs.lock().len(), 1);

    drain(&jobs, &mut Notices::default());
    assert_eq!(fs::read_to_string(&output).unwrap(), "piped\n");
}

#[test]
fn background_pipeline_with_failing_first_stage_registers_nothing() {
    let jobs = scheduler();
    assert!(matches!(
        run("false | cat &", &jobs),
        Err(ShellError::CommandFailed(1))
    ));
    assert!(jobs.lock().is_empty());
}

#[test]
fn background_redirect_failure_is_reported_asynchronously() {
    let jobs = scheduler();
    assert!(matches!(
        run("cat < /definitely/not/here.txt &", &jobs).unwrap(),
        Outcome::Backgrounded(_)
    ));

    let mut notices = Notices::default();
    drain(&jobs, &mut notices);
    assert!(
        notices.err().ends_with("No such file or directory (exit status 2)\n"),
        "{}",
        notices.err()
    );
}
