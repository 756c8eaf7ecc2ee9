//! Background scheduling driven by the real `SIGALRM` timer.
//!
//! The timer and its registry are process-wide, so every test here arms the
//! same 50 ms interval once and shares `interrupt::scheduler()`. Nothing
//! ticks by hand.

use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use rr_shell::interrupt;
use rr_shell::parser::{parse, ParsedLine};
use rr_shell::{execute, CommandLine, Outcome, SharedScheduler};

const INTERVAL: Duration = Duration::from_millis(50);

fn armed() -> &'static SharedScheduler {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| interrupt::install(INTERVAL).unwrap());
    interrupt::scheduler()
}

fn line(input: &str) -> CommandLine {
    match parse(input) {
        Ok(ParsedLine::Command(line)) => line,
        other => panic!("{input:?} did not parse to a command: {other:?}"),
    }
}

#[test]
fn timer_drains_a_background_job_on_its_own() {
    let jobs = armed();
    let pid = match execute(&line("sleep 0.2 &"), jobs).unwrap() {
        Outcome::Backgrounded(pid) => pid,
        other => panic!("expected a background dispatch, got {other:?}"),
    };

    let deadline = Instant::now() + Duration::from_secs(15);
    while jobs.lock().contains(pid) {
        assert!(Instant::now() < deadline, "timer never finished {pid}");
        thread::sleep(INTERVAL);
    }
}

#[test]
fn foreground_wait_survives_timer_ticks() {
    let jobs = armed();
    let started = Instant::now();
    assert_eq!(
        execute(&line("sleep 0.3"), jobs).unwrap(),
        Outcome::Completed
    );
    // several ticks landed during the wait
    assert!(started.elapsed() >= Duration::from_millis(300));
}
