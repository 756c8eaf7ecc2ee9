//! A small Unix shell engine that time-slices background jobs.
//!
//! Foreground commands and two-stage pipelines run to completion. Background
//! jobs are stopped on launch and then resumed one at a time, round-robin,
//! by a recurring `SIGALRM` tick.

pub mod builtins;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod interrupt;
pub mod job;
pub mod parser;
pub mod probe;
pub mod redirect;

pub use command::{CommandLine, CommandRequest, OutputTarget};
pub use error::ShellError;
pub use executor::{execute, launch, launch_pipeline, Outcome};
pub use job::{BackgroundScheduler, OsProcesses, ProcessControl, SharedScheduler};
pub use probe::{probe, Completion};
