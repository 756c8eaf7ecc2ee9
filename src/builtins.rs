use std::env;
use std::path::PathBuf;

use tracing::debug;

use crate::job::SharedScheduler;
use crate::parser::Builtin;

pub enum BuiltinResult {
    Continue,
    Exit,
}

pub fn run_builtin(builtin: &Builtin, jobs: &SharedScheduler) -> BuiltinResult {
    match builtin {
        Builtin::Cd(args) => {
            if let Err(message) = builtin_cd(args) {
                eprintln!("{}", message);
            }
            BuiltinResult::Continue
        }
        Builtin::Exit => {
            abandon_background(jobs);
            BuiltinResult::Exit
        }
    }
}

/// Leave registered background jobs behind as the shell terminates.
/// Nothing waits for them and nothing resumes them.
pub fn abandon_background(jobs: &SharedScheduler) {
    let abandoned = jobs.lock().len();
    if abandoned > 0 {
        debug!(abandoned, "exiting with background jobs still registered");
    }
}

fn home() -> String {
    env::var("HOME").unwrap_or_else(|_| "/".to_string())
}

fn expand_cd_arg(s: &str) -> PathBuf {
    if s == "~" {
        return PathBuf::from(home());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        return PathBuf::from(home()).join(rest);
    }
    PathBuf::from(s)
}

fn builtin_cd(args: &[String]) -> Result<(), String> {
    let target = match args {
        [] => PathBuf::from(home()),
        [dir] => expand_cd_arg(dir),
        _ => return Err("cd: too many arguments".to_string()),
    };
    env::set_current_dir(&target).map_err(|e| format!("cd: {}: {}", target.display(), e))
}
