use std::env;
use std::io::{stdin, stdout, Write};

use anyhow::{Context, Result};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rr_shell::builtins::{abandon_background, run_builtin, BuiltinResult};
use rr_shell::config::Config;
use rr_shell::executor::execute;
use rr_shell::interrupt;
use rr_shell::parser::{parse, ParsedLine};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    interrupt::install(config.tick_interval).context("could not start the background scheduler")?;

    let jobs = interrupt::scheduler();
    loop {
        if config.show_prompt {
            create_prompt();
        }

        let mut input = String::new();
        match stdin().read_line(&mut input) {
            Ok(0) => {
                abandon_background(jobs);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "could not read input");
                break;
            }
        }

        match parse(&input) {
            Ok(ParsedLine::Empty) => continue,
            Ok(ParsedLine::Builtin(builtin)) => {
                if let BuiltinResult::Exit = run_builtin(&builtin, jobs) {
                    break;
                }
            }
            Ok(ParsedLine::Command(line)) => {
                if let Err(e) = execute(&line, jobs) {
                    eprintln!("{}", e);
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }
    Ok(())
}

fn create_prompt() {
    let working_directory = match env::current_dir() {
        Ok(dir) => dir.display().to_string(),
        Err(_) => String::new(),
    };

    print!("{}:", working_directory);
    if stdout().flush().is_err() {
        eprintln!("Error Flushing");
    }
}
