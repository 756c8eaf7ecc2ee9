use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::interrupt::DEFAULT_INTERVAL;

/// Start-up settings, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Time slice given to each background job (`RRSH_TICK_MS`).
    pub tick_interval: Duration,
    /// Print the working-directory prompt (`RRSH_PROMPT=0` turns it off).
    pub show_prompt: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_INTERVAL,
            show_prompt: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(raw) = lookup("RRSH_TICK_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("RRSH_TICK_MS must be a number of milliseconds, got {raw:?}"))?;
            if ms == 0 {
                bail!("RRSH_TICK_MS must be greater than zero");
            }
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("RRSH_PROMPT") {
            config.show_prompt = raw.trim() != "0";
        }
        Ok(config)
    }
}
