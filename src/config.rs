use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Exam score sidecar. Speaks newline-delimited JSON on stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "scoreboardd", version, about)]
pub struct Config {
    /// Workspace directory to open at startup
    #[arg(long, env = "SCOREBOARDD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// How long a write waits on a locked database, in milliseconds
    #[arg(long, env = "SCOREBOARDD_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,
}

impl Config {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
