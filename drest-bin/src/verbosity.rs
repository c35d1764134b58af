//! The `-v`/`-q` flags.
//!
//! By default only warnings and errors are logged. Each `-v` adds a level:
//! - `-v` show info
//! - `-vv` show debug
//! - `-vvv` show trace
//!
//! `-q` only shows errors, `-qq` silences logging altogether.

use std::fmt;

use log::LevelFilter;
use serde::Deserialize;

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// More log output per occurrence
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet",
    )]
    verbose: u8,

    /// Less log output per occurrence
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level filter.
    pub(crate) const fn log_level_filter(&self) -> LevelFilter {
        match self.verbose as i16 - self.quiet as i16 {
            ..=-2 => LevelFilter::Off,
            -1 => LevelFilter::Error,
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

// Deserialized from a level name like "warn", "warning" or "Debug"
impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let (verbose, quiet) = match s.to_lowercase().as_str() {
            "off" => (0, 2),
            "error" => (0, 1),
            "warn" | "warning" => (0, 0),
            "info" => (1, 0),
            "debug" => (2, 0),
            "trace" => (3, 0),
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )));
            }
        };
        Ok(Verbosity { verbose, quiet })
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_level_filter())
    }
}
