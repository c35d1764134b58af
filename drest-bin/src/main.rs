//! `drest` sends a single call to the Discord REST API, waiting for the
//! route's rate limit bucket, and prints the response.
//!
//! The drest binary is a wrapper around drest-lib, which provides the
//! rate-limited transport.
//!
//! Fetch the current bot user:
//! ```sh
//! DISCORD_TOKEN=... drest get_user /users/@me
//! ```
//!
//! Post a message:
//! ```sh
//! drest post_message /channels/1234/messages -X post --body '{"content": "hi"}'
//! ```
//!
//! Talk to a local proxy that does TLS itself and show per-route statistics:
//! ```sh
//! drest get_gateway_bot /gateway/bot --host localhost --port 8080 --plaintext --stats
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Error, Result, bail};
use clap::Parser;
use drest_lib::Response;
use log::error;

mod client;
mod color;
mod logging;
mod options;
mod stats;
mod verbosity;

use crate::{
    color::color_for_status,
    logging::init_logging,
    options::{Config, DREST_CONFIG_FILE, DrestOptions},
    stats::format_statistics,
};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator, e.g. connection failures and exhausted retries.
    #[allow(unused)]
    UnexpectedFailure = 1,
    NonSuccessStatus = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<DrestOptions> {
    let mut opts = DrestOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, use `drest.toml` from the current
        // directory if there is one. An invalid file is still an error.
        let default_config = PathBuf::from(DREST_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call the drest entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Send the call and print its outcome
async fn run(opts: &DrestOptions) -> Result<i32> {
    let request = opts.request()?;
    let client = client::create(&opts.config)?;

    let result = client.execute(request).await;
    client.shutdown().await;

    if opts.config.stats {
        let stats = format_statistics(&client.all_route_stats(), opts.config.format)?;
        eprintln!("{stats}");
    }

    let response = result.with_context(|| format!("Call to `{}` failed", opts.route))?;
    print_response(&response)?;

    let exit_code = if response.is_success() {
        ExitCode::Success
    } else {
        ExitCode::NonSuccessStatus
    };
    Ok(exit_code as i32)
}

/// Status line to stderr, body to stdout, so the body can be piped
fn print_response(response: &Response) -> Result<()> {
    let status = response.status;
    eprintln!(
        "{}",
        color_for_status(status).apply_to(format!(
            "{} {}",
            status.as_str(),
            status.canonical_reason().unwrap_or_default()
        ))
    );

    let mut stdout = io::stdout().lock();
    stdout.write_all(&response.body)?;
    if !response.body.is_empty() && !response.body.ends_with(b"\n") {
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}
