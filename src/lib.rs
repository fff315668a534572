//! Bulk log collection from SSH hosts
//!
//! Files are discovered over SFTP with glob and time-range filters, then
//! copied to local storage by a bounded pool of workers. Copies resume from
//! `.part` files and survive stream errors and dropped connections.

pub mod config;
pub mod progress;
pub mod report;
pub mod sftp;
pub mod ssh;
pub mod timeparse;

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Default log file, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "ssh_log_collector.log";

/// Console directives: warnings only unless verbose
fn console_directives(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Log file directives: our own debug output, SSH library chatter only when verbose
fn file_directives(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "ssh_log_collector=debug,warn"
    }
}

fn build_subscriber(
    console: EnvFilter,
    file: Option<(File, EnvFilter)>,
    verbose: bool,
) -> impl tracing::Subscriber + Send + Sync + 'static {
    let file_layer = file.map(|(file, filter)| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter)
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_filter(console),
        )
        .with(file_layer)
}

fn env_or(directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// Initialize logging
///
/// The console shows warnings and errors (`debug` with `verbose`). When
/// `log_file` is given it is appended to with debug output and no colors.
/// `RUST_LOG` overrides both filters.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some((file, env_or(file_directives(verbose))))
        }
        None => None,
    };

    build_subscriber(env_or(console_directives(verbose)), file, verbose)
        .try_init()
        .map_err(|e| std::io::Error::other(e.to_string()))
}
