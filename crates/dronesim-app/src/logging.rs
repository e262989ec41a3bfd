//! Segregated append-only logs.
//!
//! Every process writes two files in the log directory: `debug.log` gets all
//! events passing the `RUST_LOG` filter (default `info`), `errors.log` gets
//! WARN and above. Lines carry a timestamp and source location. Only the
//! launcher additionally logs to the terminal.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, Layer};

pub const DEBUG_LOG: &str = "debug.log";
pub const ERROR_LOG: &str = "errors.log";

pub fn open_append(log_dir: &Path, file_name: &str) -> io::Result<File> {
    fs::create_dir_all(log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(file_name))
}

/// Install the global subscriber. `console` adds a terse stderr layer.
pub fn init(log_dir: &Path, console: bool) -> io::Result<()> {
    let debug = open_append(log_dir, DEBUG_LOG)?;
    let errors = open_append(log_dir, ERROR_LOG)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let debug_layer = fmt::layer()
        .with_writer(Mutex::new(debug))
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    let error_layer = fmt::layer()
        .with_writer(Mutex::new(errors))
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(LevelFilter::WARN);

    let console_layer = console.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .without_time()
            .with_filter(LevelFilter::INFO)
    });

    tracing_subscriber::registry()
        .with(debug_layer)
        .with(error_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
