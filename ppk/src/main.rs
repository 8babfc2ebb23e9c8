//! ppk CLI entrypoint.
//!
//! Packs a package or requirements file into a verified, encrypted archive,
//! or hands such an archive to the unpack binary with `--unpack`.

use camino::Utf8Path;
use clap::Parser;
use ppk::cli::Cli;
use ppk::config::Config;
use ppk::dirs::SystemBaseDirs;
use ppk::error::{Result, error_chain};
use ppk::exec::SystemCommandExecutor;
use ppk::output::write_stderr_line;
use ppk::pipeline::pack;
use ppk::unpack::{DEFAULT_UNPACK_PROGRAM, Unpacker};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Exit code for faults that are not verification or download failures.
const FAULT_EXIT_CODE: i32 = 73;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    let mut stderr = io::stderr();
    let exit_code = match panic::catch_unwind(AssertUnwindSafe(|| run(&cli, &mut stderr))) {
        Ok(result) => exit_code_for_run_result(result, cli.quiet, &mut stderr),
        Err(_) => {
            write_stderr_line(&mut stderr, "ppk stopped on an internal fault.");
            FAULT_EXIT_CODE
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<i32> {
    let dirs = SystemBaseDirs;
    let config = Config::load(cli.config.as_deref(), &dirs)?;

    let mut sink = io::sink();
    let progress: &mut dyn Write = if cli.quiet { &mut sink } else { stderr };

    if cli.unpack {
        return unpack(cli, &config, progress);
    }
    let outcome = pack(&cli.pack_request(), &config, &dirs, progress)?;
    Ok(outcome.exit_code())
}

/// Runs the unpack binary, then the refresh program if unpacking succeeded.
fn unpack(cli: &Cli, config: &Config, progress: &mut dyn Write) -> Result<i32> {
    let executor = SystemCommandExecutor::with_timeout(config.tools.timeout());
    let unpack_program = config
        .paths
        .unpack
        .as_deref()
        .map_or(DEFAULT_UNPACK_PROGRAM, Utf8Path::as_str);
    let unpacker = Unpacker::new(&executor, unpack_program, &config.paths.pip_refresh);
    let code = unpacker.run(Path::new(&cli.target), progress)?;
    if code != 0 {
        return Ok(code);
    }
    Ok(unpacker.refresh(progress))
}

/// Log filter for the given `-v` count; `RUST_LOG` applies without `-v`.
fn log_filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => return EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

fn init_logging(verbosity: u8) {
    // Also bridges the `log` records emitted by the library.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbosity))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_code_for_run_result(result: Result<i32>, quiet: bool, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(0) => {
            if !quiet {
                write_stderr_line(stderr, "\nDone.");
            }
            0
        }
        Ok(code) => code,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {}", error_chain(&err)));
            FAULT_EXIT_CODE
        }
    }
}
