use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use plummet::conf::SystemConfig;
use plummet::{args, print, query, trace, Error};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let err = match run() {
        Ok(()) => return ExitCode::SUCCESS,
        Err(err) => err,
    };

    let code = match err.downcast_ref::<Error>() {
        Some(Error::NotAnError) => return ExitCode::SUCCESS,
        Some(e) => e.exit_code(),
        None => 1,
    };
    eprintln!(
        "{} {:#}",
        "Error:".if_supports_color(Stream::Stderr, |text| text.red()),
        err
    );
    ExitCode::from(code)
}

fn run() -> Result<()> {
    let cli = args::parse_from(std::env::args_os())?;
    init_logging(cli.verbosity);

    let mut opts = cli.into_options(&SystemConfig).map_err(Error::from)?;

    let output = if opts.trace {
        let hops = trace::trace(&opts)?;
        trace::render(&hops, &opts).map_err(Error::from)?
    } else {
        let res = query::lookup(&mut opts)?;
        print::render(&res, &opts).map_err(Error::from)?
    };

    let mut stdout = io::stdout().lock();
    if output.ends_with('\n') {
        write!(stdout, "{}", output)
    } else {
        writeln!(stdout, "{}", output)
    }
    .context("Could not write to stdout.")?;
    Ok(())
}

/// Logs to stderr. `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();
}
