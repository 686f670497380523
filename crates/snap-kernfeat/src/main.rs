//! procsnap-kernfeat — diagnostic front-end for kernel feature detection.
//!
//! Runs the capture-path and/or restore-path initialization sequences
//! against the host kernel and prints the resulting feature cache as JSON
//! on stdout. Logs go to stderr. The engine itself consumes the library
//! API; this binary exists to inspect what a given host supports.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use snap_common::{error::format_error_human, Error, RunOptions, StructuredError};
use snap_kernfeat::logging::{init_logging, LogConfig};
use snap_kernfeat::{init_for_capture, init_for_restore, FeatureCache, FsKind, HostKernel};
use std::io::IsTerminal;
use std::process::ExitCode;

/// procsnap kernel feature detector
#[derive(Parser)]
#[command(name = "procsnap-kernfeat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Require soft-dirty memory tracking (fail if unavailable)
    #[arg(long, global = true)]
    track_mem: bool,

    /// Compact JSON output instead of pretty-printed
    #[arg(long, global = true)]
    compact: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture-path probe sequence
    Capture,
    /// Run the restore-path probe sequence
    Restore,
    /// Run both sequences
    All,
}

/// JSON payload printed on success.
#[derive(Serialize)]
struct DetectReport<'a> {
    detected_at: String,
    sequences: &'a [&'a str],
    /// Distinguished filesystem mounts present on this host.
    fs_mounts: Vec<FsKind>,
    features: &'a FeatureCache,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_flags(cli.global.verbose, cli.global.quiet));

    let kernel = HostKernel::new();
    let opts = RunOptions {
        track_memory: cli.global.track_mem,
    };
    let mut cache = FeatureCache::new();

    let (sequences, outcome): (&[&str], Result<(), Error>) = match cli.command {
        Command::Capture => (&["capture"], init_for_capture(&mut cache, &kernel, &opts)),
        Command::Restore => (&["restore"], init_for_restore(&mut cache, &kernel, &opts)),
        Command::All => (
            &["capture", "restore"],
            init_for_capture(&mut cache, &kernel, &opts)
                .and_then(|()| init_for_restore(&mut cache, &kernel, &opts)),
        ),
    };

    if let Err(err) = outcome {
        report_error(&err);
        return ExitCode::FAILURE;
    }

    // Populate the fs-stat entries so the report shows which mounts exist.
    for kind in FsKind::ALL {
        let _ = cache.fs_stat(kind, &kernel);
    }

    let report = DetectReport {
        detected_at: chrono::Utc::now().to_rfc3339(),
        sequences,
        fs_mounts: cache.fs_stats_populated(),
        features: &cache,
    };
    let rendered = if cli.global.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    };
    match rendered {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(&Error::Json(err));
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &Error) {
    if std::io::stderr().is_terminal() {
        eprintln!("{}", format_error_human(err, true));
    } else {
        eprintln!("{}", StructuredError::from(err).to_json());
    }
}
