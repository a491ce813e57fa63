//! rgt-core - convert a raw log into a report
//!
//! Usage:
//!     rgt-core run.raw report.xml
//!     rgt-core -m live run.raw
//!     rgt-core -f filter.xml -m junit run.raw junit.xml
//!     rgt-core -m mi --mi-ts run.raw

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::error::ErrorKind as ClapErrorKind;
use clap::Parser;
use rgt_core::{run, Config, OutputMode};
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "rgt-core")]
#[command(about = "Convert a Test Environment raw log into a report")]
#[command(disable_version_flag = true)]
struct Args {
    /// Raw log to process
    raw_log: Option<PathBuf>,

    /// Report file (default: standard output)
    output: Option<PathBuf>,

    /// Filter XML document
    #[arg(short = 'f', long = "filter", value_name = "FILE")]
    filter: Option<PathBuf>,

    /// Output mode
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = OutputMode::Postponed)]
    mode: OutputMode,

    /// Treat Tester control messages as ordinary messages
    #[arg(long = "no-cntrl-msg")]
    no_cntrl_msg: bool,

    /// Print timestamps and start/end markers in MI mode
    #[arg(long = "mi-ts")]
    mi_ts: bool,

    /// Accept a raw log whose last record is cut short
    #[arg(long = "incomplete-log")]
    incomplete_log: bool,

    /// Stop after the first message from this entity
    #[arg(long = "stop-at-entity", value_name = "ENTITY")]
    stop_at_entity: Option<String>,

    /// Show progress and debug diagnostics
    #[arg(short = 'V', long = "verbose")]
    verbose: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.kind() == ClapErrorKind::DisplayHelp => {
            let _ = e.print();
            process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    if args.version {
        println!("rgt-core {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some(raw_log) = args.raw_log else {
        eprintln!("rgt: usage: rgt-core [OPTIONS] <raw-log-file> [<output-file>]");
        process::exit(1);
    };

    init_logging(args.verbose);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "cannot install interrupt handler");
    }

    let mut config = Config::new(raw_log)
        .with_mode(args.mode)
        .with_control_messages(!args.no_cntrl_msg)
        .with_verbose(args.verbose)
        .with_mi_timestamps(args.mi_ts)
        .with_incomplete_log(args.incomplete_log)
        .with_interrupt(interrupted);
    if let Some(output) = args.output {
        config = config.with_output(output);
    }
    if let Some(filter) = args.filter {
        config = config.with_filter(filter);
    }
    if let Some(entity) = args.stop_at_entity {
        config = config.with_stop_at_entity(entity);
    }

    match run(&config) {
        Ok(stats) => {
            debug!(
                records = stats.records,
                nodes = stats.nodes,
                incomplete = stats.incomplete_nodes,
                "done"
            );
        }
        Err(e) => {
            eprintln!("{}", e.report());
            process::exit(e.exit_code());
        }
    }
}
