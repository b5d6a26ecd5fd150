//! CLI for the snoopy-bus coherence simulator.
//!
//! The mode is chosen by argument count: no arguments prints usage, one
//! runs textbook mode, two or three run a batch of configurations from a
//! file, and six to eight run a single configuration given inline.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use env_logger::Env;

use snooplib::bus::DirectoryKind;
use snooplib::coherence::CoherenceKind;
use snooplib::config::{self, arg, ConfigError, ConfigErrorKind};
use snooplib::replacement::ReplacerKind;
use snooplib::simulator::{run_batch, run_single};
use snooplib::stats::CSV_HEADER;
use snooplib::trace::{Trace, TRACE_RECORD_SIZE};

mod textbook;

#[derive(Parser, Debug)]
#[command(
    name = "snoopsim",
    about = "Trace-driven snoopy-bus L1 cache coherence simulator",
    long_about = "Simulates per-CPU L1 caches over a shared bus, replaying a binary \
memory-access trace and reporting per-core statistics as CSV.\n\nRun without \
arguments for the full usage text, including the available coherence protocols, \
replacement policies, and directory protocols."
)]
struct Cli {
    /// Mode arguments; the argument count selects the mode
    #[arg(num_args = 0..)]
    args: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    process::exit(run(&cli.args));
}

fn run(args: &[String]) -> i32 {
    match args.len() {
        0 => {
            print_usage();
            0
        }
        1 => textbook::run(&args[0]),
        2 | 3 => run_batch_mode(args),
        6..=8 => run_single_mode(args),
        _ => {
            eprintln!("Argument count mismatch");
            -1
        }
    }
}

/// Single run: `<cache_size[unit]> <line_size> <associativity> <coherence>
/// <replacer> [<directory>] <trace_file> [<trace_limit>]`.
fn run_single_mode(args: &[String]) -> i32 {
    // With seven arguments either the directory or the trace limit is
    // present; probing the directory registry settles which
    let config_tokens = match args.len() {
        6 => 5,
        7 => {
            if DirectoryKind::from_name(&args[5]).is_some() {
                6
            } else {
                5
            }
        }
        _ => 6,
    };

    let tokens: Vec<&str> = args[..config_tokens].iter().map(String::as_str).collect();
    let config = match config::parse_config(0, &tokens) {
        Ok(config) => config,
        Err(err) => return fail(err),
    };

    let limit = match args.get(config_tokens + 1) {
        Some(token) => match config::parse_trace_limit(token) {
            Ok(limit) => limit,
            Err(kind) => return fail(ConfigError::new(0, arg::TRACE_LIMIT, kind)),
        },
        None => None,
    };

    let trace = match open_trace(&args[config_tokens]) {
        Ok(trace) => trace,
        Err(err) => return fail(err),
    };

    log::debug!("single run: {config:?}");
    let system = run_single(&config, trace.records(), limit);
    println!("{CSV_HEADER}");
    for report in system.reports() {
        println!("{}", report.to_csv_row());
    }
    0
}

/// Batch run: `<configs_file> <trace_file> [<trace_limit>]`.
fn run_batch_mode(args: &[String]) -> i32 {
    let configs = match config::read_configurations(&args[0]) {
        Ok(configs) => configs,
        Err(err) => return fail(err),
    };
    log::info!(
        "simulating {} configurations over {}",
        configs.len(),
        args[1]
    );

    let limit = match args.get(2) {
        Some(token) => match config::parse_trace_limit(token) {
            Ok(limit) => limit,
            Err(kind) => return fail(ConfigError::new(0, arg::BATCH_TRACE_LIMIT, kind)),
        },
        None => None,
    };

    let trace_error = |kind| ConfigError::new(0, arg::BATCH_TRACE_FILE, kind);
    let file = match File::open(&args[1]) {
        Ok(file) => file,
        Err(e) => return fail(trace_error(ConfigErrorKind::TraceRead(e))),
    };
    match file.metadata() {
        Ok(meta) if meta.len() % TRACE_RECORD_SIZE as u64 != 0 => {
            return fail(trace_error(ConfigErrorKind::MalformedTrace));
        }
        Err(e) => return fail(trace_error(ConfigErrorKind::TraceRead(e))),
        Ok(_) => {}
    }

    // The header prints before any worker can emit a row
    println!("{CSV_HEADER}");
    let out = Mutex::new(io::stdout());
    if let Err(e) = run_batch(&configs, file, limit, &out) {
        return fail(trace_error(ConfigErrorKind::TraceRead(e)));
    }
    0
}

/// Open a single-run trace, mapping malformed sizes and I/O failures to
/// the trace-file argument.
fn open_trace(path: &str) -> Result<Trace, ConfigError> {
    Trace::open(Path::new(path)).map_err(|e| {
        let kind = if e.kind() == io::ErrorKind::InvalidData {
            ConfigErrorKind::MalformedTrace
        } else {
            ConfigErrorKind::TraceRead(e)
        };
        ConfigError::new(0, arg::TRACE_FILE, kind)
    })
}

fn fail(err: ConfigError) -> i32 {
    eprintln!("{err}");
    err.exit_code()
}

fn print_usage() {
    println!("Usage:");
    println!("  (1) ./snoopsim <coherence|replacer>");
    println!("  (2) ./snoopsim <configuration> <trace_file> [trace_limit]");
    println!("Description:");
    println!("  (1) Run the simulator in textbook mode (see the manual for more info)");
    println!("  (2) Run the simulator in metrics mode (see below)");
    println!("Options:");
    println!("  configuration: Either a single memory system configuration (see below) or");
    println!("                   the path to a file containing multiple memory system configurations");
    println!("  trace_file:    The path to the input trace file");
    println!("  trace_limit:   (Optional) The maximum number of trace entries to read");
    println!("Memory system configuration:");
    println!("  Syntax:");
    println!("    <cache_size[unit]> <line_size> <associativity> <coherence> <replacer> [directory]");
    println!("  Options:");
    println!("    associativity: The associativity of the cache");
    println!("    cache_size:    The size of the cache in bytes or in the specified unit");
    println!("    coherence:     The name of the coherence protocol (not case sensitive). One of:");
    for kind in CoherenceKind::ALL {
        println!("                     - {}", kind.name());
    }
    println!("    directory:     (Optional) The name of the directory protocol (not case sensitive). One of:");
    for kind in DirectoryKind::ALL {
        println!("                     - {}", kind.name());
    }
    println!("    line_size:     The size of a line in the cache");
    println!("    replacer:      The name of the replacement policy (not case sensitive). One of:");
    for kind in ReplacerKind::ALL {
        println!("                     - {}", kind.name());
    }
    println!("    unit:          (Optional) The unit of the cache size.");
    println!("                     Either 'k' or 'M' for kilobytes and megabytes respectively");
}
