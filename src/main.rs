use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use schedtrace::chrome::{self, TraceEvent};
use schedtrace::cli::{Cli, Command};
use schedtrace::comm::CommResolver;
use schedtrace::filter::{self, FilterCriteria};
use schedtrace::history::{HistoryLogAdapter, Layout};
use schedtrace::outlier::{self, OutlierCriteria};
use schedtrace::switch::SwitchLogAdapter;
use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr so the primary JSON output stays pipeable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

fn write_output(path: Option<&Path>, events: &[TraceEvent]) -> Result<()> {
    match path {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            chrome::write_document(BufWriter::new(file), events)?;
        }
        None => {
            chrome::write_document(io::stdout().lock(), events)?;
        }
    }
    Ok(())
}

fn run_switch(
    output: Option<PathBuf>,
    pid_comm_cmdline: Option<PathBuf>,
    chunk_size: usize,
    input: Option<PathBuf>,
) -> Result<()> {
    let resolver = match pid_comm_cmdline {
        Some(path) => CommResolver::with_table(&path)
            .with_context(|| format!("cannot load side table {}", path.display()))?,
        None => CommResolver::new(),
    };
    let adapter = SwitchLogAdapter::new(resolver, chunk_size);
    let events = adapter.convert(open_input(input.as_deref())?)?;
    write_output(output.as_deref(), &events)
}

fn run_timehist(
    output: Option<PathBuf>,
    format: Layout,
    timestamp_offset: f64,
    input: PathBuf,
) -> Result<()> {
    let adapter = HistoryLogAdapter::new(format, timestamp_offset)?;
    let events = adapter.convert(open_input(Some(&input))?)?;
    write_output(output.as_deref(), &events)
}

fn run_filter(
    begin: f64,
    end: f64,
    include: Option<String>,
    exclude: Option<String>,
    output: Option<PathBuf>,
    input: PathBuf,
) -> Result<()> {
    let events = chrome::load_events_from_path(&input)
        .with_context(|| format!("cannot load {}", input.display()))?;
    let criteria = FilterCriteria::new(begin, end, include.as_deref(), exclude.as_deref())?;
    let kept = filter::filter(&events, &criteria);
    write_output(output.as_deref(), &kept)
}

fn run_outlier(min_duration: f64, threshold: f64, min_calls: usize, input: PathBuf) -> Result<()> {
    let events = chrome::load_events_from_path(&input)
        .with_context(|| format!("cannot load {}", input.display()))?;
    let criteria = OutlierCriteria {
        min_duration_ms: min_duration,
        threshold,
        min_calls,
    };
    let reports = outlier::detect(&events, &criteria);
    outlier::print_report(&reports);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Cli::parse();
    match args.command {
        Command::Switch {
            output,
            pid_comm_cmdline,
            chunk_size,
            input,
        } => run_switch(output, pid_comm_cmdline, chunk_size, input),
        Command::Timehist {
            output,
            format,
            timestamp_offset,
            input,
        } => run_timehist(output, format, timestamp_offset, input),
        Command::Filter {
            begin,
            end,
            include,
            exclude,
            output,
            input,
        } => run_filter(begin, end, include, exclude, output, input),
        Command::Outlier {
            min_duration,
            threshold,
            min_calls,
            input,
        } => run_outlier(min_duration, threshold, min_calls, input),
    }
}
