//! CLI argument parsing for schedtrace

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::history::Layout;

#[derive(Parser, Debug)]
#[command(name = "schedtrace")]
#[command(version)]
#[command(about = "Convert scheduling-trace logs into Chrome trace-event timelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert a per-CPU context-switch log (JSON-lines or CSV)
    Switch {
        /// Output file for the trace document (stdout when omitted)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// CSV side table mapping pid to comm and cmdline
        #[arg(long = "pid-comm-cmdline", value_name = "CSV")]
        pid_comm_cmdline: Option<PathBuf>,

        /// Rows consumed per progress report
        #[arg(long = "chunk-size", value_name = "ROWS", default_value = "10000")]
        chunk_size: usize,

        /// Input log (stdin when omitted)
        input: Option<PathBuf>,
    },

    /// Convert a scheduling-history report (perf sched timehist / perf script)
    Timehist {
        /// Output file for the trace document (stdout when omitted)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Input layout
        #[arg(short = 'f', long = "format", value_enum, default_value = "auto")]
        format: Layout,

        /// Offset added to every timestamp after unit conversion (microseconds)
        #[arg(long = "timestamp-offset", value_name = "US", default_value = "0.0")]
        timestamp_offset: f64,

        /// Input report
        input: PathBuf,
    },

    /// Keep only events overlapping a time window and matching name patterns
    Filter {
        /// Window begin relative to the first event (milliseconds)
        #[arg(
            short = 'b',
            long = "begin-timestamp",
            value_name = "MS",
            default_value = "0"
        )]
        begin: f64,

        /// Window end relative to the first event (milliseconds)
        #[arg(
            short = 'e',
            long = "end-timestamp",
            value_name = "MS",
            default_value = "3600000"
        )]
        end: f64,

        /// Event name pattern to include, matched at the start of the name
        #[arg(long = "include", visible_alias = "in", value_name = "REGEX")]
        include: Option<String>,

        /// Event name pattern to exclude, matched at the start of the name
        #[arg(long = "exclude", visible_alias = "ex", value_name = "REGEX")]
        exclude: Option<String>,

        /// Output file for the filtered document (stdout when omitted)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Input trace document
        input: PathBuf,
    },

    /// Report robust-statistics outliers over per-name call durations
    Outlier {
        /// Minimum duration of an outlier (milliseconds)
        #[arg(long = "min", value_name = "MS", default_value = "100")]
        min_duration: f64,

        /// Robust z-score threshold
        #[arg(long = "th", value_name = "SCORE", default_value = "100")]
        threshold: f64,

        /// Minimum number of calls per name
        #[arg(long = "call", value_name = "N", default_value = "100")]
        min_calls: usize,

        /// Input trace document
        input: PathBuf,
    },
}
