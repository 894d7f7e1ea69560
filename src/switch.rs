//! Per-CPU context-switch log conversion
//!
//! Accepts a `sched_switch` capture stream in JSON-lines or tabular CSV form.
//! Two row shapes are multiplexed in one stream: pre-aggregated slices
//! (`pid` + `dur`) and raw switches (`prev_*`/`next_*` contexts); each row is
//! classified once by field presence. Switch markers are paired into closed
//! intervals per CPU; slice rows become complete events directly.
//!
//! Source timestamps are nanoseconds; the model stores microseconds.

use std::collections::BTreeMap;
use std::io::BufRead;

use serde::Deserialize;
use tracing::{info, warn};

use crate::chrome::{Lane, Phase, TraceEvent};
use crate::comm::CommResolver;
use crate::error::Result;
use crate::spans::{Marker, MarkerPhase, SpanReconstructor};

const NS_PER_US: f64 = 1000.0;

/// Rows consumed per progress report.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// One input row. Field presence decides the shape: `dur` marks a
/// pre-aggregated slice, `prev_*`/`next_*` mark a raw switch.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawRow {
    ts: f64,
    cpu: i64,
    #[serde(default)]
    pid: Option<i64>,
    #[serde(default)]
    dur: Option<f64>,
    #[serde(default)]
    comm: Option<String>,
    #[serde(default)]
    prev_pid: Option<i64>,
    #[serde(default)]
    prev_comm: Option<String>,
    #[serde(default)]
    next_pid: Option<i64>,
    #[serde(default)]
    next_comm: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    JsonLines,
    Csv,
}

pub struct SwitchLogAdapter {
    resolver: CommResolver,
    reconstructor: SpanReconstructor,
    events: Vec<TraceEvent>,
    chunk_size: usize,
}

impl SwitchLogAdapter {
    pub fn new(resolver: CommResolver, chunk_size: usize) -> Self {
        Self {
            resolver,
            reconstructor: SpanReconstructor::new(),
            events: Vec::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Consume the whole stream and return the converted events in input
    /// order. Incomplete spans are reported per context at end of stream.
    pub fn convert<R: BufRead>(mut self, mut reader: R) -> Result<Vec<TraceEvent>> {
        match detect_format(&mut reader)? {
            InputFormat::JsonLines => self.convert_jsonl(reader)?,
            InputFormat::Csv => self.convert_csv(reader)?,
        }
        std::mem::take(&mut self.reconstructor).finish();
        Ok(self.events)
    }

    fn convert_jsonl<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let mut chunk = 0usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRow>(&line) {
                Ok(row) => self.ingest(index + 1, row),
                Err(err) => warn!("broken data at L{}: {err}", index + 1),
            }
            chunk += 1;
            if chunk == self.chunk_size {
                info!("loaded data [{chunk}]");
                chunk = 0;
            }
        }
        if chunk > 0 {
            info!("loaded data [{chunk}]");
        }
        Ok(())
    }

    fn convert_csv<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut chunk = 0usize;
        for (index, row) in csv_reader.deserialize::<RawRow>().enumerate() {
            match row {
                Ok(row) => self.ingest(index + 1, row),
                Err(err) => warn!("broken data at L{}: {err}", index + 1),
            }
            chunk += 1;
            if chunk == self.chunk_size {
                info!("loaded data [{chunk}]");
                chunk = 0;
            }
        }
        if chunk > 0 {
            info!("loaded data [{chunk}]");
        }
        Ok(())
    }

    fn ingest(&mut self, row_no: usize, row: RawRow) {
        if row.dur.is_some() {
            self.ingest_slice(row_no, row);
        } else if row.prev_pid.is_some() || row.next_pid.is_some() {
            self.ingest_switch(row);
        } else {
            warn!("broken data at L{row_no}: neither slice nor switch fields present");
        }
    }

    /// A pre-aggregated slice becomes one complete event directly.
    fn ingest_slice(&mut self, row_no: usize, row: RawRow) {
        let (Some(pid), Some(dur)) = (row.pid, row.dur) else {
            warn!("broken data at L{row_no}: slice row missing pid");
            return;
        };
        let comm = self.resolver.resolve(pid, row.comm.as_deref().unwrap_or(""));
        self.events.push(TraceEvent {
            name: format!("{comm}[{pid}]"),
            ph: Phase::Complete,
            ts: row.ts / NS_PER_US,
            dur: Some(dur / NS_PER_US),
            tid: Some(Lane::from(format!("CPU {}", row.cpu))),
            ..TraceEvent::default()
        });
    }

    /// A switch row opens the incoming context and closes the outgoing one,
    /// Begin first, both at the row's timestamp.
    fn ingest_switch(&mut self, row: RawRow) {
        let ts = row.ts / NS_PER_US;
        let context = format!("CPU {}", row.cpu);

        if let Some(next_pid) = row.next_pid {
            let observed = row.next_comm.as_deref().or(row.comm.as_deref()).unwrap_or("");
            let comm = self.resolver.resolve(next_pid, observed);
            self.feed(Marker {
                name: format!("{comm}[{next_pid}]"),
                phase: MarkerPhase::Begin,
                context: context.clone(),
                ts,
                args: None,
            });
        }

        if let Some(prev_pid) = row.prev_pid {
            let observed = row.prev_comm.as_deref().or(row.comm.as_deref()).unwrap_or("");
            let comm = self.resolver.resolve(prev_pid, observed);
            let mut args = BTreeMap::new();
            args.insert("tid".to_string(), prev_pid.to_string());
            args.insert("comm".to_string(), comm.clone());
            if let Some((table_comm, cmdline)) = self.resolver.augment(prev_pid) {
                info!("{table_comm:<15}[{prev_pid:<7}] {cmdline}");
                args.insert("comm".to_string(), table_comm.to_string());
                args.insert("cmdline".to_string(), cmdline.to_string());
            }
            self.feed(Marker {
                name: format!("{comm}[{prev_pid}]"),
                phase: MarkerPhase::End,
                context,
                ts,
                args: Some(args),
            });
        }
    }

    fn feed(&mut self, marker: Marker) {
        if let Some(interval) = self.reconstructor.push(marker) {
            self.events.push(TraceEvent {
                name: interval.name,
                ph: Phase::Complete,
                ts: interval.begin_ts,
                dur: Some(interval.end_ts - interval.begin_ts),
                tid: Some(Lane::from(interval.context)),
                args: interval.args,
                ..TraceEvent::default()
            });
        }
    }
}

fn detect_format<R: BufRead>(reader: &mut R) -> Result<InputFormat> {
    let buf = reader.fill_buf()?;
    let first = buf.iter().find(|b| !b.is_ascii_whitespace());
    Ok(match first {
        Some(b'{') => InputFormat::JsonLines,
        _ => InputFormat::Csv,
    })
}
