//! Scheduling-history report conversion
//!
//! Two textual layouts are supported and auto-detected from the first data
//! line: the `perf sched timehist` table (one row per scheduled slice) and a
//! `perf script` event log carrying interrupt events. Timehist rows become
//! complete slices projected onto both a per-CPU and a per-task timeline,
//! linked by flow markers; event-log rows become Begin/End interrupt spans.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use clap::ValueEnum;
use regex::Regex;
use tracing::{info, warn};

use crate::chrome::{Lane, Phase, TraceEvent};
use crate::error::{Result, TraceError};

const US_PER_SEC: f64 = 1_000_000.0;
const US_PER_MS: f64 = 1000.0;

/// Scheduling delays longer than this get their own slice (microseconds).
const SCH_DELAY_THRESHOLD_US: f64 = 10.0;

/// Input layout selection. `Auto` inspects the first data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Layout {
    Auto,
    Timehist,
    /// `perf script` event log with interrupt events.
    #[value(name = "normal")]
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Timehist,
    Events,
}

#[derive(Debug, Default)]
struct TaskTotal {
    calls: u64,
    duration_us: f64,
}

/// Compiled line rulesets, one pattern per historically-evolved row format.
struct LineRules {
    event_row: Regex,
    irq_entry: Regex,
    irq_exit: Regex,
    softirq: Regex,
    task_single: Regex,
    task_pair: Regex,
    dashes: Regex,
}

impl LineRules {
    fn new() -> Result<Self> {
        Ok(Self {
            event_row: Regex::new(
                r"^ *(?P<command>.+) +(?P<tid>[0-9]+) +\[(?P<cpu>[0-9]+)\] +(?P<timestamp>[0-9]+\.[0-9]+): +(?P<event>[^:]+:[^:]+): (?P<args>.+)$",
            )?,
            irq_entry: Regex::new(r"irq=(?P<irq>[0-9]+) name=(?P<name>.+)")?,
            irq_exit: Regex::new(r"irq=(?P<irq>[0-9]+) ret=(?P<ret>.+)")?,
            softirq: Regex::new(r"vec=(?P<vec>[0-9]+) \[action=(?P<action>.+)\]")?,
            task_single: Regex::new(r"(?P<command>[^\[]+)\[(?P<pid>[0-9]+)\]")?,
            task_pair: Regex::new(r"(?P<command>[^\[]+)\[(?P<tid>[0-9]+)/(?P<pid>[0-9]+)\]")?,
            dashes: Regex::new(r"^-+$")?,
        })
    }
}

pub struct HistoryLogAdapter {
    layout: Layout,
    /// Added to every timestamp after unit conversion (microseconds).
    timestamp_offset: f64,
    rules: LineRules,
    events: Vec<TraceEvent>,
    /// irq id → name, populated on handler entry, consulted on exit.
    irq_names: HashMap<i64, String>,
    /// task descriptor → running call count and cumulative duration.
    task_totals: HashMap<String, TaskTotal>,
}

impl HistoryLogAdapter {
    pub fn new(layout: Layout, timestamp_offset: f64) -> Result<Self> {
        Ok(Self {
            layout,
            timestamp_offset,
            rules: LineRules::new()?,
            events: Vec::new(),
            irq_names: HashMap::new(),
            task_totals: HashMap::new(),
        })
    }

    /// Consume the report and return the converted events. Prints the
    /// per-task summary to stderr for timehist input.
    pub fn convert<R: BufRead>(mut self, reader: R) -> Result<Vec<TraceEvent>> {
        let mut resolved = match self.layout {
            Layout::Timehist => Some(Resolved::Timehist),
            Layout::Events => Some(Resolved::Events),
            Layout::Auto => None,
        };
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let layout = *resolved.get_or_insert_with(|| detect_layout(&line));
            match layout {
                Resolved::Timehist => self.ingest_timehist_line(&line),
                Resolved::Events => self.ingest_event_line(&line)?,
            }
        }
        self.print_summary();
        Ok(self.events)
    }

    /// One `perf sched timehist` table row:
    /// `time [cpu] task-descriptor... wait sch_delay run`.
    fn ingest_timehist_line(&mut self, line: &str) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        // header and separator rows
        if cols[0] == "time" || cols[0] == "[tid/pid]" || self.rules.dashes.is_match(cols[0]) {
            return;
        }
        // e.g. 1001.610442 lost 78106 events on cpu 0
        if cols.len() >= 2 && cols[1] == "lost" {
            warn!("skip broken line: {}", line.trim_end());
            return;
        }
        if cols.len() < 5 {
            warn!("skip broken line: {}", line.trim_end());
            return;
        }

        let parsed = (
            cols[0].parse::<f64>(),
            cols[1]
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<i64>(),
            cols[cols.len() - 3].parse::<f64>(),
            cols[cols.len() - 2].parse::<f64>(),
            cols[cols.len() - 1].parse::<f64>(),
        );
        let (Ok(time_s), Ok(cpu), Ok(_wait_ms), Ok(sch_delay_ms), Ok(run_ms)) = parsed else {
            warn!("skip broken line: {}", line.trim_end());
            return;
        };
        let ts = time_s * US_PER_SEC + self.timestamp_offset;
        let sch_delay = sch_delay_ms * US_PER_MS;
        let run = run_ms * US_PER_MS;

        // the task descriptor may contain spaces
        let descriptor = cols[2..cols.len() - 3].join(" ");
        if descriptor == "<idle>" {
            return;
        }
        let Some((command, pid, tid)) = self.parse_descriptor(&descriptor) else {
            warn!("skip broken line: {}", line.trim_end());
            return;
        };

        let duration = run;
        let start_ts = ts - duration;
        let cat = command.clone();
        let cpu_lane = (Lane::from("CPU"), Lane::from(format!("CPU:{cpu}")));
        let task_lane = (
            Lane::from(format!("{command}({pid})")),
            Lane::from(tid),
        );

        if sch_delay > SCH_DELAY_THRESHOLD_US {
            let delay_ts = ts - duration - sch_delay;
            let name = format!("sch_delay:{command}({tid})");
            for (lane_pid, lane_tid) in [cpu_lane.clone(), task_lane.clone()] {
                self.events.push(TraceEvent {
                    name: name.clone(),
                    cat: cat.clone(),
                    ph: Phase::Complete,
                    ts: delay_ts,
                    dur: Some(sch_delay),
                    pid: Some(lane_pid),
                    tid: Some(lane_tid),
                    args: Some(BTreeMap::new()),
                    ..TraceEvent::default()
                });
            }
            info!("long sch_delay duration at: {command}({tid}) {sch_delay}us");
        }

        // the run slice, projected onto the per-CPU and per-task timelines
        let name = format!("{command}({tid})");
        for (lane_pid, lane_tid) in [cpu_lane, task_lane] {
            self.events.push(TraceEvent {
                name: name.clone(),
                cat: cat.clone(),
                ph: Phase::Complete,
                ts: start_ts,
                dur: Some(duration),
                pid: Some(lane_pid),
                tid: Some(lane_tid),
                args: Some(BTreeMap::new()),
                ..TraceEvent::default()
            });
        }

        // flow lineage across the task's non-contiguous slices
        let total = self.task_totals.entry(descriptor).or_default();
        let ph = if total.calls == 0 {
            Phase::FlowStart
        } else {
            Phase::FlowStep
        };
        total.calls += 1;
        total.duration_us += duration;
        self.events.push(TraceEvent {
            name,
            cat,
            ph,
            ts: start_ts,
            dur: Some(duration),
            pid: Some(Lane::from(pid)),
            tid: Some(Lane::from(cpu)),
            id: Some(tid),
            args: Some(BTreeMap::new()),
        });
    }

    /// `command[pid]` (secondary id equals pid) or `command[tid/pid]`.
    fn parse_descriptor(&self, descriptor: &str) -> Option<(String, i64, i64)> {
        if let Some(caps) = self.rules.task_single.captures(descriptor) {
            let pid: i64 = caps["pid"].parse().ok()?;
            return Some((caps["command"].to_string(), pid, pid));
        }
        let caps = self.rules.task_pair.captures(descriptor)?;
        Some((
            caps["command"].to_string(),
            caps["pid"].parse().ok()?,
            caps["tid"].parse().ok()?,
        ))
    }

    /// One `perf script` row: `command tid [cpu] timestamp: cat:event: args`.
    /// An unrecognized event name is fatal; everything else recoverable.
    fn ingest_event_line(&mut self, line: &str) -> Result<()> {
        let Some(caps) = self.rules.event_row.captures(line) else {
            warn!("skip broken line: {}", line.trim_end());
            return Ok(());
        };
        let (Ok(cpu), Ok(time_s)) = (
            caps["cpu"].parse::<i64>(),
            caps["timestamp"].parse::<f64>(),
        ) else {
            warn!("skip broken line: {}", line.trim_end());
            return Ok(());
        };
        let ts = time_s * US_PER_SEC + self.timestamp_offset;
        let event = &caps["event"];
        let event_args = &caps["args"];

        let (name, ph) = match event {
            "irq:irq_handler_entry" => {
                let Some(caps) = self.rules.irq_entry.captures(event_args) else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                let Ok(irq) = caps["irq"].parse::<i64>() else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                let irq_name = caps["name"].to_string();
                let name = format!("irq_handler: {irq_name}({irq})");
                self.irq_names.insert(irq, irq_name);
                (name, Phase::DurationBegin)
            }
            "irq:irq_handler_exit" => {
                let Some(caps) = self.rules.irq_exit.captures(event_args) else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                let Ok(irq) = caps["irq"].parse::<i64>() else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                // an exit for an id never seen on entry is a defect in the
                // source data; skip rather than guess a name
                let Some(irq_name) = self.irq_names.get(&irq) else {
                    warn!("irq_handler_exit for unknown irq {irq}: {}", line.trim_end());
                    return Ok(());
                };
                (format!("irq_handler: {irq_name}({irq})"), Phase::DurationEnd)
            }
            "irq:softirq_raise" | "irq:softirq_entry" | "irq:softirq_exit" => {
                let Some(caps) = self.rules.softirq.captures(event_args) else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                if event == "irq:softirq_raise" {
                    return Ok(());
                }
                let Ok(vec) = caps["vec"].parse::<i64>() else {
                    warn!("skip broken line: {}", line.trim_end());
                    return Ok(());
                };
                let action = &caps["action"];
                let ph = if event == "irq:softirq_entry" {
                    Phase::DurationBegin
                } else {
                    Phase::DurationEnd
                };
                (format!("softirq: {action}({vec})"), ph)
            }
            // switch records are the switch-log adapter's job
            "sched:sched_switch" => return Ok(()),
            _ => {
                return Err(TraceError::UnknownEvent {
                    event: event.to_string(),
                    line: line.trim_end().to_string(),
                });
            }
        };

        self.events.push(TraceEvent {
            name: name.clone(),
            cat: "irq".to_string(),
            ph,
            ts,
            pid: Some(Lane::from(cpu)),
            tid: Some(Lane::from(name)),
            args: Some(BTreeMap::new()),
            ..TraceEvent::default()
        });
        Ok(())
    }

    /// Per-task call count and cumulative duration, largest first. Advisory
    /// only; goes to stderr so the JSON output stays clean.
    fn print_summary(&self) {
        if self.task_totals.is_empty() {
            return;
        }
        eprintln!("{:>24} {:>9}   {:>6}", "name", "duration", "cnt");
        let mut rows: Vec<(&String, &TaskTotal)> = self.task_totals.iter().collect();
        rows.sort_by(|a, b| {
            b.1.duration_us
                .partial_cmp(&a.1.duration_us)
                .unwrap_or(Ordering::Equal)
        });
        let mut duration_sum = 0.0;
        let mut call_sum = 0u64;
        for (name, total) in rows {
            eprintln!(
                "{:>24} {:>9.3}ms {:>6}",
                name,
                total.duration_us / US_PER_MS,
                total.calls
            );
            duration_sum += total.duration_us;
            call_sum += total.calls;
        }
        eprintln!(
            "{:>24} {:>9.3}ms {:>6}",
            "total",
            duration_sum / US_PER_MS,
            call_sum
        );
    }
}

fn detect_layout(line: &str) -> Resolved {
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() >= 2 && cols[0] == "time" && cols[1] == "cpu" {
        Resolved::Timehist
    } else {
        Resolved::Events
    }
}
