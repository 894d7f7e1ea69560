//! Chrome trace-event data model
//!
//! Every converter emits, and every analysis pass consumes, a JSON document
//! `{"traceEvents": [...]}` in the trace-event format understood by
//! `chrome://tracing` and Perfetto. Timestamps and durations are microseconds.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Trace-event phase (the `ph` field).
///
/// The alphabet is closed: a `ph` value outside it fails document loading,
/// which is the fatal unrecognized-phase condition.
#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Debug, Default)]
pub enum Phase {
    #[default]
    #[serde(rename = "B")]
    DurationBegin,
    #[serde(rename = "E")]
    DurationEnd,
    #[serde(rename = "X")]
    Complete,
    #[serde(rename = "i")]
    Instant,
    #[serde(rename = "I")]
    InstantLegacy,
    #[serde(rename = "C")]
    Counter,
    #[serde(rename = "b")]
    AsyncStart,
    #[serde(rename = "n")]
    AsyncInstant,
    #[serde(rename = "e")]
    AsyncEnd,
    #[serde(rename = "s")]
    FlowStart,
    #[serde(rename = "t")]
    FlowStep,
    #[serde(rename = "f")]
    FlowEnd,
    #[serde(rename = "P")]
    Sample,
    #[serde(rename = "N")]
    ObjectCreated,
    #[serde(rename = "O")]
    ObjectSnapshot,
    #[serde(rename = "D")]
    ObjectDestroyed,
    #[serde(rename = "M")]
    Metadata,
    #[serde(rename = "V")]
    MemoryDumpGlobal,
    #[serde(rename = "v")]
    MemoryDumpProcess,
    #[serde(rename = "R")]
    Mark,
    #[serde(rename = "c")]
    ClockSync,
}

/// A `pid`/`tid` lane: either a numeric id or a descriptive label such as
/// `"CPU 7"` or `"fzf(4922)"`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum Lane {
    Id(i64),
    Label(String),
}

impl From<i64> for Lane {
    fn from(id: i64) -> Self {
        Lane::Id(id)
    }
}

impl From<String> for Lane {
    fn from(label: String) -> Self {
        Lane::Label(label)
    }
}

impl From<&str> for Lane {
    fn from(label: &str) -> Self {
        Lane::Label(label.to_string())
    }
}

/// A single trace event. Optional fields are omitted from the JSON output
/// when absent.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct TraceEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cat: String,
    pub ph: Phase,
    #[serde(default)]
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Lane>,
    /// Flow correlation key for `s`/`t` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,
}

/// The wrapped document form.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TraceDocument {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
}

#[derive(Serialize)]
struct TraceDocumentRef<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [TraceEvent],
}

/// Load trace events from a reader, accepting either the wrapped
/// `{"traceEvents": [...]}` document or a bare event array.
pub fn load_events<R: Read>(reader: R) -> Result<Vec<TraceEvent>> {
    let value: serde_json::Value = serde_json::from_reader(reader)?;
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(_) => {
            let doc: TraceDocument = serde_json::from_value(value)?;
            Ok(doc.trace_events)
        }
        _ => Err(TraceError::MalformedDocument),
    }
}

/// Load trace events from a file path.
pub fn load_events_from_path(path: &Path) -> Result<Vec<TraceEvent>> {
    load_events(BufReader::new(File::open(path)?))
}

/// Write the wrapped `{"traceEvents": [...]}` document.
pub fn write_document<W: Write>(writer: W, events: &[TraceEvent]) -> Result<()> {
    serde_json::to_writer(
        writer,
        &TraceDocumentRef {
            trace_events: events,
        },
    )?;
    Ok(())
}
