//! Begin/End marker pairing
//!
//! One context's switch history interleaves several named tasks, and a switch
//! row emits the incoming Begin before the outgoing End at the same
//! timestamp. An End therefore closes the most recently opened still-open
//! Begin *of its own name* on that context — not whatever was opened last on
//! the context by any name.

use std::collections::BTreeMap;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPhase {
    Begin,
    End,
}

/// A point-in-time Begin or End event prior to pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub name: String,
    pub phase: MarkerPhase,
    /// The lane the marker is attributed to, e.g. `"CPU 7"`.
    pub context: String,
    /// Microseconds.
    pub ts: f64,
    pub args: Option<BTreeMap<String, String>>,
}

/// A closed, paired time span. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub name: String,
    pub context: String,
    pub begin_ts: f64,
    pub end_ts: f64,
    pub args: Option<BTreeMap<String, String>>,
}

impl Interval {
    pub fn duration(&self) -> f64 {
        self.end_ts - self.begin_ts
    }
}

/// Pairs ordered Begin/End markers into intervals, tolerating unmatched and
/// out-of-order input. State lives for one run; construct per run.
#[derive(Debug, Default)]
pub struct SpanReconstructor {
    // context → name → begin timestamps, innermost last
    stacks: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
}

impl SpanReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one marker; a closed interval comes back on a matched End.
    pub fn push(&mut self, marker: Marker) -> Option<Interval> {
        match marker.phase {
            MarkerPhase::Begin => {
                self.begin(marker);
                None
            }
            MarkerPhase::End => self.end(marker),
        }
    }

    fn begin(&mut self, marker: Marker) {
        self.stacks
            .entry(marker.context)
            .or_default()
            .entry(marker.name)
            .or_default()
            .push(marker.ts);
    }

    fn end(&mut self, marker: Marker) -> Option<Interval> {
        let begin_ts = self
            .stacks
            .get_mut(&marker.context)
            .and_then(|names| names.get_mut(&marker.name))
            .and_then(Vec::pop);
        let Some(begin_ts) = begin_ts else {
            warn!("not found begin trace of {}", marker.name);
            return None;
        };
        if marker.ts < begin_ts {
            // mismatched input; a negative duration is never emitted
            warn!(
                "dropping {}: end {} precedes begin {}",
                marker.name, marker.ts, begin_ts
            );
            return None;
        }
        Some(Interval {
            name: marker.name,
            context: marker.context,
            begin_ts,
            end_ts: marker.ts,
            args: marker.args,
        })
    }

    /// Number of spans still open across all contexts.
    pub fn open_spans(&self) -> usize {
        self.stacks
            .values()
            .flat_map(|names| names.values())
            .map(Vec::len)
            .sum()
    }

    /// Report spans still open at end of stream, one warning per context.
    /// They are discarded, never force-closed.
    pub fn finish(self) {
        for (context, names) in self.stacks {
            let open: Vec<String> = names
                .into_iter()
                .flat_map(|(name, begins)| {
                    begins.into_iter().map(move |ts| format!("{name}@{ts}"))
                })
                .collect();
            if !open.is_empty() {
                warn!("{} incompleted traces [{}]", context, open.join(", "));
            }
        }
    }
}
