//! Time-window and name filtering over a trace document
//!
//! Projects a trace down to the events whose intervals overlap a time window
//! and whose names match the include/exclude patterns, keeping both sides of
//! a Begin/End pair together and preserving original order.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::chrome::{Phase, TraceEvent};
use crate::error::Result;

/// Window bounds and name patterns for one filter run. The window is given
/// in milliseconds relative to the first event's timestamp.
#[derive(Debug)]
pub struct FilterCriteria {
    pub begin_ms: f64,
    pub end_ms: f64,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl FilterCriteria {
    /// Patterns are matched at the start of the event name; `None` means
    /// include everything / exclude nothing.
    pub fn new(
        begin_ms: f64,
        end_ms: f64,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            begin_ms,
            end_ms,
            include: include.map(anchored).transpose()?,
            exclude: exclude.map(anchored).transpose()?,
        })
    }

    fn matches(&self, name: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(name) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        true
    }
}

fn anchored(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})"))
}

#[derive(Debug, Clone, Copy)]
struct PairRecord {
    begin_index: usize,
    end_index: Option<usize>,
    begin_ts: f64,
    end_ts: f64,
}

/// Filter a trace, returning the retained events in their original order.
pub fn filter(events: &[TraceEvent], criteria: &FilterCriteria) -> Vec<TraceEvent> {
    let base_ts = events.first().map(|e| e.ts).unwrap_or(0.0);

    // one pass: pair B/E rows per name, record X rows directly
    let mut stacks: HashMap<&str, Vec<(usize, f64)>> = HashMap::new();
    let mut records: HashMap<&str, Vec<PairRecord>> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        match event.ph {
            Phase::DurationBegin => {
                stacks.entry(&event.name).or_default().push((index, event.ts));
            }
            Phase::DurationEnd => {
                let Some((begin_index, begin_ts)) =
                    stacks.entry(&event.name).or_default().pop()
                else {
                    warn!("[{}] not found ph:B data at ph:E", event.name);
                    continue;
                };
                records.entry(&event.name).or_default().push(PairRecord {
                    begin_index,
                    end_index: Some(index),
                    begin_ts,
                    end_ts: event.ts,
                });
            }
            Phase::Complete => {
                let dur = event.dur.unwrap_or(0.0);
                records.entry(&event.name).or_default().push(PairRecord {
                    begin_index: index,
                    end_index: None,
                    begin_ts: event.ts,
                    end_ts: event.ts + dur,
                });
            }
            // phases without a duration take no part in the projection
            _ => {}
        }
    }

    let window_begin = criteria.begin_ms * 1000.0 + base_ts;
    let window_end = criteria.end_ms * 1000.0 + base_ts;

    let mut retained: Vec<usize> = Vec::new();
    for (name, list) in &records {
        if !criteria.matches(name) {
            continue;
        }
        for record in list {
            // half-open overlap with [window_begin, window_end)
            if record.begin_ts < window_end && window_begin < record.end_ts {
                retained.push(record.begin_index);
                if let Some(end_index) = record.end_index {
                    retained.push(end_index);
                }
            }
        }
    }
    retained.sort_unstable();
    retained.into_iter().map(|i| events[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, ph: Phase, ts: f64, dur: Option<f64>) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            ph,
            ts,
            dur,
            ..TraceEvent::default()
        }
    }

    fn criteria(begin_ms: f64, end_ms: f64) -> FilterCriteria {
        FilterCriteria::new(begin_ms, end_ms, None, None).unwrap()
    }

    #[test]
    fn test_pair_retained_together() {
        let events = vec![
            event("a", Phase::DurationBegin, 1000.0, None),
            event("b", Phase::DurationBegin, 1500.0, None),
            event("b", Phase::DurationEnd, 2500.0, None),
            event("a", Phase::DurationEnd, 3000.0, None),
        ];
        // window [0ms, 10ms) from base 1000us covers everything
        let kept = filter(&events, &criteria(0.0, 10.0));
        assert_eq!(kept.len(), 4);
        assert_eq!(kept, events);
    }

    #[test]
    fn test_window_excludes_disjoint_intervals() {
        let events = vec![
            event("early", Phase::Complete, 1000.0, Some(100.0)),
            event("late", Phase::Complete, 9_001_000.0, Some(100.0)),
        ];
        // base is 1000us; window [0ms, 1000ms) keeps only the first
        let kept = filter(&events, &criteria(0.0, 1000.0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "early");
    }

    #[test]
    fn test_half_open_overlap_boundaries() {
        let events = vec![
            event("base", Phase::Complete, 0.0, Some(1.0)),
            // ends exactly at window begin: excluded (begin < end_ts fails)
            event("ends_at_begin", Phase::Complete, 500.0, Some(500.0)),
            // begins exactly at window end: excluded (begin_ts < end fails)
            event("begins_at_end", Phase::Complete, 2000.0, Some(100.0)),
            // straddles the begin boundary: retained
            event("straddles", Phase::Complete, 900.0, Some(200.0)),
        ];
        let kept = filter(&events, &criteria(1.0, 2.0));
        let names: Vec<&str> = kept.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["straddles"]);
    }

    #[test]
    fn test_include_pattern_anchored_at_start() {
        let events = vec![
            event("softirq: RCU(9)", Phase::Complete, 0.0, Some(1.0)),
            event("irq_handler: twd(17)", Phase::Complete, 1.0, Some(1.0)),
        ];
        let criteria = FilterCriteria::new(0.0, 1000.0, Some("softirq"), None).unwrap();
        let kept = filter(&events, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "softirq: RCU(9)");

        // "irq" does not match "softirq: ..." at the start
        let criteria = FilterCriteria::new(0.0, 1000.0, Some("irq"), None).unwrap();
        let kept = filter(&events, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "irq_handler: twd(17)");
    }

    #[test]
    fn test_exclude_pattern() {
        let events = vec![
            event("swapper/7[0]", Phase::Complete, 0.0, Some(1.0)),
            event("bpftrace[1]", Phase::Complete, 1.0, Some(1.0)),
        ];
        let criteria = FilterCriteria::new(0.0, 1000.0, None, Some("swapper")).unwrap();
        let kept = filter(&events, &criteria);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "bpftrace[1]");
    }

    #[test]
    fn test_unmatched_end_skipped() {
        let events = vec![
            event("a", Phase::Complete, 0.0, Some(1.0)),
            event("b", Phase::DurationEnd, 5.0, None),
        ];
        let kept = filter(&events, &criteria(0.0, 1000.0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "a");
    }

    #[test]
    fn test_non_duration_phases_not_retained() {
        let events = vec![
            event("a", Phase::Complete, 0.0, Some(1.0)),
            event("a", Phase::FlowStart, 0.0, Some(1.0)),
            event("a", Phase::FlowStep, 2.0, Some(1.0)),
        ];
        let kept = filter(&events, &criteria(0.0, 1000.0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ph, Phase::Complete);
    }

    #[test]
    fn test_order_preserved_across_names() {
        let events = vec![
            event("b", Phase::DurationBegin, 0.0, None),
            event("a", Phase::Complete, 1.0, Some(1.0)),
            event("b", Phase::DurationEnd, 2.0, None),
            event("c", Phase::Complete, 3.0, Some(1.0)),
        ];
        let kept = filter(&events, &criteria(0.0, 1000.0));
        let names: Vec<&str> = kept.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "b", "c"]);
    }

    #[test]
    fn test_same_name_lifo_pairing() {
        let events = vec![
            event("a", Phase::DurationBegin, 0.0, None),
            event("a", Phase::DurationBegin, 5_000_000.0, None),
            event("a", Phase::DurationEnd, 5_000_100.0, None),
            event("a", Phase::DurationEnd, 5_000_200.0, None),
        ];
        // window over the tail only: the inner pair overlaps, and the outer
        // pair [0, 5000200) also overlaps, so all four rows survive
        let kept = filter(&events, &criteria(4000.0, 6000.0));
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_empty_input() {
        let kept = filter(&[], &criteria(0.0, 1000.0));
        assert!(kept.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(FilterCriteria::new(0.0, 1.0, Some("[unclosed"), None).is_err());
    }
}
