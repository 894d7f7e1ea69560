//! Robust outlier detection over call durations
//!
//! Scores every observed duration per distinct event name with a robust
//! z-score based on the median absolute deviation, and reports the names
//! whose selected outliers survive the minimum-duration cut. Durations are
//! collected in milliseconds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::chrome::{Phase, TraceEvent};

const MS_PER_US: f64 = 1000.0;

/// Detection thresholds for one run.
#[derive(Debug, Clone, Copy)]
pub struct OutlierCriteria {
    /// Minimum absolute duration of a reported outlier (milliseconds).
    pub min_duration_ms: f64,
    /// Robust z-score threshold.
    pub threshold: f64,
    /// Minimum number of recorded calls per name.
    pub min_calls: usize,
}

/// Outlier report for one event name.
#[derive(Debug, Clone, PartialEq)]
pub struct NameReport {
    pub name: String,
    /// Every recorded duration, in observation order (milliseconds).
    pub durations_ms: Vec<f64>,
    /// The selected outliers, in observation order (milliseconds).
    pub outliers_ms: Vec<f64>,
    pub median_ms: f64,
}

/// Collect per-name durations and report the names with outliers, sorted by
/// name for deterministic output.
pub fn detect(events: &[TraceEvent], criteria: &OutlierCriteria) -> Vec<NameReport> {
    let mut stacks: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut durations: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for event in events {
        match event.ph {
            Phase::DurationBegin => {
                stacks.entry(&event.name).or_default().push(event.ts);
            }
            Phase::DurationEnd => {
                let Some(begin_ts) = stacks.entry(&event.name).or_default().pop() else {
                    warn!("[{}] not found ph:B data at ph:E", event.name);
                    continue;
                };
                durations
                    .entry(&event.name)
                    .or_default()
                    .push((event.ts - begin_ts) / MS_PER_US);
            }
            Phase::Complete => {
                durations
                    .entry(&event.name)
                    .or_default()
                    .push(event.dur.unwrap_or(0.0) / MS_PER_US);
            }
            _ => {}
        }
    }

    let mut reports = Vec::new();
    for (name, values) in durations {
        if values.len() < criteria.min_calls {
            continue;
        }
        let median_ms = median(&values);
        let deviations: Vec<f64> = values.iter().map(|x| (x - median_ms).abs()).collect();
        let mdev = median(&deviations);
        // with zero dispersion every score is defined as zero and nothing
        // qualifies, regardless of threshold
        let outliers_ms: Vec<f64> = if mdev > 0.0 {
            values
                .iter()
                .zip(&deviations)
                .filter(|(x, d)| *d / mdev >= criteria.threshold && **x >= criteria.min_duration_ms)
                .map(|(x, _)| *x)
                .collect()
        } else {
            Vec::new()
        };
        if !outliers_ms.is_empty() {
            reports.push(NameReport {
                name: name.to_string(),
                durations_ms: values,
                outliers_ms,
                median_ms,
            });
        }
    }
    reports
}

/// Median with averaging of the two middle order statistics.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Print the report blocks to stdout, one per name.
pub fn print_report(reports: &[NameReport]) {
    for report in reports {
        println!("name:{}", report.name);
        println!("outliers(ms):{:?}", report.outliers_ms);
        println!("median(ms):{}", report.median_ms);
        println!();
    }
}
