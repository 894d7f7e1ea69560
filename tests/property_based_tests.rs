//! Property-based tests for reconstruction, filtering, and outlier scoring

use proptest::prelude::*;

use schedtrace::chrome::{Phase, TraceEvent};
use schedtrace::filter::{self, FilterCriteria};
use schedtrace::outlier::{self, OutlierCriteria};
use schedtrace::spans::{Marker, MarkerPhase, SpanReconstructor};

fn marker(name: String, phase: MarkerPhase, context: String, ts: f64) -> Marker {
    Marker {
        name,
        phase,
        context,
        ts,
        args: None,
    }
}

proptest! {
    /// Well-formed begin/end pairs with unique names reconstruct exactly,
    /// every interval non-negative.
    #[test]
    fn prop_unique_pairs_all_close(
        pair_count in 1usize..40,
        context_count in 1usize..4,
        gap in 1u64..1000,
    ) {
        let mut rec = SpanReconstructor::new();
        let mut intervals = Vec::new();
        let mut ts = 0.0;
        for ctx in 0..context_count {
            let context = format!("CPU {ctx}");
            for i in 0..pair_count {
                let name = format!("task-{ctx}-{i}");
                rec.push(marker(name.clone(), MarkerPhase::Begin, context.clone(), ts));
                ts += gap as f64;
                if let Some(interval) = rec.push(marker(name, MarkerPhase::End, context.clone(), ts)) {
                    intervals.push(interval);
                }
                ts += gap as f64;
            }
        }
        prop_assert_eq!(intervals.len(), pair_count * context_count);
        prop_assert!(intervals.iter().all(|i| i.end_ts >= i.begin_ts));
        prop_assert_eq!(rec.open_spans(), 0);
    }

    /// Nested spans close inner-first and never cross-pair.
    #[test]
    fn prop_nested_spans_close_lifo(depth in 1usize..20, gap in 1u64..100) {
        let mut rec = SpanReconstructor::new();
        let mut ts = 0.0;
        for level in 0..depth {
            rec.push(marker(format!("level-{level}"), MarkerPhase::Begin, "CPU 0".into(), ts));
            ts += gap as f64;
        }
        // close in reverse order: innermost name first
        for level in (0..depth).rev() {
            let interval = rec
                .push(marker(format!("level-{level}"), MarkerPhase::End, "CPU 0".into(), ts))
                .expect("every end has a matching begin");
            prop_assert_eq!(interval.name, format!("level-{level}"));
            prop_assert!(interval.end_ts >= interval.begin_ts);
            ts += gap as f64;
        }
        prop_assert_eq!(rec.open_spans(), 0);
    }

    /// A complete event is retained iff its interval overlaps the half-open
    /// window, and output preserves input order.
    #[test]
    fn prop_filter_overlap_and_order(
        spans in prop::collection::vec((0.0f64..10_000.0, 0.0f64..500.0), 1..60),
        window_begin_ms in 0.0f64..10.0,
        window_len_ms in 0.0f64..10.0,
    ) {
        let events: Vec<TraceEvent> = spans
            .iter()
            .enumerate()
            .map(|(i, (ts, dur))| TraceEvent {
                name: format!("span-{i}"),
                ph: Phase::Complete,
                ts: *ts,
                dur: Some(*dur),
                ..TraceEvent::default()
            })
            .collect();
        let criteria = FilterCriteria::new(
            window_begin_ms,
            window_begin_ms + window_len_ms,
            None,
            None,
        )
        .unwrap();
        let kept = filter::filter(&events, &criteria);

        let base = events[0].ts;
        let window = (
            window_begin_ms * 1000.0 + base,
            (window_begin_ms + window_len_ms) * 1000.0 + base,
        );
        let expected: Vec<&TraceEvent> = events
            .iter()
            .filter(|e| {
                let begin = e.ts;
                let end = e.ts + e.dur.unwrap();
                begin < window.1 && window.0 < end
            })
            .collect();
        prop_assert_eq!(kept.len(), expected.len());
        for (kept_event, expected_event) in kept.iter().zip(expected) {
            prop_assert_eq!(kept_event, expected_event);
        }
    }

    /// Both sides of a retained pair appear together, in original order.
    #[test]
    fn prop_filter_pairs_stay_paired(
        durations in prop::collection::vec(1.0f64..1000.0, 1..30),
    ) {
        let mut events = Vec::new();
        let mut ts = 0.0;
        for (i, dur) in durations.iter().enumerate() {
            events.push(TraceEvent {
                name: format!("call-{i}"),
                ph: Phase::DurationBegin,
                ts,
                ..TraceEvent::default()
            });
            events.push(TraceEvent {
                name: format!("call-{i}"),
                ph: Phase::DurationEnd,
                ts: ts + dur,
                ..TraceEvent::default()
            });
            ts += dur + 1.0;
        }
        let criteria = FilterCriteria::new(0.0, 3_600_000.0, None, None).unwrap();
        let kept = filter::filter(&events, &criteria);
        prop_assert_eq!(kept.len(), events.len());
        // begins and ends alternate exactly as in the input
        for (kept_event, original) in kept.iter().zip(&events) {
            prop_assert_eq!(kept_event, original);
        }
    }

    /// Uniform durations have zero dispersion and produce no outliers,
    /// whatever the threshold.
    #[test]
    fn prop_uniform_durations_no_outliers(
        dur_us in 1.0f64..1_000_000.0,
        count in 1usize..200,
        threshold in 0.0f64..1000.0,
    ) {
        let events: Vec<TraceEvent> = (0..count)
            .map(|i| TraceEvent {
                name: "task".to_string(),
                ph: Phase::Complete,
                ts: i as f64,
                dur: Some(dur_us),
                ..TraceEvent::default()
            })
            .collect();
        let reports = outlier::detect(
            &events,
            &OutlierCriteria {
                min_duration_ms: 0.0,
                threshold,
                min_calls: 1,
            },
        );
        prop_assert!(reports.is_empty());
    }

    /// The reported median is a real middle value: at least half the
    /// observations lie on each side.
    #[test]
    fn prop_median_is_central(values in prop::collection::vec(0.0f64..1000.0, 1..100)) {
        let med = outlier::median(&values);
        let below = values.iter().filter(|v| **v <= med).count();
        let above = values.iter().filter(|v| **v >= med).count();
        prop_assert!(below * 2 >= values.len());
        prop_assert!(above * 2 >= values.len());
    }
}
