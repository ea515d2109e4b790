//! Property tests for bounded sample series

use chrono::{TimeZone, Utc};
use linkwatch_core::monitoring::{MetricValue, Sample, SampleSeries};
use proptest::prelude::*;

fn sample(index: usize) -> Sample {
    let timestamp = Utc
        .timestamp_opt(1_700_000_000 + index as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);
    Sample::value(timestamp, "eth0", "rx_bytes", MetricValue::Number(index as f64))
}

proptest! {
    /// Property: a series never holds more than its capacity
    #[test]
    fn len_never_exceeds_capacity(capacity in 1usize..64, pushes in 0usize..256) {
        let mut series = SampleSeries::new(capacity);
        for i in 0..pushes {
            series.push(sample(i));
            prop_assert!(series.len() <= capacity);
        }
        prop_assert_eq!(series.len(), pushes.min(capacity));
        prop_assert_eq!(series.evicted(), pushes.saturating_sub(capacity) as u64);
    }

    /// Property: the series keeps the newest samples in append order
    #[test]
    fn keeps_newest_in_order(capacity in 1usize..32, pushes in 1usize..128) {
        let mut series = SampleSeries::new(capacity);
        for i in 0..pushes {
            series.push(sample(i));
        }

        let kept: Vec<f64> = series
            .iter()
            .filter_map(|s| s.metric_value().and_then(MetricValue::as_number))
            .collect();
        let first = pushes.saturating_sub(capacity);
        let expected: Vec<f64> = (first..pushes).map(|i| i as f64).collect();
        prop_assert_eq!(kept, expected);
    }

    /// Property: latest(n) is a suffix of the series
    #[test]
    fn latest_is_a_suffix(capacity in 1usize..32, pushes in 0usize..64, n in 0usize..40) {
        let mut series = SampleSeries::new(capacity);
        for i in 0..pushes {
            series.push(sample(i));
        }

        let latest = series.latest(n);
        let all: Vec<Sample> = series.iter().cloned().collect();
        prop_assert_eq!(latest.len(), n.min(all.len()));
        prop_assert_eq!(&all[all.len() - latest.len()..], latest.as_slice());
    }
}
