use serde::Serialize;

use crate::error::AnalyticsError;

pub const DEFAULT_BUCKETS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
}

/// Equal-width frequency distribution of values in [0, 1].
///
/// Bucket `i` covers `[i/N, (i+1)/N)`; 1.0 lands in the last bucket. Values
/// outside [0, 1] are clamped into the edge buckets, non-finite values are
/// skipped.
pub fn bucketize(values: &[f64], buckets: usize) -> Result<Histogram, AnalyticsError> {
    if buckets == 0 {
        return Err(AnalyticsError::InvalidParameter {
            name: "buckets",
            reason: "bucket count must be at least 1".to_string(),
        });
    }

    let mut counts = vec![0usize; buckets];
    for value in values.iter().filter(|value| value.is_finite()) {
        let index = (value.clamp(0.0, 1.0) * buckets as f64).floor() as usize;
        counts[index.min(buckets - 1)] += 1;
    }

    let labels = (0..buckets)
        .map(|i| {
            let lower = i as f64 / buckets as f64;
            let upper = (i + 1) as f64 / buckets as f64;
            let closing = if i + 1 == buckets { ']' } else { ')' };
            format!("[{lower:.2}-{upper:.2}{closing}")
        })
        .collect();

    Ok(Histogram { labels, counts })
}
