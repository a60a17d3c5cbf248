use std::collections::HashMap;

use tracing::{debug, warn};

use crate::nms::{normalize_trend_key, NmsClient, ParameterLookup, TimeWindow, TrendSample};

use super::NO_DATA;

/// How valid samples of one key collapse into a single figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Maximum valid sample over the window.
    Max,
    /// Average of the three largest valid samples (fewer if unavailable).
    Top3Average,
    /// Straight average of all valid samples.
    Average,
}

/// Reduce one key's samples. Invalid samples are excluded first; zero
/// valid samples reduce to the [`NO_DATA`] sentinel.
pub fn reduce(samples: &[TrendSample], reduction: Reduction) -> f64 {
    let mut valid: Vec<f64> = samples
        .iter()
        .filter(|s| s.is_valid())
        .map(|s| s.value)
        .collect();

    if valid.is_empty() {
        return NO_DATA;
    }

    match reduction {
        Reduction::Max => valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Reduction::Top3Average => {
            valid.sort_by(|a, b| b.total_cmp(a));
            let top = &valid[..valid.len().min(3)];
            top.iter().sum::<f64>() / top.len() as f64
        }
        Reduction::Average => valid.iter().sum::<f64>() / valid.len() as f64,
    }
}

/// Issues windowed trend requests and reduces the returned samples
/// per row key.
pub struct TrendAggregator<'a, C> {
    client: &'a C,
}

impl<'a, C: NmsClient> TrendAggregator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// One trend request for a batch of lookups over `window`, reduced
    /// per key. Failures and empty responses yield an empty map; the
    /// batch simply contributes no data.
    pub async fn batch_values(
        &self,
        collector: &str,
        batch: &[ParameterLookup],
        window: TimeWindow,
        reduction: Reduction,
    ) -> HashMap<String, f64> {
        if batch.is_empty() {
            return HashMap::new();
        }

        let series = match self.client.get_trend_data(collector, batch, window).await {
            Ok(Some(series)) => series,
            Ok(None) => {
                debug!(collector, batch = batch.len(), "trend query returned no data");
                return HashMap::new();
            }
            Err(err) => {
                warn!(collector, %err, "trend query failed, treating batch as no data");
                return HashMap::new();
            }
        };

        series
            .records
            .iter()
            .map(|(key, samples)| {
                (
                    normalize_trend_key(key).to_string(),
                    reduce(samples, reduction),
                )
            })
            .collect()
    }
}
