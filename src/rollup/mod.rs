pub mod batch;
pub mod overview;
pub mod trend;
pub mod window;

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use crate::config::QueryConfig;
use crate::nms::{NmsClient, TimeWindow};
use crate::topology::{EntityRow, TopologyResolver};

use self::batch::partition_lookups;
use self::overview::UtilizationRollup;
use self::trend::{Reduction, TrendAggregator};
use self::window::hourly_windows;

/// Sentinel utilization value meaning "no valid data". Never a real
/// measurement; rendered as "N/A".
pub const NO_DATA: f64 = -1.0;

/// Frequency threshold partitioning channels into low/high split.
pub const SPLIT_THRESHOLD_MHZ: f64 = 65.0;

/// Requested metric, selecting reduction policy, windowing strategy,
/// and output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Maximum utilization per row key over the full range.
    Peak,
    /// Average of the three largest samples per row key ("peak sustained").
    PeakTop3,
    /// Hourly low/high split utilization per fiber node.
    Split,
    /// Split plus the combined low-split + OFDMA figure.
    SplitOfdma,
}

impl Metric {
    /// Sample reduction applied per key and window.
    pub fn reduction(self) -> Reduction {
        match self {
            Self::Peak => Reduction::Max,
            Self::PeakTop3 => Reduction::Top3Average,
            Self::Split | Self::SplitOfdma => Reduction::Average,
        }
    }

    /// Whether the range is processed as hourly sub-windows rather
    /// than one full-range request.
    pub fn is_windowed(self) -> bool {
        matches!(self, Self::Split | Self::SplitOfdma)
    }

    /// Whether collectors must run a recognized CCAP platform to
    /// participate. Plain split runs across all collectors.
    pub fn platform_bound(self) -> bool {
        matches!(self, Self::Peak | Self::PeakTop3 | Self::SplitOfdma)
    }

    /// Utilization column headers of the output schema.
    pub fn value_columns(self) -> &'static [&'static str] {
        match self {
            Self::Peak | Self::PeakTop3 => &["Peak Utilization"],
            Self::Split => &["Low Split Utilization", "High Split Utilization"],
            Self::SplitOfdma => &[
                "Low Split Utilization",
                "High Split Utilization",
                "Low Split + OFDMA Utilization",
            ],
        }
    }
}

/// Runs one collector slice through resolve → partition → aggregate →
/// merge, feeding the shared rollup map.
pub struct RollupPipeline<'a, C> {
    client: &'a C,
    query: &'a QueryConfig,
    range: TimeWindow,
}

impl<'a, C: NmsClient> RollupPipeline<'a, C> {
    pub fn new(client: &'a C, query: &'a QueryConfig, range: TimeWindow) -> Self {
        Self {
            client,
            query,
            range,
        }
    }

    /// Process one collector (or the given backlog slice of its row
    /// keys) into `rollup`.
    pub async fn process_collector(
        &self,
        collector_id: &str,
        row_keys: Option<&[String]>,
        rollup: &UtilizationRollup,
    ) -> Result<()> {
        if self.query.metric.platform_bound() {
            let Some(collector) = TopologyResolver::new(self.client).collector(collector_id).await
            else {
                return Ok(());
            };

            if !collector.is_recognized_platform() {
                debug!(
                    collector = collector_id,
                    protocol = collector.protocol,
                    "collector platform not recognized, skipping",
                );
                return Ok(());
            }
        }

        let rows = TopologyResolver::new(self.client)
            .entity_rows(collector_id, self.query.entity_table_id, row_keys)
            .await?;

        if rows.is_empty() {
            debug!(collector = collector_id, "no entity rows, skipping");
            return Ok(());
        }

        if self.query.metric.is_windowed() {
            self.process_windowed(collector_id, &rows, rollup).await;
        } else {
            self.process_full_range(collector_id, &rows, rollup).await;
        }

        Ok(())
    }

    /// Peak metrics: one request per batch over the whole range, one
    /// record per row key.
    async fn process_full_range(
        &self,
        collector_id: &str,
        rows: &[EntityRow],
        rollup: &UtilizationRollup,
    ) {
        let aggregator = TrendAggregator::new(self.client);
        let reduction = self.query.metric.reduction();

        let by_key: HashMap<&str, &EntityRow> =
            rows.iter().map(|row| (row.key.as_str(), row)).collect();
        let keys: Vec<&str> = rows.iter().map(|row| row.key.as_str()).collect();

        for batch in partition_lookups(self.query.parameter_id, &keys) {
            let values = aggregator
                .batch_values(collector_id, &batch, self.range, reduction)
                .await;

            for lookup in &batch {
                let (Some(row), Some(&value)) =
                    (by_key.get(lookup.index.as_str()), values.get(&lookup.index))
                else {
                    continue;
                };

                rollup.record_peak(&row.key, &row.fiber_node_name, value);
            }
        }
    }

    /// Split metrics: hourly sub-windows, each merged into the rollup
    /// immediately rather than buffered.
    async fn process_windowed(
        &self,
        collector_id: &str,
        rows: &[EntityRow],
        rollup: &UtilizationRollup,
    ) {
        let aggregator = TrendAggregator::new(self.client);

        let keys: Vec<&str> = rows.iter().map(|row| row.key.as_str()).collect();
        let nodes = group_by_fiber_node(rows);
        let node_ids: Vec<&str> = nodes.keys().copied().collect();

        for window in hourly_windows(self.range) {
            let mut values = HashMap::new();
            for batch in partition_lookups(self.query.parameter_id, &keys) {
                values.extend(
                    aggregator
                        .batch_values(collector_id, &batch, window, Reduction::Average)
                        .await,
                );
            }

            let ofdma = match self.query.ofdma_parameter_id {
                Some(parameter_id) if self.query.metric == Metric::SplitOfdma => {
                    let mut ofdma = HashMap::new();
                    for batch in partition_lookups(parameter_id, &node_ids) {
                        ofdma.extend(
                            aggregator
                                .batch_values(collector_id, &batch, window, Reduction::Average)
                                .await,
                        );
                    }
                    ofdma
                }
                _ => HashMap::new(),
            };

            for (node_id, channels) in &nodes {
                let name = &channels[0].fiber_node_name;
                let (low, high) = split_averages(channels, &values);

                rollup.record_split(node_id, name, low, high);

                if self.query.metric == Metric::SplitOfdma {
                    let ofdma = ofdma.get(*node_id).copied().unwrap_or(NO_DATA);
                    let combined = combine_low_split_ofdma(low, high, ofdma);
                    rollup.record_combined(node_id, name, combined);
                }
            }
        }
    }
}

/// Group entity rows by fiber node id, in key order.
fn group_by_fiber_node(rows: &[EntityRow]) -> BTreeMap<&str, Vec<&EntityRow>> {
    let mut nodes: BTreeMap<&str, Vec<&EntityRow>> = BTreeMap::new();
    for row in rows {
        nodes.entry(row.fiber_node_id.as_str()).or_default().push(row);
    }
    nodes
}

/// Average a fiber node's channel values on each side of the split
/// threshold. Channels without a valid value contribute nothing; an
/// empty side yields the sentinel.
fn split_averages(channels: &[&EntityRow], values: &HashMap<String, f64>) -> (f64, f64) {
    let mut low = Vec::new();
    let mut high = Vec::new();

    for channel in channels {
        let Some(&value) = values.get(&channel.key) else {
            continue;
        };
        if value == NO_DATA {
            continue;
        }

        if channel.frequency_mhz < SPLIT_THRESHOLD_MHZ {
            low.push(value);
        } else {
            high.push(value);
        }
    }

    (mean_or_sentinel(&low), mean_or_sentinel(&high))
}

fn mean_or_sentinel(values: &[f64]) -> f64 {
    if values.is_empty() {
        NO_DATA
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Combine a window's low split with its OFDMA figure. A valid
/// high-split observation in the same window invalidates the
/// combination.
fn combine_low_split_ofdma(low: f64, high: f64, ofdma: f64) -> f64 {
    if low != NO_DATA && ofdma != NO_DATA && high == NO_DATA {
        low + ofdma
    } else {
        NO_DATA
    }
}
