use dashmap::DashMap;

use super::NO_DATA;

/// Rolled-up utilization record for one fiber node (or one row key,
/// for the peak metrics).
#[derive(Debug, Clone, PartialEq)]
pub struct FiberNodeOverview {
    pub key: String,
    pub fiber_node_name: String,
    pub peak: f64,
    pub low_split: f64,
    pub high_split: f64,
    pub low_split_plus_ofdma: f64,
}

impl FiberNodeOverview {
    fn new(key: &str, fiber_node_name: &str) -> Self {
        Self {
            key: key.to_string(),
            fiber_node_name: fiber_node_name.to_string(),
            peak: NO_DATA,
            low_split: NO_DATA,
            high_split: NO_DATA,
            low_split_plus_ofdma: NO_DATA,
        }
    }
}

/// Shared per-fiber-node rollup map.
///
/// Each merge entry point locks only its own map entry, so the map is
/// safe for concurrent writers. Order-independence holds for the peak
/// policy but not for the conjunctive split policy.
#[derive(Debug, Default)]
pub struct UtilizationRollup {
    nodes: DashMap<String, FiberNodeOverview>,
}

impl UtilizationRollup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peak observation: the latest write wins. Batches never overlap
    /// in keys, so within one collector this is insert-once.
    pub fn record_peak(&self, key: &str, fiber_node_name: &str, value: f64) {
        let mut entry = self
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| FiberNodeOverview::new(key, fiber_node_name));

        entry.peak = value;
    }

    /// Split observation for one sub-window. The stored pair is
    /// replaced only when the new low split strictly improves and the
    /// new high split does not regress.
    pub fn record_split(&self, key: &str, fiber_node_name: &str, low: f64, high: f64) {
        let mut entry = self
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| FiberNodeOverview::new(key, fiber_node_name));

        if low > entry.low_split && high >= entry.high_split {
            entry.low_split = low;
            entry.high_split = high;
        }
    }

    /// Combined low-split-plus-OFDMA observation; the stored value is
    /// monotone non-decreasing.
    pub fn record_combined(&self, key: &str, fiber_node_name: &str, combined: f64) {
        let mut entry = self
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| FiberNodeOverview::new(key, fiber_node_name));

        if combined >= entry.low_split_plus_ofdma {
            entry.low_split_plus_ofdma = combined;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Discard all accumulated records.
    pub fn clear(&self) {
        self.nodes.clear();
    }

    /// Remove and return all records, ordered by key so page content
    /// is deterministic.
    pub fn drain(&self) -> Vec<FiberNodeOverview> {
        let mut records: Vec<FiberNodeOverview> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.nodes.clear();

        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}

/// Display formatting for utilization values: the sentinel renders as
/// "N/A", everything else as two decimals with a percent suffix.
pub fn format_utilization(value: f64) -> String {
    if value == NO_DATA {
        "N/A".to_string()
    } else {
        format!("{value:.2} %")
    }
}
