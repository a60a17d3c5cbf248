use anyhow::Result;
use tracing::{debug, warn};

use crate::nms::{ElementId, NmsClient, TableFilter};

/// Protocol tags of CCAP platforms whose collectors carry per-channel
/// utilization history.
pub const PLATFORM_ALLOW_LIST: &[&str] = &["CISCO CBR-8 CCAP Platform", "Harmonic CableOs"];

/// Entity-table column offsets relative to the table id.
/// Column 0 of a snapshot is always the index column.
const COL_FIBER_NODE_ID: u32 = 2;
const COL_FIBER_NODE_NAME: u32 = 3;
const COL_CHANNEL_NAME: u32 = 4;
const COL_FREQUENCY: u32 = 5;

/// Offset of the index column, used for row-key filters.
const COL_INDEX: u32 = 1;

/// A collector element with its resolved protocol tag.
#[derive(Debug, Clone)]
pub struct Collector {
    pub id: String,
    pub protocol: String,
}

impl Collector {
    /// Whether this collector runs a recognized CCAP platform.
    pub fn is_recognized_platform(&self) -> bool {
        PLATFORM_ALLOW_LIST.contains(&self.protocol.as_str())
    }
}

/// One channel/service-group entry of a collector's entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub key: String,
    pub fiber_node_id: String,
    pub fiber_node_name: String,
    pub channel_name: String,
    pub frequency_mhz: f64,
}

/// Walks the front-end → collector → entity-table hierarchy.
///
/// Resolution fails softly throughout: malformed element identifiers
/// and absent tables yield empty results, never errors.
pub struct TopologyResolver<'a, C> {
    client: &'a C,
}

impl<'a, C: NmsClient> TopologyResolver<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Ordered collector ids from the first column of the front-end
    /// element's backend table.
    pub async fn collectors(&self, root: &str, backend_table_id: u32) -> Result<Vec<String>> {
        if root.is_empty() || ElementId::parse(root).is_err() {
            debug!(root, "front-end element does not resolve, skipping");
            return Ok(Vec::new());
        }

        let snapshot = self
            .client
            .get_table(root, backend_table_id, &[TableFilter::ForceFullTable])
            .await?;

        let Some(snapshot) = snapshot else {
            return Ok(Vec::new());
        };

        let ids = snapshot
            .columns
            .first()
            .map(|index| index.iter().map(|cell| cell.as_text()).collect())
            .unwrap_or_default();

        Ok(ids)
    }

    /// Resolve a collector's protocol tag via the one-shot metadata
    /// lookup. Lookup failures degrade to `None`.
    pub async fn collector(&self, id: &str) -> Option<Collector> {
        match self.client.get_element_info(id).await {
            Ok(info) => Some(Collector {
                id: id.to_string(),
                protocol: info.protocol,
            }),
            Err(err) => {
                warn!(collector = id, %err, "element metadata lookup failed");
                None
            }
        }
    }

    /// Entity rows of a collector's entity table, optionally filtered
    /// to an explicit set of row keys.
    pub async fn entity_rows(
        &self,
        collector: &str,
        entity_table_id: u32,
        row_keys: Option<&[String]>,
    ) -> Result<Vec<EntityRow>> {
        let mut filters = vec![
            TableFilter::ForceFullTable,
            TableFilter::Columns(vec![
                entity_table_id + COL_FIBER_NODE_ID,
                entity_table_id + COL_FIBER_NODE_NAME,
                entity_table_id + COL_CHANNEL_NAME,
                entity_table_id + COL_FREQUENCY,
            ]),
        ];

        if let Some(keys) = row_keys {
            filters.push(TableFilter::RowKeys {
                column: entity_table_id + COL_INDEX,
                keys: keys.to_vec(),
            });
        }

        let snapshot = self
            .client
            .get_table(collector, entity_table_id, &filters)
            .await?;

        let Some(snapshot) = snapshot else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::with_capacity(snapshot.row_count());

        for row in 0..snapshot.row_count() {
            let Some(key) = snapshot.cell(0, row) else {
                continue;
            };

            rows.push(EntityRow {
                key: key.as_text(),
                fiber_node_id: snapshot.cell(1, row).map(|c| c.as_text()).unwrap_or_default(),
                fiber_node_name: snapshot
                    .cell(2, row)
                    .map(|c| c.as_text())
                    .unwrap_or_default(),
                channel_name: snapshot.cell(3, row).map(|c| c.as_text()).unwrap_or_default(),
                frequency_mhz: snapshot
                    .cell(4, row)
                    .and_then(|c| c.as_number())
                    .unwrap_or(0.0),
            });
        }

        Ok(rows)
    }
}
