use std::collections::VecDeque;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::nms::{NmsClient, TimeWindow};
use crate::rollup::overview::{format_utilization, FiberNodeOverview, UtilizationRollup};
use crate::rollup::{Metric, RollupPipeline};
use crate::topology::TopologyResolver;

/// Upper bound on backlog row keys processed per page.
pub const BACKLOG_PAGE_SIZE: usize = 10;

/// Unit of work consumed per emitted page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageGranularity {
    /// One whole collector per page.
    #[default]
    Collector,
    /// Up to [`BACKLOG_PAGE_SIZE`] row keys of the current collector
    /// per page.
    Backlog,
}

/// One output row of the paginated table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub id: String,
    pub fiber_node: String,
    /// Utilization values in the order of `Metric::value_columns`.
    pub values: Vec<f64>,
}

impl OutputRow {
    /// Display strings for the utilization values.
    pub fn display_values(&self) -> Vec<String> {
        self.values.iter().copied().map(format_utilization).collect()
    }
}

/// An ordered slice of output rows plus the continuation flag.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<OutputRow>,
    pub has_next: bool,
}

impl Page {
    fn terminal() -> Self {
        Self {
            rows: Vec::new(),
            has_next: false,
        }
    }
}

/// Backlog state of the collector currently being paged through.
#[derive(Debug)]
struct CurrentCollector {
    id: String,
    backlog: VecDeque<String>,
}

/// Explicit cursor over the remaining pagination work, consumed
/// monotonically by [`QueryEngine::next_page`].
#[derive(Debug)]
pub struct PageCursor {
    pending: VecDeque<String>,
    current: Option<CurrentCollector>,
    granularity: PageGranularity,
}

impl PageCursor {
    fn new(collectors: Vec<String>, granularity: PageGranularity) -> Self {
        Self {
            pending: collectors.into(),
            current: None,
            granularity,
        }
    }

    /// Whether all collectors and backlog entries have been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    /// Drop all remaining work, ending pagination.
    fn exhaust(&mut self) {
        self.pending.clear();
        self.current = None;
    }
}

/// Drives the rollup pipeline one page at a time.
pub struct QueryEngine<C> {
    client: C,
    query: QueryConfig,
    range: TimeWindow,
    rollup: UtilizationRollup,
}

impl<C: NmsClient> QueryEngine<C> {
    pub fn new(client: C, query: QueryConfig, range: TimeWindow) -> Self {
        Self {
            client,
            query,
            range,
            rollup: UtilizationRollup::new(),
        }
    }

    /// Resolve the collector set and open a cursor over it. Resolution
    /// failures degrade to an already-exhausted cursor.
    pub async fn cursor(&self) -> PageCursor {
        let resolver = TopologyResolver::new(&self.client);

        let collectors = match resolver
            .collectors(&self.query.front_end_element, self.query.backend_table_id)
            .await
        {
            Ok(collectors) => collectors,
            Err(err) => {
                warn!(%err, "collector resolution failed, nothing to page");
                Vec::new()
            }
        };

        debug!(collectors = collectors.len(), "opened page cursor");

        PageCursor::new(collectors, self.query.page)
    }

    /// Produce the next page, consuming one unit of work from the
    /// cursor. Failures emit whatever rows were already rolled up and
    /// terminate pagination.
    pub async fn next_page(&self, cursor: &mut PageCursor) -> Page {
        // Pages never repeat rows.
        self.rollup.clear();

        if cursor.is_exhausted() {
            return Page::terminal();
        }

        let result = match cursor.granularity {
            PageGranularity::Collector => self.process_next_collector(cursor).await,
            PageGranularity::Backlog => self.process_next_backlog_slice(cursor).await,
        };

        let rows = self.emit_rows();

        match result {
            Ok(()) => Page {
                rows,
                has_next: !cursor.is_exhausted(),
            },
            Err(err) => {
                warn!(%err, "page processing failed, terminating pagination");
                cursor.exhaust();
                Page {
                    rows,
                    has_next: false,
                }
            }
        }
    }

    /// Collector granularity: one whole collector per page.
    async fn process_next_collector(&self, cursor: &mut PageCursor) -> Result<()> {
        let Some(collector) = cursor.pending.pop_front() else {
            return Ok(());
        };

        self.pipeline()
            .process_collector(&collector, None, &self.rollup)
            .await
    }

    /// Backlog granularity: load the next collector's row keys when
    /// needed, then process up to [`BACKLOG_PAGE_SIZE`] of them.
    async fn process_next_backlog_slice(&self, cursor: &mut PageCursor) -> Result<()> {
        if cursor.current.is_none() {
            let Some(id) = cursor.pending.pop_front() else {
                return Ok(());
            };

            let keys = TopologyResolver::new(&self.client)
                .entity_rows(&id, self.query.entity_table_id, None)
                .await?
                .into_iter()
                .map(|row| row.key)
                .collect();

            cursor.current = Some(CurrentCollector { id, backlog: keys });
        }

        let Some(current) = cursor.current.as_mut() else {
            return Ok(());
        };
        let take = current.backlog.len().min(BACKLOG_PAGE_SIZE);
        let slice: Vec<String> = current.backlog.drain(..take).collect();
        let id = current.id.clone();

        if current.backlog.is_empty() {
            cursor.current = None;
        }

        if slice.is_empty() {
            return Ok(());
        }

        self.pipeline()
            .process_collector(&id, Some(&slice), &self.rollup)
            .await
    }

    fn pipeline(&self) -> RollupPipeline<'_, C> {
        RollupPipeline::new(&self.client, &self.query, self.range)
    }

    /// Drain the rollup into output rows shaped by the metric.
    fn emit_rows(&self) -> Vec<OutputRow> {
        self.rollup
            .drain()
            .into_iter()
            .map(|record| output_row(&record, self.query.metric))
            .collect()
    }
}

fn output_row(record: &FiberNodeOverview, metric: Metric) -> OutputRow {
    let values = match metric {
        Metric::Peak | Metric::PeakTop3 => vec![record.peak],
        Metric::Split => vec![record.low_split, record.high_split],
        Metric::SplitOfdma => vec![
            record.low_split,
            record.high_split,
            record.low_split_plus_ofdma,
        ],
    };

    OutputRow {
        id: record.key.clone(),
        fiber_node: record.fiber_node_name.clone(),
        values,
    }
}
