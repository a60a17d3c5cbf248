use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{TimeZone, Utc};

use fiberwatch::config::QueryConfig;
use fiberwatch::nms::{
    CellValue, ElementInfo, NmsClient, ParameterLookup, TableFilter, TableSnapshot, TimeWindow,
    TrendSample, TrendSeries, VALID_SAMPLE_STATUS,
};
use fiberwatch::page::{PageGranularity, QueryEngine};
use fiberwatch::rollup::{Metric, NO_DATA};

const BACKEND_TABLE: u32 = 1_200_500;
const ENTITY_TABLE: u32 = 1_200_600;
const UTIL_PARAM: u32 = 1_100_021;
const OFDMA_PARAM: u32 = 1_100_050;

const CISCO: &str = "CISCO CBR-8 CCAP Platform";

/// Fixture NMS serving canned tables, protocols, and trend samples.
#[derive(Default)]
struct MockNms {
    tables: HashMap<(String, u32), TableSnapshot>,
    protocols: HashMap<String, String>,
    /// (collector, parameter id, row key) -> samples.
    samples: HashMap<(String, u32, String), Vec<TrendSample>>,
    /// Entity-table queries against this collector fail outright.
    fail_entity_table_for: Option<String>,
}

impl MockNms {
    fn with_backend(mut self, root: &str, collectors: &[&str]) -> Self {
        let column = collectors
            .iter()
            .map(|id| CellValue::Text((*id).into()))
            .collect();
        self.tables.insert(
            (root.to_string(), BACKEND_TABLE),
            TableSnapshot {
                columns: vec![column],
            },
        );
        self
    }

    /// Entity rows as (key, fiber node id, fiber node name, channel, frequency).
    fn with_entities(mut self, collector: &str, rows: &[(&str, &str, &str, &str, f64)]) -> Self {
        let mut columns: Vec<Vec<CellValue>> = vec![Vec::new(); 5];
        for (key, node_id, node_name, channel, frequency) in rows {
            columns[0].push(CellValue::Text((*key).into()));
            columns[1].push(CellValue::Text((*node_id).into()));
            columns[2].push(CellValue::Text((*node_name).into()));
            columns[3].push(CellValue::Text((*channel).into()));
            columns[4].push(CellValue::Number(*frequency));
        }
        self.tables
            .insert((collector.to_string(), ENTITY_TABLE), TableSnapshot { columns });
        self
    }

    fn with_protocol(mut self, collector: &str, protocol: &str) -> Self {
        self.protocols
            .insert(collector.to_string(), protocol.to_string());
        self
    }

    fn with_samples(
        mut self,
        collector: &str,
        parameter_id: u32,
        key: &str,
        samples: Vec<TrendSample>,
    ) -> Self {
        self.samples
            .insert((collector.to_string(), parameter_id, key.to_string()), samples);
        self
    }
}

impl NmsClient for MockNms {
    async fn get_table(
        &self,
        target: &str,
        table_id: u32,
        filters: &[TableFilter],
    ) -> Result<Option<TableSnapshot>> {
        if table_id == ENTITY_TABLE && self.fail_entity_table_for.as_deref() == Some(target) {
            anyhow::bail!("table service unavailable for {target}");
        }

        let Some(snapshot) = self.tables.get(&(target.to_string(), table_id)) else {
            return Ok(None);
        };

        // Honor row-key filters the way the table service would.
        let keys: Option<HashSet<&str>> = filters.iter().find_map(|f| match f {
            TableFilter::RowKeys { keys, .. } => {
                Some(keys.iter().map(String::as_str).collect())
            }
            _ => None,
        });

        let Some(keys) = keys else {
            return Ok(Some(snapshot.clone()));
        };

        let index = &snapshot.columns[0];
        let selected: Vec<usize> = (0..index.len())
            .filter(|&row| keys.contains(index[row].as_text().as_str()))
            .collect();

        let columns = snapshot
            .columns
            .iter()
            .map(|col| selected.iter().map(|&row| col[row].clone()).collect())
            .collect();

        Ok(Some(TableSnapshot { columns }))
    }

    async fn get_element_info(&self, target: &str) -> Result<ElementInfo> {
        self.protocols
            .get(target)
            .map(|protocol| ElementInfo {
                protocol: protocol.clone(),
            })
            .ok_or_else(|| anyhow::anyhow!("unknown element {target}"))
    }

    async fn get_trend_data(
        &self,
        target: &str,
        lookups: &[ParameterLookup],
        _window: TimeWindow,
    ) -> Result<Option<TrendSeries>> {
        let mut records = HashMap::new();

        for lookup in lookups {
            let entry = (target.to_string(), lookup.parameter_id, lookup.index.clone());
            if let Some(samples) = self.samples.get(&entry) {
                records.insert(
                    format!("{}/{}", lookup.parameter_id, lookup.index),
                    samples.clone(),
                );
            }
        }

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(TrendSeries { records }))
    }
}

fn valid(values: &[f64]) -> Vec<TrendSample> {
    values
        .iter()
        .map(|&value| TrendSample {
            value,
            status: VALID_SAMPLE_STATUS,
        })
        .collect()
}

fn invalid(values: &[f64]) -> Vec<TrendSample> {
    values
        .iter()
        .map(|&value| TrendSample { value, status: 0 })
        .collect()
}

fn query(metric: Metric, page: PageGranularity) -> QueryConfig {
    QueryConfig {
        front_end_element: "100/1".to_string(),
        parameter_id: UTIL_PARAM,
        ofdma_parameter_id: Some(OFDMA_PARAM),
        backend_table_id: BACKEND_TABLE,
        entity_table_id: ENTITY_TABLE,
        metric,
        initial_time: None,
        final_time: None,
        page,
    }
}

/// One-hour range so split metrics run exactly one sub-window.
fn one_hour() -> TimeWindow {
    TimeWindow {
        start: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2024, 4, 1, 1, 0, 0).unwrap(),
    }
}

/// Drain all pages, asserting the loop terminates.
async fn collect_pages<C: NmsClient>(engine: &QueryEngine<C>) -> Vec<fiberwatch::page::Page> {
    let mut cursor = engine.cursor().await;
    let mut pages = Vec::new();

    for _ in 0..32 {
        let page = engine.next_page(&mut cursor).await;
        let done = !page.has_next;
        pages.push(page);
        if done {
            return pages;
        }
    }

    panic!("pagination did not terminate");
}

#[tokio::test]
async fn test_scenario_top3_average_over_range() {
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1"])
        .with_protocol("200/1", CISCO)
        .with_entities("200/1", &[("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0)])
        .with_samples("200/1", UTIL_PARAM, "sg-1", valid(&[10.0, 20.0, 30.0, 40.0, 5.0]));

    let engine = QueryEngine::new(nms, query(Metric::PeakTop3, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    let rows: Vec<_> = pages.iter().flat_map(|p| p.rows.iter()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "sg-1");
    assert_eq!(rows[0].fiber_node, "Fiber Node A");
    // Top three of [10, 20, 30, 40, 5] average to 30.
    assert_eq!(rows[0].values, vec![30.0]);
    assert_eq!(rows[0].display_values(), vec!["30.00 %"]);
}

#[tokio::test]
async fn test_scenario_no_valid_samples_renders_na() {
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1"])
        .with_protocol("200/1", CISCO)
        .with_entities("200/1", &[("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0)])
        .with_samples("200/1", UTIL_PARAM, "sg-1", invalid(&[50.0, 60.0]));

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    let rows: Vec<_> = pages.iter().flat_map(|p| p.rows.iter()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values, vec![NO_DATA]);
    assert_eq!(rows[0].display_values(), vec!["N/A"]);
}

#[tokio::test]
async fn test_scenario_split_by_frequency() {
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1"])
        .with_entities(
            "200/1",
            &[
                ("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0),
                ("sg-2", "fn-a", "Fiber Node A", "ch-2", 70.0),
            ],
        )
        .with_samples("200/1", UTIL_PARAM, "sg-1", valid(&[20.0]))
        .with_samples("200/1", UTIL_PARAM, "sg-2", valid(&[80.0]));

    let engine = QueryEngine::new(nms, query(Metric::Split, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    let rows: Vec<_> = pages.iter().flat_map(|p| p.rows.iter()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "fn-a");
    assert_eq!(rows[0].values, vec![20.0, 80.0]);
}

#[tokio::test]
async fn test_scenario_malformed_root_yields_empty_result() {
    let nms = MockNms::default();
    let mut q = query(Metric::Peak, PageGranularity::Collector);
    q.front_end_element = "abc".to_string();

    let engine = QueryEngine::new(nms, q, one_hour());
    let pages = collect_pages(&engine).await;

    assert_eq!(pages.len(), 1);
    assert!(pages[0].rows.is_empty());
    assert!(!pages[0].has_next);
}

#[tokio::test]
async fn test_split_ofdma_combination() {
    // fn-a: single low-split channel plus OFDMA -> combined.
    // fn-b: carries a high-split channel -> combination invalidated.
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1"])
        .with_protocol("200/1", CISCO)
        .with_entities(
            "200/1",
            &[
                ("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0),
                ("sg-2", "fn-b", "Fiber Node B", "ch-2", 40.0),
                ("sg-3", "fn-b", "Fiber Node B", "ch-3", 70.0),
            ],
        )
        .with_samples("200/1", UTIL_PARAM, "sg-1", valid(&[20.0]))
        .with_samples("200/1", UTIL_PARAM, "sg-2", valid(&[30.0]))
        .with_samples("200/1", UTIL_PARAM, "sg-3", valid(&[90.0]))
        .with_samples("200/1", OFDMA_PARAM, "fn-a", valid(&[15.0]))
        .with_samples("200/1", OFDMA_PARAM, "fn-b", valid(&[15.0]));

    let engine = QueryEngine::new(
        nms,
        query(Metric::SplitOfdma, PageGranularity::Collector),
        one_hour(),
    );
    let pages = collect_pages(&engine).await;

    let rows: Vec<_> = pages.iter().flat_map(|p| p.rows.iter()).collect();
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].id, "fn-a");
    assert_eq!(rows[0].values, vec![20.0, NO_DATA, 35.0]);
    assert_eq!(rows[0].display_values(), vec!["20.00 %", "N/A", "35.00 %"]);

    assert_eq!(rows[1].id, "fn-b");
    assert_eq!(rows[1].values, vec![30.0, 90.0, NO_DATA]);
}

#[tokio::test]
async fn test_pagination_one_collector_per_page_no_duplicates() {
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1", "200/2"])
        .with_protocol("200/1", CISCO)
        .with_protocol("200/2", CISCO)
        .with_entities("200/1", &[("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0)])
        .with_entities("200/2", &[("sg-2", "fn-b", "Fiber Node B", "ch-2", 40.0)])
        .with_samples("200/1", UTIL_PARAM, "sg-1", valid(&[10.0]))
        .with_samples("200/2", UTIL_PARAM, "sg-2", valid(&[20.0]));

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].rows.len(), 1);
    assert!(pages[0].has_next);
    assert_eq!(pages[1].rows.len(), 1);
    assert!(!pages[1].has_next);

    let keys: Vec<&str> = pages
        .iter()
        .flat_map(|p| p.rows.iter().map(|r| r.id.as_str()))
        .collect();
    let unique: HashSet<&str> = keys.iter().copied().collect();
    assert_eq!(keys.len(), unique.len(), "pages must not repeat rows");
}

#[tokio::test]
async fn test_pagination_backlog_slices_are_bounded() {
    let rows: Vec<(String, String)> = (0..25)
        .map(|i| (format!("sg-{i:02}"), format!("fn-{i:02}")))
        .collect();

    let mut nms = MockNms::default()
        .with_backend("100/1", &["200/1"])
        .with_protocol("200/1", CISCO);

    let entities: Vec<(&str, &str, &str, &str, f64)> = rows
        .iter()
        .map(|(key, node)| (key.as_str(), node.as_str(), node.as_str(), "ch", 40.0))
        .collect();
    nms = nms.with_entities("200/1", &entities);

    for (key, _) in &rows {
        nms = nms.with_samples("200/1", UTIL_PARAM, key, valid(&[5.0]));
    }

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Backlog), one_hour());
    let pages = collect_pages(&engine).await;

    // 25 backlog entries in slices of at most 10.
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].rows.len(), 10);
    assert_eq!(pages[1].rows.len(), 10);
    assert_eq!(pages[2].rows.len(), 5);
    assert!(!pages[2].has_next);

    let keys: Vec<&str> = pages
        .iter()
        .flat_map(|p| p.rows.iter().map(|r| r.id.as_str()))
        .collect();
    let unique: HashSet<&str> = keys.iter().copied().collect();
    assert_eq!(unique.len(), 25);
}

#[tokio::test]
async fn test_failure_mid_page_terminates_pagination() {
    let mut nms = MockNms::default()
        .with_backend("100/1", &["200/1", "200/2"])
        .with_protocol("200/1", CISCO)
        .with_protocol("200/2", CISCO)
        .with_entities("200/2", &[("sg-2", "fn-b", "Fiber Node B", "ch-2", 40.0)]);
    nms.fail_entity_table_for = Some("200/1".to_string());

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    // The failing collector's page is emitted (empty) and pagination
    // stops; the second collector is never processed.
    assert_eq!(pages.len(), 1);
    assert!(pages[0].rows.is_empty());
    assert!(!pages[0].has_next);
}

#[tokio::test]
async fn test_unrecognized_platform_excluded_for_peak() {
    let nms = MockNms::default()
        .with_backend("100/1", &["200/1", "200/2"])
        .with_protocol("200/1", CISCO)
        .with_protocol("200/2", "Legacy CMTS")
        .with_entities("200/1", &[("sg-1", "fn-a", "Fiber Node A", "ch-1", 40.0)])
        .with_entities("200/2", &[("sg-2", "fn-b", "Fiber Node B", "ch-2", 40.0)])
        .with_samples("200/1", UTIL_PARAM, "sg-1", valid(&[10.0]))
        .with_samples("200/2", UTIL_PARAM, "sg-2", valid(&[20.0]));

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    let keys: Vec<&str> = pages
        .iter()
        .flat_map(|p| p.rows.iter().map(|r| r.id.as_str()))
        .collect();
    assert_eq!(keys, vec!["sg-1"]);
}

#[tokio::test]
async fn test_split_processes_all_platforms() {
    // Plain split is not platform bound; the legacy CMTS participates.
    let nms = MockNms::default()
        .with_backend("100/1", &["200/2"])
        .with_protocol("200/2", "Legacy CMTS")
        .with_entities("200/2", &[("sg-2", "fn-b", "Fiber Node B", "ch-2", 40.0)])
        .with_samples("200/2", UTIL_PARAM, "sg-2", valid(&[20.0]));

    let engine = QueryEngine::new(nms, query(Metric::Split, PageGranularity::Collector), one_hour());
    let pages = collect_pages(&engine).await;

    let rows: Vec<_> = pages.iter().flat_map(|p| p.rows.iter()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "fn-b");
    assert_eq!(rows[0].values, vec![20.0, NO_DATA]);
}

#[tokio::test]
async fn test_exhausted_cursor_keeps_returning_empty_pages() {
    let nms = MockNms::default().with_backend("100/1", &[]);

    let engine = QueryEngine::new(nms, query(Metric::Peak, PageGranularity::Collector), one_hour());
    let mut cursor = engine.cursor().await;

    for _ in 0..3 {
        let page = engine.next_page(&mut cursor).await;
        assert!(page.rows.is_empty());
        assert!(!page.has_next);
    }
}
