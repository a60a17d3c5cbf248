pub mod http;

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trend sample status code marking a sample as valid.
pub const VALID_SAMPLE_STATUS: i32 = 5;

/// Errors at the NMS query boundary.
#[derive(Debug, thiserror::Error)]
pub enum NmsError {
    /// Target is not a `<dma>/<element>` composite identifier.
    #[error("malformed element identifier {0:?}")]
    MalformedTarget(String),

    /// The NMS answered with a non-success HTTP status.
    #[error("unexpected status {status} from {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },
}

/// Composite element identifier of the form `<dma>/<element>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    pub dma: i32,
    pub element: i32,
}

impl ElementId {
    /// Parse a `<dma>/<element>` string. Anything else is malformed.
    pub fn parse(target: &str) -> Result<Self, NmsError> {
        let malformed = || NmsError::MalformedTarget(target.to_string());

        let (dma, element) = target.split_once('/').ok_or_else(malformed)?;
        let dma: i32 = dma.trim().parse().map_err(|_| malformed())?;
        let element: i32 = element.trim().parse().map_err(|_| malformed())?;

        Ok(Self { dma, element })
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dma, self.element)
    }
}

/// A table cell resolved to a known primitive at the snapshot boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    /// Cell as text; numbers render with their natural formatting.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }

    /// Cell as a number, parsing text cells when possible.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Text(s) => s.trim().parse().ok(),
            Self::Number(n) => Some(*n),
        }
    }
}

/// Column-major table snapshot returned by the table-query service.
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    pub columns: Vec<Vec<CellValue>>,
}

impl TableSnapshot {
    /// Number of rows, taken from the first (index) column.
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Cell at (column, row), if present.
    pub fn cell(&self, column: usize, row: usize) -> Option<&CellValue> {
        self.columns.get(column).and_then(|c| c.get(row))
    }
}

/// Filters understood by the table-query service.
#[derive(Debug, Clone)]
pub enum TableFilter {
    /// Request the full table regardless of server-side paging.
    ForceFullTable,
    /// Restrict the snapshot to the given column parameter ids.
    Columns(Vec<u32>),
    /// Boolean-OR equality filter over the index column.
    RowKeys { column: u32, keys: Vec<String> },
}

impl TableFilter {
    /// Render the filter in the service's keyword syntax.
    pub fn render(&self) -> String {
        match self {
            Self::ForceFullTable => "forceFullTable=true".to_string(),
            Self::Columns(ids) => {
                let ids: Vec<String> = ids.iter().map(u32::to_string).collect();
                format!("columns={}", ids.join(","))
            }
            Self::RowKeys { column, keys } => {
                let terms: Vec<String> =
                    keys.iter().map(|k| format!("{column}=={k}")).collect();
                format!("FULLFILTER=({})", terms.join(" OR "))
            }
        }
    }
}

/// Pairs a telemetry parameter id with a row key; the unit of batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLookup {
    pub parameter_id: u32,
    pub index: String,
}

impl ParameterLookup {
    pub fn new(parameter_id: u32, index: impl Into<String>) -> Self {
        Self {
            parameter_id,
            index: index.into(),
        }
    }
}

/// Half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One historical telemetry value with its validity status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSample {
    pub value: f64,
    pub status: i32,
}

impl TrendSample {
    pub fn is_valid(&self) -> bool {
        self.status == VALID_SAMPLE_STATUS
    }
}

/// Per-key sample sequences for one trend request.
#[derive(Debug, Clone, Default)]
pub struct TrendSeries {
    pub records: HashMap<String, Vec<TrendSample>>,
}

/// Element metadata from the one-shot lookup.
#[derive(Debug, Clone)]
pub struct ElementInfo {
    pub protocol: String,
}

/// Trend response keys arrive as `parameterId/rowKey` composites;
/// strip everything through the first `/`.
pub fn normalize_trend_key(key: &str) -> &str {
    key.split_once('/').map_or(key, |(_, rest)| rest)
}

/// Remote NMS query boundary.
///
/// All methods are suspension points; implementations own transport
/// timeouts. An `Ok(None)` table or trend result means the target
/// resolved to nothing, which callers treat as "no data".
pub trait NmsClient: Send + Sync {
    /// Fetch a column-major table snapshot for `target`.
    fn get_table(
        &self,
        target: &str,
        table_id: u32,
        filters: &[TableFilter],
    ) -> impl std::future::Future<Output = Result<Option<TableSnapshot>>> + Send;

    /// Resolve a collector's element metadata (protocol tag).
    fn get_element_info(
        &self,
        target: &str,
    ) -> impl std::future::Future<Output = Result<ElementInfo>> + Send;

    /// Issue one windowed trend query (5-minute average records).
    fn get_trend_data(
        &self,
        target: &str,
        lookups: &[ParameterLookup],
        window: TimeWindow,
    ) -> impl std::future::Future<Output = Result<Option<TrendSeries>>> + Send;
}
