use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NmsConfig;

use super::{
    CellValue, ElementId, ElementInfo, NmsClient, NmsError, ParameterLookup, TableFilter,
    TableSnapshot, TimeWindow, TrendSample, TrendSeries,
};

/// Trend interval type sent with every history request.
const TREND_INTERVAL: &str = "5min";

/// Trending kind sent with every history request.
const TREND_KIND: &str = "average";

/// HTTP-based NMS query client.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
}

impl Client {
    /// Create a new NMS client from connection configuration.
    pub fn new(cfg: &NmsConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// POST a JSON request body and deserialize the JSON response.
    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NmsError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            }
            .into());
        }

        response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))
    }
}

// --- JSON request/response structures ---

#[derive(Serialize)]
struct TableRequest {
    dma: i32,
    element: i32,
    table_id: u32,
    filters: Vec<String>,
}

#[derive(Deserialize)]
struct TableResponse {
    #[serde(default)]
    columns: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Serialize)]
struct ElementInfoRequest {
    dma: i32,
    element: i32,
}

#[derive(Deserialize)]
struct ElementInfoResponse {
    protocol: String,
}

#[derive(Serialize)]
struct TrendRequest {
    dma: i32,
    element: i32,
    parameters: Vec<TrendParameter>,
    start_time: i64,
    end_time: i64,
    interval: &'static str,
    kind: &'static str,
}

#[derive(Serialize)]
struct TrendParameter {
    id: u32,
    index: String,
}

#[derive(Deserialize)]
struct TrendResponse {
    #[serde(default)]
    records: Option<HashMap<String, Vec<WireSample>>>,
}

#[derive(Deserialize)]
struct WireSample {
    value: f64,
    status: i32,
}

/// Convert a wire cell into the tagged union, dropping unusable cells.
fn convert_cell(value: serde_json::Value) -> Option<CellValue> {
    match value {
        serde_json::Value::String(s) => Some(CellValue::Text(s)),
        serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number),
        _ => None,
    }
}

impl NmsClient for Client {
    async fn get_table(
        &self,
        target: &str,
        table_id: u32,
        filters: &[TableFilter],
    ) -> Result<Option<TableSnapshot>> {
        // A malformed target resolves to nothing, matching the soft
        // failure contract of the table service.
        let Ok(id) = ElementId::parse(target) else {
            return Ok(None);
        };

        debug!(target, table_id, "fetching table snapshot");

        let request = TableRequest {
            dma: id.dma,
            element: id.element,
            table_id,
            filters: filters.iter().map(TableFilter::render).collect(),
        };

        let resp: TableResponse = self
            .post_json("/api/v1/tables/query", &request)
            .await
            .context("fetching table")?;

        let Some(columns) = resp.columns else {
            return Ok(None);
        };

        let columns = columns
            .into_iter()
            .map(|col| col.into_iter().filter_map(convert_cell).collect())
            .collect();

        Ok(Some(TableSnapshot { columns }))
    }

    async fn get_element_info(&self, target: &str) -> Result<ElementInfo> {
        let id = ElementId::parse(target)?;

        debug!(target, "fetching element info");

        let resp: ElementInfoResponse = self
            .post_json(
                "/api/v1/elements/info",
                &ElementInfoRequest {
                    dma: id.dma,
                    element: id.element,
                },
            )
            .await
            .context("fetching element info")?;

        Ok(ElementInfo {
            protocol: resp.protocol,
        })
    }

    async fn get_trend_data(
        &self,
        target: &str,
        lookups: &[ParameterLookup],
        window: TimeWindow,
    ) -> Result<Option<TrendSeries>> {
        let Ok(id) = ElementId::parse(target) else {
            return Ok(None);
        };

        debug!(
            target,
            lookups = lookups.len(),
            start = %window.start,
            end = %window.end,
            "fetching trend data",
        );

        let request = TrendRequest {
            dma: id.dma,
            element: id.element,
            parameters: lookups
                .iter()
                .map(|l| TrendParameter {
                    id: l.parameter_id,
                    index: l.index.clone(),
                })
                .collect(),
            start_time: window.start.timestamp(),
            end_time: window.end.timestamp(),
            interval: TREND_INTERVAL,
            kind: TREND_KIND,
        };

        let resp: TrendResponse = self
            .post_json("/api/v1/trend/query", &request)
            .await
            .context("fetching trend data")?;

        let Some(records) = resp.records else {
            return Ok(None);
        };

        let records = records
            .into_iter()
            .map(|(key, samples)| {
                let samples = samples
                    .into_iter()
                    .map(|s| TrendSample {
                        value: s.value,
                        status: s.status,
                    })
                    .collect();
                (key, samples)
            })
            .collect();

        Ok(Some(TrendSeries { records }))
    }
}
