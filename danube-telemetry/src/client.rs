//! Prometheus range-query client

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{QueryError, Result};
use crate::types::{Series, SeriesPoint};

/// Parameters of one range query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeQuery {
    pub query: String,
    pub namespace: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub step: Duration,
    pub timeout: Duration,
}

/// Source of range-query results. Implemented by [`MetricsClient`] and by test fakes.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn query_range(&self, request: &RangeQuery) -> std::result::Result<Vec<Series>, QueryError>;
}

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            timeout_ms: 60_000,
        }
    }
}

#[derive(Clone)]
pub struct MetricsClient {
    cfg: MetricsConfig,
    http: reqwest::Client,
}

impl MetricsClient {
    pub fn new(cfg: MetricsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self { cfg, http })
    }

    fn range_url(&self) -> String {
        format!("{}/api/v1/query_range", self.cfg.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MetricsBackend for MetricsClient {
    async fn query_range(&self, request: &RangeQuery) -> std::result::Result<Vec<Series>, QueryError> {
        let params = [
            ("query", request.query.clone()),
            ("namespace", request.namespace.clone()),
            ("start", format_seconds(request.start_ms)),
            ("end", format_seconds(request.end_ms)),
            ("step", format_seconds(request.step.as_millis() as i64)),
            ("timeout", format!("{}s", request.timeout.as_secs().max(1))),
        ];
        debug!(query = %request.query, start = request.start_ms, end = request.end_ms, "prometheus range query");

        let resp = self
            .http
            .get(self.range_url())
            .query(&params)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueryError::Timeout(request.timeout)
                } else {
                    QueryError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| QueryError::Request(e.to_string()))?;

        match serde_json::from_str::<PromResponse>(&body) {
            Ok(parsed) => parsed.into_series(),
            Err(_) if !status.is_success() => Err(QueryError::Backend {
                status: status.to_string(),
                message: body,
            }),
            Err(e) => Err(QueryError::Decode(e.to_string())),
        }
    }
}

/// Prometheus HTTP API envelope for matrix results.
#[derive(Debug, Deserialize)]
pub struct PromResponse {
    pub status: String,
    #[serde(default)]
    pub data: PromData,
    #[serde(rename = "errorType")]
    pub error_type: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PromData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<PromSeries>,
}

#[derive(Debug, Deserialize)]
pub struct PromSeries {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

impl PromResponse {
    /// Convert a matrix response into labelled series, or surface the backend's error.
    pub fn into_series(self) -> std::result::Result<Vec<Series>, QueryError> {
        if self.status != "success" {
            return Err(QueryError::Backend {
                status: self.error_type.unwrap_or(self.status),
                message: self.error.unwrap_or_default(),
            });
        }
        if !self.data.result_type.is_empty() && self.data.result_type != "matrix" {
            return Err(QueryError::Decode(format!(
                "expected a matrix result, got '{}'",
                self.data.result_type
            )));
        }

        Ok(self
            .data
            .result
            .into_iter()
            .map(|s| Series {
                points: to_points(&s.values),
                labels: s.metric,
            })
            .collect())
    }
}

fn to_points(values: &[(f64, String)]) -> Vec<SeriesPoint> {
    values
        .iter()
        .filter_map(|(ts, v)| v.parse::<f64>().ok().map(|vv| ((*ts * 1000.0) as i64, vv)))
        .collect()
}

fn format_seconds(ms: i64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.3}", ms as f64 / 1000.0)
    }
}
