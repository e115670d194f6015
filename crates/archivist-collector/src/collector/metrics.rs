//! Metric range queries against a Prometheus-compatible backend

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use super::{cancellable, Collector};
use crate::record::MetricRow;
use crate::stream::RecordSender;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NAMESPACE_PLACEHOLDER: &str = "{namespace}";

/// A named PromQL expression; `{namespace}` is replaced before querying
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricQuery {
    /// Output name, also the CSV file name
    pub name: &'static str,
    /// PromQL expression template
    pub expr: &'static str,
}

/// Persistent volume usage of the archived namespace
pub const VOLUME_QUERIES: &[MetricQuery] = &[
    MetricQuery {
        name: "volume_capacity_bytes",
        expr: r#"kubelet_volume_stats_capacity_bytes{namespace="{namespace}"}"#,
    },
    MetricQuery {
        name: "volume_used_bytes",
        expr: r#"kubelet_volume_stats_used_bytes{namespace="{namespace}"}"#,
    },
    MetricQuery {
        name: "volume_inodes_used",
        expr: r#"kubelet_volume_stats_inodes_used{namespace="{namespace}"}"#,
    },
];

/// Resource pressure of the nodes
pub const NODE_QUERIES: &[MetricQuery] = &[
    MetricQuery {
        name: "node_cpu_usage_ratio",
        expr: r#"1 - avg by (instance) (rate(node_cpu_seconds_total{mode="idle"}[5m]))"#,
    },
    MetricQuery {
        name: "node_memory_available_bytes",
        expr: "node_memory_MemAvailable_bytes",
    },
    MetricQuery {
        name: "node_memory_total_bytes",
        expr: "node_memory_MemTotal_bytes",
    },
    MetricQuery {
        name: "node_filesystem_available_bytes",
        expr: r#"node_filesystem_avail_bytes{mountpoint="/"}"#,
    },
];

/// One `[unix seconds, "value"]` pair of a range vector
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Sample(pub f64, pub String);

/// One series of a range query result
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Series {
    /// Series labels, including `__name__` when the backend reports it
    pub metric: BTreeMap<String, String>,
    /// Samples in ascending time order
    #[serde(default)]
    pub values: Vec<Sample>,
}

/// Range query access to a metrics backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Evaluate `query` over `[start, end]` at `step` resolution
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Series>>;
}

/// [`MetricsClient`] speaking the Prometheus HTTP API
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_with_context("metrics", e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<Series>,
}

fn parse_matrix(query: &str, response: QueryResponse) -> Result<Vec<Series>> {
    if response.status != "success" {
        return Err(Error::metrics(
            query,
            response.error.unwrap_or_else(|| response.status.clone()),
        ));
    }
    let data = response
        .data
        .ok_or_else(|| Error::metrics(query, "response carries no data"))?;
    if data.result_type != "matrix" {
        return Err(Error::metrics(
            query,
            format!("expected a matrix result, got {}", data.result_type),
        ));
    }
    Ok(data.result)
}

#[async_trait]
impl MetricsClient for PrometheusClient {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Series>> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
                ("step", format!("{}s", step.as_secs().max(1))),
            ])
            .send()
            .await
            .map_err(|e| Error::metrics(query, format!("request failed: {e}")))?;

        let status = response.status();
        // Prometheus reports query errors as JSON with a 4xx/5xx status
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::metrics(query, format!("{status}: {e}")))?;
        parse_matrix(query, body)
    }
}

/// Collects a fixed set of range queries as metric rows
pub struct MetricsCollector {
    domain: CollectorDomain,
    client: Arc<dyn MetricsClient>,
    queries: &'static [MetricQuery],
    step: Duration,
}

impl MetricsCollector {
    /// Create a collector for `domain` running `queries` at `step`
    pub fn new(
        domain: CollectorDomain,
        client: Arc<dyn MetricsClient>,
        queries: &'static [MetricQuery],
        step: Duration,
    ) -> Self {
        Self {
            domain,
            client,
            queries,
            step,
        }
    }
}

#[async_trait]
impl Collector for MetricsCollector {
    type Record = MetricRow;

    fn domain(&self) -> CollectorDomain {
        self.domain
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        window: Timeframe,
        out: &RecordSender<MetricRow>,
    ) -> Result<()> {
        for query in self.queries {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let expr = query.expr.replace(NAMESPACE_PLACEHOLDER, namespace);
            let request = self
                .client
                .query_range(&expr, window.start, window.end, self.step);
            let series = cancellable(cancel, request).await??;
            debug!(
                domain = %self.domain,
                metric = query.name,
                series = series.len(),
                "metric queried"
            );

            for s in series {
                let mut labels = s.metric;
                labels.remove("__name__");
                for Sample(at, value) in s.values {
                    let Some(timestamp) = sample_time(at) else {
                        continue;
                    };
                    out.send(
                        cancel,
                        MetricRow {
                            metric: query.name.to_string(),
                            labels: labels.clone(),
                            timestamp,
                            value,
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

fn sample_time(unix: f64) -> Option<DateTime<Utc>> {
    if !unix.is_finite() {
        return None;
    }
    let secs = unix.trunc() as i64;
    let nanos = ((unix - unix.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(secs, nanos.min(999_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::pipe;
    use chrono::TimeZone;

    fn window() -> Timeframe {
        Timeframe::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn matrix_response_is_parsed() {
        let body: QueryResponse = serde_json::from_value(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"__name__": "up", "instance": "node-1"},
                    "values": [[1704067200, "1"], [1704067260.5, "0"]]
                }]
            }
        }))
        .unwrap();

        let series = parse_matrix("up", body).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values[1], Sample(1704067260.5, "0".to_string()));
    }

    #[test]
    fn error_response_names_the_query() {
        let body: QueryResponse = serde_json::from_value(serde_json::json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error at char 4"
        }))
        .unwrap();

        let err = parse_matrix("up{", body).unwrap_err();
        assert!(matches!(err, Error::Metrics { .. }));
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn vector_result_is_rejected() {
        let body: QueryResponse = serde_json::from_value(serde_json::json!({
            "status": "success",
            "data": {"resultType": "vector", "result": []}
        }))
        .unwrap();
        assert!(parse_matrix("up", body).is_err());
    }

    #[test]
    fn sample_times_keep_subsecond_precision() {
        let at = sample_time(1704067260.5).unwrap();
        assert_eq!(at.timestamp(), 1704067260);
        assert_eq!(at.timestamp_subsec_millis(), 500);
        assert!(sample_time(f64::NAN).is_none());
    }

    #[tokio::test]
    async fn queries_are_templated_with_the_namespace() {
        let mut client = MockMetricsClient::new();
        client
            .expect_query_range()
            .withf(|query, _, _, step| {
                query == r#"kubelet_volume_stats_used_bytes{namespace="ecosystem"}"#
                    && *step == Duration::from_secs(300)
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(vec![Series {
                    metric: BTreeMap::from([
                        ("__name__".to_string(), "kubelet_volume_stats_used_bytes".to_string()),
                        ("persistentvolumeclaim".to_string(), "data-0".to_string()),
                    ]),
                    values: vec![
                        Sample(1704067200.0, "10".to_string()),
                        Sample(1704067500.0, "12".to_string()),
                    ],
                }])
            });

        static QUERIES: &[MetricQuery] = &[MetricQuery {
            name: "volume_used_bytes",
            expr: r#"kubelet_volume_stats_used_bytes{namespace="{namespace}"}"#,
        }];
        let collector = MetricsCollector::new(
            CollectorDomain::VolumeInfo,
            Arc::new(client),
            QUERIES,
            Duration::from_secs(300),
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = pipe();
        let producer = async {
            collector.collect(&cancel, "ecosystem", window(), &tx).await?;
            tx.finish(&cancel).await
        };
        let (produced, rows) = tokio::join!(producer, rx.collect(&cancel));
        produced.unwrap();
        let rows = rows.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric, "volume_used_bytes");
        assert_eq!(rows[0].labels_text(), "persistentvolumeclaim=data-0");
        assert_eq!(rows[1].value, "12");
    }

    #[tokio::test]
    async fn backend_failure_fails_the_domain() {
        let mut client = MockMetricsClient::new();
        client
            .expect_query_range()
            .returning(|q, _, _, _| Err(Error::metrics(q, "503 Service Unavailable")));

        let collector = MetricsCollector::new(
            CollectorDomain::NodeInfo,
            Arc::new(client),
            NODE_QUERIES,
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();
        let (tx, _rx) = pipe();
        let err = collector
            .collect(&cancel, "ecosystem", window(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Metrics { .. }));
    }
}
