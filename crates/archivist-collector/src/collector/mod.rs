//! Producers of domain records
//!
//! A collector only emits records. Ending the stream is the caller's job:
//! [`DomainPair`](crate::DomainPair) owns the sender, finishes it when
//! `collect` returns `Ok` and drops it on every other exit path, so a failing
//! collector can never leave its consumer waiting.

mod events;
mod logs;
mod metrics;
mod secret;
mod state;

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use crate::record::StreamRecord;
use crate::stream::RecordSender;

pub use events::EventCollector;
pub use logs::LogCollector;
pub use metrics::{
    MetricQuery, MetricsClient, MetricsCollector, PrometheusClient, Sample, Series,
    NODE_QUERIES, VOLUME_QUERIES,
};
#[cfg(test)]
pub use metrics::MockMetricsClient;
pub use secret::SecretCollector;
pub use state::SystemStateCollector;

/// Data source of one collector domain
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Record type this collector emits
    type Record: StreamRecord;

    /// Domain this collector serves
    fn domain(&self) -> CollectorDomain;

    /// Emit every record of `namespace` within `window`
    ///
    /// Must return promptly once `cancel` fires; every send already races
    /// against it.
    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        window: Timeframe,
        out: &RecordSender<Self::Record>,
    ) -> Result<()>;
}

/// Await a request unless `cancel` fires first
///
/// API and HTTP calls can take up to the client timeout; a cancelled
/// collection must not wait for them.
pub(crate) async fn cancellable<F>(cancel: &CancellationToken, request: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        output = request => Ok(output),
    }
}

/// Serialize a typed Kubernetes object into a generic JSON value
pub(crate) fn to_value<K: serde::Serialize>(
    domain: CollectorDomain,
    obj: &K,
) -> Result<serde_json::Value> {
    serde_json::to_value(obj).map_err(|e| Error::collection(domain, e.to_string()))
}

/// Drop server-populated metadata that only adds noise to an export
pub(crate) fn strip_export_metadata(
    meta: &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) {
    meta.managed_fields = None;
    meta.resource_version = None;
    meta.uid = None;
    meta.generation = None;
}
