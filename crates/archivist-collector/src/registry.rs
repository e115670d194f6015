//! The fixed mapping from collector domain to its (collector, repository) pair
//!
//! Each pair is erased behind [`DomainHandle`] so the orchestrators can walk
//! all domains uniformly while every pair keeps its own record type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use archivist_common::{ArchiveId, CollectorDomain, Error, OperatorConfig, Result, Timeframe};

use crate::collector::{
    Collector, EventCollector, LogCollector, MetricsClient, MetricsCollector, SecretCollector,
    SystemStateCollector, NODE_QUERIES, VOLUME_QUERIES,
};
use crate::layout::WorkLayout;
use crate::record::ArchiveEntry;
use crate::repository::{CollectorRepository, TabularRepository, TextRepository, YamlRepository};
use crate::stream::{pipe, RecordSender};

/// Everything the orchestrators can do with one domain of an archive
#[async_trait]
pub trait DomainHandle: Send + Sync {
    /// Domain this handle serves
    fn domain(&self) -> CollectorDomain;

    /// Run the collector into the repository and set the completion marker
    async fn collect(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        window: Timeframe,
    ) -> Result<()>;

    /// Check the completion marker
    async fn is_collected(&self, id: &ArchiveId) -> Result<bool>;

    /// Remove marker and data; absent data is not an error
    async fn delete(&self, id: &ArchiveId) -> Result<()>;

    /// Stream the persisted files as archive entries
    async fn stream(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        out: RecordSender<ArchiveEntry>,
    ) -> Result<()>;
}

/// A collector wired to the repository that stores its records
pub struct DomainPair<C, R> {
    collector: Arc<C>,
    repository: R,
}

impl<C, R> DomainPair<C, R>
where
    C: Collector,
    R: CollectorRepository<Record = C::Record>,
{
    /// Pair `collector` with `repository`; both must serve the same domain
    pub fn new(collector: C, repository: R) -> Result<Self> {
        if collector.domain() != repository.domain() {
            return Err(Error::internal_with_context(
                "registry",
                format!(
                    "collector for {} paired with repository for {}",
                    collector.domain(),
                    repository.domain()
                ),
            ));
        }
        Ok(Self {
            collector: Arc::new(collector),
            repository,
        })
    }
}

/// Pick the error that explains a failed run
///
/// The side that failed first makes the other one see a cancelled token or
/// a broken pipe, so those are only reported when nothing else is known.
fn root_cause(produced: Error, consumed: Error) -> Error {
    match produced {
        Error::Cancelled | Error::Stream { .. } => consumed,
        other => other,
    }
}

#[async_trait]
impl<C, R> DomainHandle for DomainPair<C, R>
where
    C: Collector,
    R: CollectorRepository<Record = C::Record>,
{
    fn domain(&self) -> CollectorDomain {
        self.repository.domain()
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        window: Timeframe,
    ) -> Result<()> {
        let domain = self.domain();
        let started = Instant::now();
        let token = cancel.child_token();
        let (tx, rx) = pipe();

        // The producer owns the sender: it is finished on success and
        // dropped on every other path, including a panic.
        let collector = self.collector.clone();
        let producer_token = token.clone();
        let namespace = id.namespace.clone();
        let producer = tokio::spawn(async move {
            collector
                .collect(&producer_token, &namespace, window, &tx)
                .await?;
            tx.finish(&producer_token).await
        });

        let consumed = self.repository.create(&token, id, rx).await;
        if consumed.is_err() {
            token.cancel();
        }
        let produced = producer.await.unwrap_or_else(|e| {
            Err(Error::collection(domain, format!("collector task failed: {e}")))
        });

        match (produced, consumed) {
            (Ok(()), Ok(())) => {
                info!(
                    archive = %id,
                    domain = %domain,
                    elapsed_ms = started.elapsed().as_millis(),
                    "domain collected"
                );
                Ok(())
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!(archive = %id, domain = %domain, error = %e, "domain collection failed");
                Err(e)
            }
            (Err(p), Err(c)) => {
                let e = root_cause(p, c);
                warn!(archive = %id, domain = %domain, error = %e, "domain collection failed");
                Err(e)
            }
        }
    }

    async fn is_collected(&self, id: &ArchiveId) -> Result<bool> {
        self.repository.is_collected(id).await
    }

    async fn delete(&self, id: &ArchiveId) -> Result<()> {
        self.repository.delete(id).await
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        out: RecordSender<ArchiveEntry>,
    ) -> Result<()> {
        self.repository.stream(cancel, id, out).await
    }
}

/// Domain handles keyed by domain, built once at startup
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    handles: BTreeMap<CollectorDomain, Arc<dyn DomainHandle>>,
}

impl CollectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, replacing any handle of the same domain
    pub fn register(mut self, handle: Arc<dyn DomainHandle>) -> Self {
        self.handles.insert(handle.domain(), handle);
        self
    }

    /// The six production pairs
    pub fn standard(
        client: Client,
        metrics: Arc<dyn MetricsClient>,
        config: &OperatorConfig,
    ) -> Result<Self> {
        let layout = WorkLayout::new(&config.work_dir);
        let registry = Self::new()
            .register(Arc::new(DomainPair::new(
                LogCollector::new(client.clone()),
                TextRepository::new(CollectorDomain::Logs, layout.clone()),
            )?))
            .register(Arc::new(DomainPair::new(
                MetricsCollector::new(
                    CollectorDomain::VolumeInfo,
                    metrics.clone(),
                    VOLUME_QUERIES,
                    config.volume_metrics_step,
                ),
                TabularRepository::new(CollectorDomain::VolumeInfo, layout.clone()),
            )?))
            .register(Arc::new(DomainPair::new(
                MetricsCollector::new(
                    CollectorDomain::NodeInfo,
                    metrics,
                    NODE_QUERIES,
                    config.node_metrics_step,
                ),
                TabularRepository::new(CollectorDomain::NodeInfo, layout.clone()),
            )?))
            .register(Arc::new(DomainPair::new(
                SecretCollector::new(client.clone()),
                YamlRepository::new(CollectorDomain::Secret, layout.clone()),
            )?))
            .register(Arc::new(DomainPair::new(
                SystemStateCollector::new(
                    client.clone(),
                    config.system_state_label_selector.clone(),
                ),
                YamlRepository::new(CollectorDomain::SystemState, layout.clone()),
            )?))
            .register(Arc::new(DomainPair::new(
                EventCollector::new(client),
                YamlRepository::new(CollectorDomain::Events, layout),
            )?));
        Ok(registry)
    }

    /// Handle of one domain
    pub fn get(&self, domain: CollectorDomain) -> Result<Arc<dyn DomainHandle>> {
        self.handles.get(&domain).cloned().ok_or_else(|| {
            let message = format!("no collector registered for {domain}");
            Error::internal_with_context("registry", message)
        })
    }

    /// Every registered handle, in collection order
    pub fn handles(&self) -> impl Iterator<Item = &Arc<dyn DomainHandle>> {
        self.handles.values()
    }
}
