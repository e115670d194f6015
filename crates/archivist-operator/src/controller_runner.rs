//! Controller runner - builds the operator's long running futures
//!
//! [`build_controllers`] wires the collectors, the orchestrators and the
//! reconciler from an [`OperatorConfig`] and returns the futures to drive.
//! Nothing here reads the environment.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use archivist_archive::{DownloadEndpoint, ZipAssembler};
use archivist_collector::collector::{MetricsClient, PrometheusClient};
use archivist_collector::{CollectorRegistry, WorkLayout};
use archivist_common::crd::SupportArchive;
use archivist_common::events::{EventPublisher, KubeEventPublisher};
use archivist_common::{OperatorConfig, Result};

use crate::controller::{error_policy, reconcile, Context};
use crate::create::CreateArchiveOrchestrator;
use crate::delete::DeleteArchiveOrchestrator;
use crate::descriptor::{DescriptorApi, KubeDescriptorApi};
use crate::gc::GarbageCollectionOrchestrator;
use crate::locks::KeyedLocks;
use crate::sync::SyncOrchestrator;
use crate::trigger::trigger_feed;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Pending reconcile requests buffered from the sync timer
const TRIGGER_CAPACITY: usize = 1024;

/// Name events are reported under
pub const CONTROLLER_NAME: &str = "archivist-controller";

/// A boxed future the caller drives to completion
pub type OperatorTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the SupportArchive controller and its sync and GC timers
///
/// The controller stops on SIGINT/SIGTERM and then cancels `shutdown`, which
/// stops the timers and aborts in-flight collections.
pub fn build_controllers(
    client: Client,
    config: &OperatorConfig,
    shutdown: CancellationToken,
) -> Result<Vec<OperatorTask>> {
    let metrics: Arc<dyn MetricsClient> = Arc::new(PrometheusClient::new(&config.metrics_url)?);
    let registry = CollectorRegistry::standard(client.clone(), metrics, config)?;
    let layout = WorkLayout::new(&config.work_dir);
    let assembler = Arc::new(ZipAssembler::new(
        &config.archive_dir,
        DownloadEndpoint::from(config),
    ));
    let locks = Arc::new(KeyedLocks::new());
    let descriptors: Arc<dyn DescriptorApi> = Arc::new(KubeDescriptorApi::new(client.clone()));
    let events: Arc<dyn EventPublisher> =
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));

    let create = Arc::new(CreateArchiveOrchestrator::new(
        registry.clone(),
        layout.clone(),
        assembler.clone(),
        descriptors.clone(),
        events.clone(),
        locks.clone(),
        config.default_timeframe,
    ));
    let delete = Arc::new(DeleteArchiveOrchestrator::new(
        registry,
        layout,
        assembler.clone(),
        locks,
    ));

    let (triggers, trigger_stream) = trigger_feed(TRIGGER_CAPACITY);
    let sync = SyncOrchestrator::new(
        config.namespace.clone(),
        assembler.clone(),
        descriptors.clone(),
        delete.clone(),
        triggers,
    );
    let gc = GarbageCollectionOrchestrator::new(
        config.namespace.clone(),
        config.gc_number_to_keep,
        assembler,
        descriptors.clone(),
    );

    let ctx = Arc::new(Context::new(
        descriptors,
        create,
        delete,
        events,
        shutdown.clone(),
    ));
    let archives: Api<SupportArchive> = Api::namespaced(client, &config.namespace);

    let controller = Controller::new(
        archives,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .reconcile_on(trigger_stream)
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(log_reconcile_result("SupportArchive"));

    tracing::info!(namespace = %config.namespace, "- SupportArchive controller");
    tracing::info!(interval = ?config.sync_interval, "- archive sync");
    tracing::info!(
        interval = ?config.gc_interval,
        keep = config.gc_number_to_keep,
        "- archive garbage collection"
    );

    let controller_shutdown = shutdown.clone();
    let sync_interval = config.sync_interval;
    let sync_shutdown = shutdown.clone();
    let gc_interval = config.gc_interval;

    Ok(vec![
        Box::pin(async move {
            controller.await;
            tracing::info!("SupportArchive controller completed");
            controller_shutdown.cancel();
        }),
        Box::pin(async move { sync.run(sync_interval, sync_shutdown).await }),
        Box::pin(async move { gc.run(gc_interval, shutdown).await }),
    ])
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(std::result::Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
