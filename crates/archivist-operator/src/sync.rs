//! Periodic reconciliation of stored artifacts against live descriptors
//!
//! Artifacts whose descriptor is gone are deleted. Descriptors without an
//! artifact are pushed onto the trigger feed so the controller builds them,
//! which covers missed watch events and operator restarts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use archivist_archive::ZipAssembler;
use archivist_common::{ArchiveId, Error, Result};

use crate::delete::DeleteArchiveOrchestrator;
use crate::descriptor::DescriptorApi;
use crate::trigger::TriggerFeed;

/// What one sync tick did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Orphaned archives that were deleted
    pub deleted: Vec<ArchiveId>,
    /// Declared archives that were sent to the controller
    pub triggered: Vec<ArchiveId>,
}

/// Compares the archive directory with the SupportArchives of a namespace
pub struct SyncOrchestrator {
    namespace: String,
    assembler: Arc<ZipAssembler>,
    descriptors: Arc<dyn DescriptorApi>,
    delete: Arc<DeleteArchiveOrchestrator>,
    triggers: TriggerFeed,
}

impl SyncOrchestrator {
    /// Create an orchestrator for the archives of `namespace`
    pub fn new(
        namespace: impl Into<String>,
        assembler: Arc<ZipAssembler>,
        descriptors: Arc<dyn DescriptorApi>,
        delete: Arc<DeleteArchiveOrchestrator>,
        triggers: TriggerFeed,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            assembler,
            descriptors,
            delete,
            triggers,
        }
    }

    /// Run one comparison
    ///
    /// An unreadable archive root or a failed descriptor listing aborts the
    /// tick. Everything else is best effort: delete failures are returned
    /// together, trigger failures are logged.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let listing = self.assembler.list().await?;
        if let Some(e) = &listing.error {
            warn!(error = %e, "archive listing is incomplete, continuing with the readable part");
        }
        let stored: BTreeSet<ArchiveId> = listing
            .archives
            .into_iter()
            .filter(|id| id.namespace == self.namespace)
            .collect();

        let declared = self
            .descriptors
            .list(&self.namespace)
            .await?
            .iter()
            .map(ArchiveId::of)
            .collect::<Result<BTreeSet<_>>>()?;

        let mut report = SyncReport::default();
        let mut errors = Vec::new();

        for id in stored.difference(&declared) {
            if cancel.is_cancelled() {
                errors.push(Error::Cancelled);
                break;
            }
            info!(archive = %id, "deleting archive without descriptor");
            match self.delete.delete(cancel, id).await {
                Ok(()) => report.deleted.push(id.clone()),
                Err(e) => errors.push(e),
            }
        }

        for id in declared.difference(&stored) {
            match self.triggers.trigger(id) {
                Ok(()) => {
                    debug!(archive = %id, "triggered reconcile of archive without artifact");
                    report.triggered.push(id.clone());
                }
                Err(e) => warn!(archive = %id, error = %e, "could not trigger reconcile"),
            }
        }

        Error::join(errors)?;
        Ok(report)
    }

    /// Tick every `interval` until `shutdown` fires; a zero interval disables sync
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        if interval.is_zero() {
            info!("archive sync disabled");
            return;
        }
        info!(interval_secs = interval.as_secs(), "starting archive sync");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick(&shutdown).await {
                Ok(report) => debug!(
                    deleted = report.deleted.len(),
                    triggered = report.triggered.len(),
                    "archive sync finished"
                ),
                Err(e) => warn!(error = %e, "archive sync failed"),
            }
        }
        info!("archive sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MockDescriptorApi;
    use crate::locks::KeyedLocks;
    use crate::testing::{archive, id, registry_of, Workspace, NAMESPACE};
    use crate::trigger::trigger_feed;
    use futures::StreamExt;

    fn store(ws: &Workspace, id: &ArchiveId) {
        let path = ws.assembler.artifact_path(id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"PK").unwrap();
    }

    fn declaring(names: &'static [&'static str]) -> MockDescriptorApi {
        let mut api = MockDescriptorApi::new();
        api.expect_list()
            .withf(|namespace| namespace == NAMESPACE)
            .returning(move |_| Ok(names.iter().map(|n| archive(n, 0)).collect()));
        api
    }

    fn orchestrator(
        ws: &Workspace,
        api: MockDescriptorApi,
        triggers: TriggerFeed,
    ) -> SyncOrchestrator {
        let delete = DeleteArchiveOrchestrator::new(
            registry_of(&ws.fakes()),
            ws.layout.clone(),
            ws.assembler.clone(),
            Arc::new(KeyedLocks::new()),
        );
        SyncOrchestrator::new(
            NAMESPACE,
            ws.assembler.clone(),
            Arc::new(api),
            Arc::new(delete),
            triggers,
        )
    }

    /// Story: A was deleted while the operator was down and D was created.
    /// One tick removes A's artifact and asks the controller to build D.
    #[tokio::test]
    async fn orphans_are_deleted_and_missing_archives_triggered() {
        let ws = Workspace::new();
        for name in ["a", "b", "c"] {
            store(&ws, &id(name));
        }
        let (feed, mut stream) = trigger_feed(8);
        let sync = orchestrator(&ws, declaring(&["b", "c", "d"]), feed);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                deleted: vec![id("a")],
                triggered: vec![id("d")],
            }
        );
        assert!(!ws.assembler.exists(&id("a")).await.unwrap());
        assert!(ws.assembler.exists(&id("b")).await.unwrap());
        let triggered = stream.next().await.unwrap();
        assert_eq!(triggered.name, "d");
    }

    /// Story: a stray file sits next to the stored archives. The listing
    /// reports it, and the tick still works through the archives it could read.
    #[tokio::test]
    async fn stray_file_does_not_stop_the_tick() {
        let ws = Workspace::new();
        for name in ["a", "b"] {
            store(&ws, &id(name));
        }
        let stray = ws.assembler.artifact_path(&id("a")).with_file_name("junk.txt");
        std::fs::write(&stray, b"left over").unwrap();
        assert!(ws.assembler.list().await.unwrap().error.is_some());
        let (feed, mut stream) = trigger_feed(8);
        let sync = orchestrator(&ws, declaring(&["b", "c"]), feed);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            report,
            SyncReport {
                deleted: vec![id("a")],
                triggered: vec![id("c")],
            }
        );
        assert!(!ws.assembler.exists(&id("a")).await.unwrap());
        assert!(stray.exists());
        assert_eq!(stream.next().await.unwrap().name, "c");
    }

    #[tokio::test]
    async fn other_namespaces_are_not_touched() {
        let ws = Workspace::new();
        let foreign = ArchiveId::new("other", "x");
        store(&ws, &foreign);
        let (feed, _stream) = trigger_feed(8);
        let sync = orchestrator(&ws, declaring(&[]), feed);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(report, SyncReport::default());
        assert!(ws.assembler.exists(&foreign).await.unwrap());
    }

    #[tokio::test]
    async fn unreadable_archive_root_aborts_the_tick() {
        let ws = Workspace::new();
        let root = ws.assembler.artifact_path(&id("x"));
        let root = root.parent().unwrap().parent().unwrap();
        std::fs::create_dir_all(root.parent().unwrap()).unwrap();
        std::fs::write(root, b"not a directory").unwrap();

        let mut api = MockDescriptorApi::new();
        api.expect_list().never();
        let (feed, _stream) = trigger_feed(8);
        let sync = orchestrator(&ws, api, feed);

        assert!(sync.tick(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn full_trigger_feed_does_not_fail_the_tick() {
        let ws = Workspace::new();
        let (feed, _stream) = trigger_feed(1);
        let sync = orchestrator(&ws, declaring(&["d", "e"]), feed);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.triggered, vec![id("d")]);
    }

    #[tokio::test]
    async fn zero_interval_disables_sync() {
        let ws = Workspace::new();
        let mut api = MockDescriptorApi::new();
        api.expect_list().never();
        let (feed, _stream) = trigger_feed(1);
        let sync = orchestrator(&ws, api, feed);

        tokio::time::timeout(
            Duration::from_secs(1),
            sync.run(Duration::ZERO, CancellationToken::new()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let ws = Workspace::new();
        let (feed, _stream) = trigger_feed(8);
        let sync = orchestrator(&ws, declaring(&[]), feed);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            sync.run(Duration::from_secs(60), shutdown),
        )
        .await
        .unwrap();
    }
}
