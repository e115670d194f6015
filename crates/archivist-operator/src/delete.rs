//! Removal of every trace of an archive
//!
//! Each domain subtree, the work directory and the artifact are removed
//! independently. A failure in one place is collected and reported, it never
//! stops the removal of the others.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use archivist_archive::ZipAssembler;
use archivist_collector::{CollectorRegistry, WorkLayout};
use archivist_common::{ArchiveId, Error, Result};

use crate::locks::KeyedLocks;

/// Deletes the collected data and the artifact of an archive
pub struct DeleteArchiveOrchestrator {
    registry: CollectorRegistry,
    layout: WorkLayout,
    assembler: Arc<ZipAssembler>,
    locks: Arc<KeyedLocks>,
}

impl DeleteArchiveOrchestrator {
    /// Create an orchestrator sharing `locks` with the create path
    pub fn new(
        registry: CollectorRegistry,
        layout: WorkLayout,
        assembler: Arc<ZipAssembler>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            registry,
            layout,
            assembler,
            locks,
        }
    }

    /// Delete everything stored for `id`
    ///
    /// Absent data is not an error, so deleting twice succeeds. All failures
    /// are returned together.
    #[instrument(skip(self, cancel), fields(archive = %id))]
    pub async fn delete(&self, cancel: &CancellationToken, id: &ArchiveId) -> Result<()> {
        let guard = tokio::select! {
            guard = self.locks.lock(id) => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let mut errors = Vec::new();
        for handle in self.registry.handles() {
            if let Err(e) = handle.delete(id).await {
                warn!(archive = %id, domain = %handle.domain(), error = %e, "domain delete failed");
                errors.push(e);
            }
        }

        if let Err(e) = self.layout.remove_archive(id).await {
            warn!(archive = %id, error = %e, "work directory delete failed");
            errors.push(e);
        }

        if let Err(e) = self.assembler.delete(id).await {
            warn!(archive = %id, error = %e, "artifact delete failed");
            errors.push(e);
        }

        drop(guard);
        self.locks.forget(id);

        if errors.is_empty() {
            info!(archive = %id, "archive deleted");
        }
        Error::join(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, registry_of, FakeDomain, Workspace};
    use archivist_collector::{pipe, ArchiveEntry, DomainHandle, EntrySource};
    use archivist_common::CollectorDomain;
    use rstest::rstest;

    fn orchestrator(ws: &Workspace, fakes: &[Arc<FakeDomain>]) -> DeleteArchiveOrchestrator {
        DeleteArchiveOrchestrator::new(
            registry_of(fakes),
            ws.layout.clone(),
            ws.assembler.clone(),
            Arc::new(KeyedLocks::new()),
        )
    }

    async fn build_artifact(ws: &Workspace, id: &ArchiveId) {
        let (tx, rx) = pipe();
        let producer = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let entry = ArchiveEntry {
                name: "data.txt".to_string(),
                source: EntrySource::Bytes(b"data".to_vec()),
            };
            tx.send(&cancel, entry).await?;
            tx.finish(&cancel).await
        });
        ws.assembler
            .create(&CancellationToken::new(), id, vec![(CollectorDomain::Logs, rx)])
            .await
            .unwrap();
        producer.await.unwrap().unwrap();
    }

    /// Story: an archive is deleted halfway through its build. Whatever mix
    /// of collected and missing domains it had, nothing is left behind.
    #[rstest]
    #[case::nothing_collected(0, false)]
    #[case::partially_collected(3, false)]
    #[case::finished(6, true)]
    #[tokio::test]
    async fn delete_leaves_nothing_behind(#[case] collected: usize, #[case] built: bool) {
        let ws = Workspace::new();
        let fakes = ws.fakes();
        let target = id("sa-1");
        for fake in &fakes[..collected] {
            fake.seed(&target).await;
        }
        if built {
            build_artifact(&ws, &target).await;
        }

        orchestrator(&ws, &fakes)
            .delete(&CancellationToken::new(), &target)
            .await
            .unwrap();

        assert!(!ws.assembler.exists(&target).await.unwrap());
        assert!(!ws.layout.archive_dir(&target).exists());
    }

    #[tokio::test]
    async fn deleting_twice_succeeds() {
        let ws = Workspace::new();
        let fakes = ws.fakes();
        let orchestrator = orchestrator(&ws, &fakes);
        fakes[0].seed(&id("sa-1")).await;

        let cancel = CancellationToken::new();
        orchestrator.delete(&cancel, &id("sa-1")).await.unwrap();
        orchestrator.delete(&cancel, &id("sa-1")).await.unwrap();
    }

    /// Story: the logs volume has a permission problem. The other domains and
    /// the artifact are still removed and the logs failure is reported.
    #[tokio::test]
    async fn failing_domain_does_not_block_the_rest() {
        let ws = Workspace::new();
        let mut fakes = ws.fakes();
        fakes[0] = Arc::new(
            FakeDomain::new(CollectorDomain::Logs, ws.layout.clone()).failing_delete(),
        );
        let target = id("sa-1");
        for fake in &fakes {
            fake.seed(&target).await;
        }
        build_artifact(&ws, &target).await;

        let result = orchestrator(&ws, &fakes)
            .delete(&CancellationToken::new(), &target)
            .await;

        assert!(matches!(result, Err(Error::Storage { .. })));
        assert!(!ws.assembler.exists(&target).await.unwrap());
        for fake in &fakes[1..] {
            assert!(!ws
                .layout
                .is_collected(&target, fake.domain())
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn several_failures_are_joined() {
        let ws = Workspace::new();
        let mut fakes = ws.fakes();
        fakes[0] = Arc::new(
            FakeDomain::new(CollectorDomain::Logs, ws.layout.clone()).failing_delete(),
        );
        fakes[3] = Arc::new(
            FakeDomain::new(CollectorDomain::Secret, ws.layout.clone()).failing_delete(),
        );

        let result = orchestrator(&ws, &fakes)
            .delete(&CancellationToken::new(), &id("sa-1"))
            .await;

        match result {
            Err(Error::Multiple { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected joined errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_waits_for_a_running_create_step() {
        let ws = Workspace::new();
        let fakes = ws.fakes();
        let locks = Arc::new(KeyedLocks::new());
        let orchestrator = Arc::new(DeleteArchiveOrchestrator::new(
            registry_of(&fakes),
            ws.layout.clone(),
            ws.assembler.clone(),
            locks.clone(),
        ));
        let target = id("sa-1");
        let held = locks.lock(&target).await;

        let task = {
            let orchestrator = orchestrator.clone();
            let target = target.clone();
            tokio::spawn(async move {
                orchestrator
                    .delete(&CancellationToken::new(), &target)
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        drop(held);
        task.await.unwrap().unwrap();
        assert!(locks.is_empty());
    }
}
