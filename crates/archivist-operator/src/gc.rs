//! Retention of finished archives
//!
//! Only the newest `number_to_keep` finished archives of the namespace are
//! kept. GC deletes the descriptors of the older ones; the controller then
//! takes the normal delete path for their data.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use archivist_archive::ZipAssembler;
use archivist_common::{ArchiveId, Error, Result};

use crate::descriptor::DescriptorApi;

/// Deletes the descriptors of the oldest finished archives
pub struct GarbageCollectionOrchestrator {
    namespace: String,
    number_to_keep: usize,
    assembler: Arc<ZipAssembler>,
    descriptors: Arc<dyn DescriptorApi>,
}

impl GarbageCollectionOrchestrator {
    /// Create an orchestrator keeping `number_to_keep` archives of `namespace`
    pub fn new(
        namespace: impl Into<String>,
        number_to_keep: usize,
        assembler: Arc<ZipAssembler>,
        descriptors: Arc<dyn DescriptorApi>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            number_to_keep,
            assembler,
            descriptors,
        }
    }

    /// Run one collection and return the archives whose descriptor was deleted
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Vec<ArchiveId>> {
        let mut errors = Vec::new();
        let mut finished = Vec::new();
        for archive in self.descriptors.list(&self.namespace).await? {
            if archive.is_being_deleted() {
                continue;
            }
            let id = match ArchiveId::of(&archive) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "skipping unidentifiable archive");
                    errors.push(e);
                    continue;
                }
            };
            match self.assembler.exists(&id).await {
                Ok(true) => finished.push((archive.created_at(), id)),
                Ok(false) => {}
                Err(e) => {
                    warn!(archive = %id, error = %e, "could not check artifact");
                    errors.push(e);
                }
            }
        }

        // oldest first; the name breaks ties between equal timestamps
        finished.sort();
        let excess = finished.len().saturating_sub(self.number_to_keep);

        let mut deleted = Vec::with_capacity(excess);
        for (_, id) in finished.into_iter().take(excess) {
            if cancel.is_cancelled() {
                errors.push(Error::Cancelled);
                break;
            }
            match self.descriptors.delete(&id).await {
                Ok(()) => {
                    info!(archive = %id, "deleted expired archive");
                    deleted.push(id);
                }
                Err(e) => {
                    warn!(archive = %id, error = %e, "could not delete expired archive");
                    errors.push(e);
                }
            }
        }

        Error::join(errors)?;
        Ok(deleted)
    }

    /// Tick every `interval` until `shutdown` fires; a zero interval disables GC
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        if interval.is_zero() {
            info!("archive garbage collection disabled");
            return;
        }
        info!(
            interval_secs = interval.as_secs(),
            keep = self.number_to_keep,
            "starting archive garbage collection"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.tick(&shutdown).await {
                Ok(deleted) => debug!(deleted = deleted.len(), "garbage collection finished"),
                Err(e) => warn!(error = %e, "garbage collection failed"),
            }
        }
        info!("archive garbage collection stopped");
    }
}
