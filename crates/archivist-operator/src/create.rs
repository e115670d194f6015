//! Incremental archive creation
//!
//! Every call does at most one unit of work: collect the next domain that has
//! no completion marker, or build the artifact once all domains are marked.
//! All progress lives in the work tree, so a restarted operator resumes
//! exactly where the previous one stopped.
//!
//! ```text
//! Unstarted ──► InProgress ──► Finalizing ──► Done
//!   (no marker)   (some markers)  (all markers)  (flag + artifact)
//! ```

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use archivist_archive::ZipAssembler;
use archivist_collector::{pipe, CollectorRegistry, DomainHandle, WorkLayout};
use archivist_common::crd::{
    set_condition, ArchivePhase, Condition, ConditionStatus, SupportArchive,
};
use archivist_common::events::{actions, reasons, EventPublisher};
use archivist_common::retry::RetryConfig;
use archivist_common::{ArchiveId, CollectorDomain, Error, Result, Timeframe};

use crate::descriptor::{update_status_with_retry, DescriptorApi};
use crate::locks::KeyedLocks;

/// Condition type reporting whether the artifact is available
pub const CONDITION_CREATED: &str = "SupportArchiveCreated";
/// Condition type reporting that domains are being collected
pub const CONDITION_CREATING: &str = "ArchiveCreating";

/// What the reconciler should do after a create step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// More work is left; call again right away
    Requeue,
    /// Nothing left to do until the descriptor changes
    Done,
}

/// Build progress of one archive, derived from the work tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// No target domain is marked
    Unstarted,
    /// Some but not all target domains are marked
    InProgress,
    /// Every target domain is marked, the artifact is not built
    Finalizing,
    /// The artifact exists and the status was published
    Done,
}

struct Progress {
    completed: Vec<CollectorDomain>,
    done: bool,
}

impl Progress {
    fn state(&self, targets: &[CollectorDomain]) -> BuildState {
        if self.done {
            BuildState::Done
        } else if self.completed.len() == targets.len() {
            BuildState::Finalizing
        } else if self.completed.is_empty() {
            BuildState::Unstarted
        } else {
            BuildState::InProgress
        }
    }

    fn remaining(&self, targets: &[CollectorDomain]) -> Vec<CollectorDomain> {
        targets
            .iter()
            .filter(|d| !self.completed.contains(d))
            .copied()
            .collect()
    }
}

/// Drives one archive from its first domain to a published artifact
pub struct CreateArchiveOrchestrator {
    registry: CollectorRegistry,
    layout: WorkLayout,
    assembler: Arc<ZipAssembler>,
    descriptors: Arc<dyn DescriptorApi>,
    events: Arc<dyn EventPublisher>,
    locks: Arc<KeyedLocks>,
    default_timeframe: Duration,
    retry: RetryConfig,
}

impl CreateArchiveOrchestrator {
    /// Create an orchestrator; status writes use the default retry policy
    pub fn new(
        registry: CollectorRegistry,
        layout: WorkLayout,
        assembler: Arc<ZipAssembler>,
        descriptors: Arc<dyn DescriptorApi>,
        events: Arc<dyn EventPublisher>,
        locks: Arc<KeyedLocks>,
        default_timeframe: Duration,
    ) -> Self {
        Self {
            registry,
            layout,
            assembler,
            descriptors,
            events,
            locks,
            default_timeframe,
            retry: RetryConfig::default(),
        }
    }

    /// Use `retry` for status writes
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Current build state of `archive`
    pub async fn state(&self, archive: &SupportArchive) -> Result<BuildState> {
        let id = ArchiveId::of(archive)?;
        let targets = archive.spec.excluded_contents.target_domains();
        Ok(self.progress(&id, &targets).await?.state(&targets))
    }

    /// Run the next step of the build
    ///
    /// Returns [`CreateOutcome::Requeue`] after a domain was collected and
    /// [`CreateOutcome::Done`] once the artifact is published or the spec was
    /// rejected. Errors leave all recorded progress in place.
    #[instrument(skip(self, cancel, archive), fields(archive = %archive.name_any()))]
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        archive: &SupportArchive,
    ) -> Result<CreateOutcome> {
        let id = ArchiveId::of(archive)?;
        let _guard = self.locks.lock(&id).await;

        if self.layout.is_finalized(&id).await? && !self.assembler.exists(&id).await? {
            info!(archive = %id, "artifact is missing, building it again");
            self.layout.clear_finalized(&id).await?;
        }

        let targets = archive.spec.excluded_contents.target_domains();
        let progress = self.progress(&id, &targets).await?;
        if progress.done {
            debug!(archive = %id, "archive already created");
            return Ok(CreateOutcome::Done);
        }

        let window = match archive.timeframe(self.default_timeframe) {
            Ok(window) => window,
            Err(e @ Error::Validation { .. }) => {
                self.reject(archive, &id, e).await?;
                return Ok(CreateOutcome::Done);
            }
            Err(e) => return Err(e),
        };

        match progress.remaining(&targets).first() {
            None => {
                self.finalize(cancel, archive, &id, &targets).await?;
                Ok(CreateOutcome::Done)
            }
            Some(&domain) => {
                self.collect(cancel, archive, &id, domain, window).await?;
                Ok(CreateOutcome::Requeue)
            }
        }
    }

    async fn progress(&self, id: &ArchiveId, targets: &[CollectorDomain]) -> Result<Progress> {
        let done = self.layout.is_finalized(id).await? && self.assembler.exists(id).await?;

        let mut completed = Vec::with_capacity(targets.len());
        for domain in targets {
            if self.registry.get(*domain)?.is_collected(id).await? {
                completed.push(*domain);
            }
        }
        Ok(Progress { completed, done })
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        archive: &SupportArchive,
        id: &ArchiveId,
        domain: CollectorDomain,
        window: Timeframe,
    ) -> Result<()> {
        let phase = archive.status.as_ref().map(|s| s.phase);
        if phase != Some(ArchivePhase::Creating) {
            update_status_with_retry(self.descriptors.as_ref(), id, &self.retry, |status| {
                status.phase = ArchivePhase::Creating;
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        CONDITION_CREATING,
                        ConditionStatus::True,
                        "CollectingData",
                        "collecting diagnostic data",
                    ),
                );
            })
            .await?;
        }

        let handle = self.registry.get(domain)?;
        info!(archive = %id, %domain, "collecting domain");
        match handle.collect(cancel, id, window).await {
            Ok(()) => {
                self.publish(
                    archive,
                    EventType::Normal,
                    reasons::DOMAIN_COLLECTED,
                    actions::COLLECT,
                    Some(format!("collected {domain}")),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                warn!(archive = %id, %domain, error = %e, "domain collection failed");
                self.publish(
                    archive,
                    EventType::Warning,
                    reasons::DOMAIN_FAILED,
                    actions::COLLECT,
                    Some(format!("{domain}: {e}")),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn finalize(
        &self,
        cancel: &CancellationToken,
        archive: &SupportArchive,
        id: &ArchiveId,
        targets: &[CollectorDomain],
    ) -> Result<()> {
        let url = self.assemble(cancel, id, targets).await?;

        update_status_with_retry(self.descriptors.as_ref(), id, &self.retry, |status| {
            status.phase = ArchivePhase::Created;
            status.download_path = Some(url.clone());
            set_condition(
                &mut status.conditions,
                Condition::new(
                    CONDITION_CREATING,
                    ConditionStatus::False,
                    "CollectionComplete",
                    "all domains collected",
                ),
            );
            set_condition(
                &mut status.conditions,
                Condition::new(
                    CONDITION_CREATED,
                    ConditionStatus::True,
                    reasons::ARCHIVE_CREATED,
                    "archive is ready for download",
                ),
            );
        })
        .await?;

        self.layout.mark_finalized(id).await?;
        self.publish(
            archive,
            EventType::Normal,
            reasons::ARCHIVE_CREATED,
            actions::FINALIZE,
            Some(url),
        )
        .await;
        Ok(())
    }

    /// Stream every target domain into the assembler
    async fn assemble(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        targets: &[CollectorDomain],
    ) -> Result<String> {
        let handles = targets
            .iter()
            .map(|d| self.registry.get(*d))
            .collect::<Result<Vec<Arc<dyn DomainHandle>>>>()?;

        let token = cancel.child_token();
        let mut producers = Vec::with_capacity(handles.len());
        let mut domains = Vec::with_capacity(handles.len());
        for handle in handles {
            let (tx, rx) = pipe();
            domains.push((handle.domain(), rx));
            let token = token.clone();
            let id = id.clone();
            producers.push(tokio::spawn(async move {
                handle.stream(&token, &id, tx).await
            }));
        }

        let assembled = self.assembler.create(&token, id, domains).await;
        if assembled.is_err() {
            token.cancel();
        }

        let mut cause = None;
        for producer in producers {
            let produced = match producer.await {
                Ok(result) => result,
                Err(e) => Err(Error::internal_with_context(
                    "assemble",
                    format!("stream task failed: {e}"),
                )),
            };
            if let Err(e) = produced {
                if cause.is_none() && !matches!(e, Error::Cancelled | Error::Stream { .. }) {
                    cause = Some(e);
                }
            }
        }

        match (assembled, cause) {
            (Ok(url), _) => Ok(url),
            (Err(Error::Cancelled | Error::Stream { .. }), Some(cause)) => Err(cause),
            (Err(e), _) => Err(e),
        }
    }

    async fn reject(&self, archive: &SupportArchive, id: &ArchiveId, error: Error) -> Result<()> {
        warn!(archive = %id, error = %error, "archive spec rejected");
        if archive.status.as_ref().map(|s| s.phase) == Some(ArchivePhase::Failed) {
            return Ok(());
        }

        let message = error.to_string();
        update_status_with_retry(self.descriptors.as_ref(), id, &self.retry, |status| {
            status.phase = ArchivePhase::Failed;
            set_condition(
                &mut status.conditions,
                Condition::new(
                    CONDITION_CREATED,
                    ConditionStatus::False,
                    reasons::VALIDATION_FAILED,
                    message.clone(),
                ),
            );
        })
        .await?;
        self.publish(
            archive,
            EventType::Warning,
            reasons::VALIDATION_FAILED,
            actions::COLLECT,
            Some(message),
        )
        .await;
        Ok(())
    }

    async fn publish(
        &self,
        archive: &SupportArchive,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .publish(&archive.object_ref(&()), type_, reason, action, note)
            .await;
    }
}
