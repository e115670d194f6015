//! SupportArchive reconciler
//!
//! Routes every event to the create or the delete orchestrator. The cleanup
//! finalizer keeps the descriptor around until its data is gone, so a
//! deletion is never missed.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use archivist_common::crd::SupportArchive;
use archivist_common::events::{actions, reasons, EventPublisher};
use archivist_common::{ArchiveId, Error, CLEANUP_FINALIZER};

use crate::create::{CreateArchiveOrchestrator, CreateOutcome};
use crate::delete::DeleteArchiveOrchestrator;
use crate::descriptor::DescriptorApi;

/// Delay before a failed reconcile is retried
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Delay before an archive with a spec error is looked at again
const INVALID_SPEC_DELAY: Duration = Duration::from_secs(300);

/// Shared state of the reconciler
pub struct Context {
    descriptors: Arc<dyn DescriptorApi>,
    create: Arc<CreateArchiveOrchestrator>,
    delete: Arc<DeleteArchiveOrchestrator>,
    events: Arc<dyn EventPublisher>,
    shutdown: CancellationToken,
}

impl Context {
    /// Create a context; `shutdown` cancels in-flight collections
    pub fn new(
        descriptors: Arc<dyn DescriptorApi>,
        create: Arc<CreateArchiveOrchestrator>,
        delete: Arc<DeleteArchiveOrchestrator>,
        events: Arc<dyn EventPublisher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            descriptors,
            create,
            delete,
            events,
            shutdown,
        }
    }
}

fn has_cleanup_finalizer(archive: &SupportArchive) -> bool {
    archive.finalizers().iter().any(|f| f == CLEANUP_FINALIZER)
}

/// Reconcile one SupportArchive
///
/// The object handed in by the watch may be stale, so the descriptor is read
/// again before deciding between create and delete.
#[instrument(skip(archive, ctx), fields(archive = %archive.name_any()))]
pub async fn reconcile(archive: Arc<SupportArchive>, ctx: Arc<Context>) -> Result<Action, Error> {
    let id = ArchiveId::of(archive.as_ref())?;

    let current = match ctx.descriptors.get(&id).await? {
        Some(current) if !current.is_being_deleted() => current,
        Some(current) => {
            info!(archive = %id, "archive is being deleted");
            ctx.events
                .publish(
                    &current.object_ref(&()),
                    EventType::Normal,
                    reasons::DELETION_STARTED,
                    actions::DELETE,
                    None,
                )
                .await;
            ctx.delete.delete(&ctx.shutdown, &id).await?;
            if has_cleanup_finalizer(&current) {
                ctx.descriptors
                    .remove_finalizer(&id, CLEANUP_FINALIZER)
                    .await?;
            }
            return Ok(Action::await_change());
        }
        None => {
            debug!(archive = %id, "descriptor is gone, removing leftovers");
            ctx.delete.delete(&ctx.shutdown, &id).await?;
            return Ok(Action::await_change());
        }
    };

    if !has_cleanup_finalizer(&current) {
        ctx.descriptors
            .add_finalizer(&id, CLEANUP_FINALIZER)
            .await?;
    }

    match ctx.create.execute(&ctx.shutdown, &current).await? {
        CreateOutcome::Requeue => Ok(Action::requeue(Duration::ZERO)),
        CreateOutcome::Done => Ok(Action::await_change()),
    }
}

/// Requeue failed reconciles; spec errors are retried only rarely
pub fn error_policy(archive: Arc<SupportArchive>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        archive = %archive.name_any(),
        error = %error,
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(RETRY_DELAY)
    } else {
        Action::requeue(INVALID_SPEC_DELAY)
    }
}
