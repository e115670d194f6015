//! SupportArchive operator
//!
//! - **controller**: the reconciler routing each event to create or delete
//! - **create** / **delete**: the per-archive orchestrators
//! - **sync** / **gc**: the timer driven orchestrators
//! - **descriptor**: access to SupportArchive objects
//! - **locks**: per-archive serialization of create and delete
//! - **trigger**: the feed that asks the controller to reconcile an archive
//! - **controller_runner**: wiring of all of the above

pub mod controller;
pub mod controller_runner;
pub mod create;
pub mod delete;
pub mod descriptor;
pub mod gc;
pub mod locks;
pub mod sync;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{error_policy, reconcile, Context};
pub use create::{BuildState, CreateArchiveOrchestrator, CreateOutcome};
pub use delete::DeleteArchiveOrchestrator;
pub use descriptor::{update_status_with_retry, DescriptorApi, KubeDescriptorApi};
pub use gc::GarbageCollectionOrchestrator;
pub use locks::KeyedLocks;
pub use sync::{SyncOrchestrator, SyncReport};
pub use trigger::{trigger_feed, TriggerFeed};
