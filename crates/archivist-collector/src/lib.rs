//! Collection side of the support archive pipeline
//!
//! - **stream**: cancellable single-producer/single-consumer pipe
//! - **record**: the records collectors emit
//! - **layout**: the on-disk work tree, completion markers and finalized flag
//! - **collector**: the [`Collector`] contract and the six concrete collectors
//! - **repository**: the [`CollectorRepository`] contract and its encodings
//! - **registry**: the static domain to (collector, repository) mapping

pub mod collector;
pub mod layout;
pub mod record;
pub mod registry;
pub mod repository;
pub mod stream;

pub use collector::Collector;
pub use layout::WorkLayout;
pub use record::{ArchiveEntry, EntrySource, LogRecord, MetricRow, ResourceRecord, StreamRecord};
pub use registry::{CollectorRegistry, DomainHandle, DomainPair};
pub use repository::CollectorRepository;
pub use stream::{pipe, RecordReceiver, RecordSender};
