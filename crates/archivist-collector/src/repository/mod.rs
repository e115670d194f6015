//! Persistence of collected records in the work tree
//!
//! A repository drains one collector's stream into files under the domain
//! directory and sets the domain's completion marker once the stream ended
//! cleanly. The three encodings differ only in how a record becomes bytes,
//! so they share [`FileRepository`] and plug in a [`RecordEncoder`].

mod tabular;
mod text;
mod yaml;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use archivist_common::{ArchiveId, CollectorDomain, Error, Result};

use crate::layout::{sync_file, WorkLayout};
use crate::record::{ArchiveEntry, EntrySource, StreamRecord};
use crate::stream::{RecordReceiver, RecordSender};

pub use tabular::TabularEncoding;
pub use text::TextEncoding;
pub use yaml::YamlEncoding;

/// Raw text repository, used for container logs
pub type TextRepository = FileRepository<TextEncoding>;
/// CSV repository, used for metric samples
pub type TabularRepository = FileRepository<TabularEncoding>;
/// YAML repository, used for Kubernetes objects
pub type YamlRepository = FileRepository<YamlEncoding>;

/// Storage side of one collector domain
#[async_trait]
pub trait CollectorRepository: Send + Sync + 'static {
    /// Record type this repository persists
    type Record: StreamRecord;

    /// Domain this repository stores
    fn domain(&self) -> CollectorDomain;

    /// Persist every record of `records`, then set the completion marker
    ///
    /// Leftovers of an earlier attempt are removed first. The marker is only
    /// written when the producer finished its stream; an aborted stream or
    /// a write failure leaves the domain unmarked.
    async fn create(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        records: RecordReceiver<Self::Record>,
    ) -> Result<()>;

    /// Check whether the domain is fully persisted
    async fn is_collected(&self, id: &ArchiveId) -> Result<bool>;

    /// Remove the marker and the persisted data; absent data is not an error
    async fn delete(&self, id: &ArchiveId) -> Result<()>;

    /// Stream the persisted files of a collected domain as archive entries
    async fn stream(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        out: RecordSender<ArchiveEntry>,
    ) -> Result<()>;
}

/// Turns records into the bytes appended to their file
pub trait RecordEncoder: Send + Sync + 'static {
    /// Record type this encoder understands
    type Record: StreamRecord;

    /// Encode one record; `fresh` is true for the first write to a file
    fn encode(&self, record: &Self::Record, fresh: bool) -> Result<Vec<u8>>;
}

/// Repository writing one file per record id under the domain directory
pub struct FileRepository<E> {
    domain: CollectorDomain,
    layout: WorkLayout,
    encoder: E,
}

impl<E: RecordEncoder + Default> FileRepository<E> {
    /// Create a repository for `domain` inside `layout`
    pub fn new(domain: CollectorDomain, layout: WorkLayout) -> Self {
        Self {
            domain,
            layout,
            encoder: E::default(),
        }
    }
}

impl<E: RecordEncoder> FileRepository<E> {
    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        file.write_all(bytes).await.map_err(|e| Error::io(path, e))?;
        file.flush().await.map_err(|e| Error::io(path, e))
    }
}

#[async_trait]
impl<E: RecordEncoder> CollectorRepository for FileRepository<E> {
    type Record = E::Record;

    fn domain(&self) -> CollectorDomain {
        self.domain
    }

    async fn create(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        mut records: RecordReceiver<Self::Record>,
    ) -> Result<()> {
        self.layout.clear_domain(id, self.domain).await?;

        let mut written: HashSet<PathBuf> = HashSet::new();
        let mut count = 0usize;
        while let Some(record) = records.recv(cancel).await? {
            let path = self.layout.entry_path(id, self.domain, &record.record_id())?;
            let fresh = !written.contains(&path);
            let bytes = self.encoder.encode(&record, fresh)?;
            self.append(&path, &bytes).await?;
            written.insert(path);
            count += 1;
        }

        // data must be durable before the marker vouches for it
        for path in &written {
            sync_file(path).await?;
        }
        self.layout.mark_collected(id, self.domain).await?;
        debug!(
            archive = %id,
            domain = %self.domain,
            records = count,
            files = written.len(),
            "domain persisted"
        );
        Ok(())
    }

    async fn is_collected(&self, id: &ArchiveId) -> Result<bool> {
        self.layout.is_collected(id, self.domain).await
    }

    async fn delete(&self, id: &ArchiveId) -> Result<()> {
        self.layout.clear_domain(id, self.domain).await
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        out: RecordSender<ArchiveEntry>,
    ) -> Result<()> {
        if !self.is_collected(id).await? {
            return Err(Error::storage(
                self.layout.domain_dir(id, self.domain),
                "domain has not been collected",
            ));
        }
        for (name, path) in self.layout.domain_files(id, self.domain).await? {
            out.send(
                cancel,
                ArchiveEntry {
                    name,
                    source: EntrySource::File(path),
                },
            )
            .await?;
        }
        out.finish(cancel).await
    }
}
