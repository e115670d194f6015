//! Zip artifact assembly and the archive directory
//!
//! An artifact is written to `<name>.zip.partial` and renamed into place only
//! after the zip was fully closed, so a reader never sees a half-written
//! archive at the final path.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use archivist_collector::layout::{prune_empty_dir, remove_file_if_exists};
use archivist_collector::{ArchiveEntry, EntrySource, RecordReceiver};
use archivist_common::{ArchiveId, CollectorDomain, Error, Result};

use crate::endpoint::DownloadEndpoint;

const ARTIFACT_EXTENSION: &str = ".zip";
const PARTIAL_EXTENSION: &str = ".zip.partial";

/// Result of listing the archive directory
///
/// `error` carries the namespaces or files that could not be interpreted;
/// `archives` is still usable when it is set.
#[derive(Debug, Default)]
pub struct Listing {
    /// Finished archives, sorted
    pub archives: Vec<ArchiveId>,
    /// Problems met while listing
    pub error: Option<Error>,
}

/// Builds, lists and removes the zip artifacts under the archive root
#[derive(Clone, Debug)]
pub struct ZipAssembler {
    root: PathBuf,
    endpoint: DownloadEndpoint,
}

impl ZipAssembler {
    /// Create an assembler over `root` publishing URLs of `endpoint`
    pub fn new(root: impl Into<PathBuf>, endpoint: DownloadEndpoint) -> Self {
        Self {
            root: root.into(),
            endpoint,
        }
    }

    /// Final location of the artifact of `id`
    pub fn artifact_path(&self, id: &ArchiveId) -> PathBuf {
        self.root
            .join(&id.namespace)
            .join(format!("{}{ARTIFACT_EXTENSION}", id.name))
    }

    fn partial_path(&self, id: &ArchiveId) -> PathBuf {
        self.root
            .join(&id.namespace)
            .join(format!("{}{PARTIAL_EXTENSION}", id.name))
    }

    /// Download URL of the artifact of `id`
    pub fn download_url(&self, id: &ArchiveId) -> String {
        self.endpoint.url(id)
    }

    /// Build the artifact from the entry streams of each domain
    ///
    /// Entries are placed at `<domain>/<entry name>`. On failure the partial
    /// file is removed and an existing artifact is left untouched.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        domains: Vec<(CollectorDomain, RecordReceiver<ArchiveEntry>)>,
    ) -> Result<String> {
        let partial = self.partial_path(id);
        let result = self.assemble(cancel, id, domains, &partial).await;
        if let Err(e) = &result {
            warn!(archive = %id, error = %e, "archive assembly failed");
            if let Err(cleanup) = remove_file_if_exists(&partial).await {
                warn!(archive = %id, error = %cleanup, "could not remove partial archive");
            }
        }
        result
    }

    async fn assemble(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        domains: Vec<(CollectorDomain, RecordReceiver<ArchiveEntry>)>,
        partial: &Path,
    ) -> Result<String> {
        let mut entries = Vec::new();
        for (domain, mut rx) in domains {
            while let Some(entry) = rx.recv(cancel).await? {
                entries.push((format!("{}/{}", domain.as_str(), entry.name), entry.source));
            }
        }
        debug!(archive = %id, entries = entries.len(), "writing archive");

        let writer_cancel = cancel.clone();
        let writer_partial = partial.to_path_buf();
        let writer_id = id.clone();
        tokio::task::spawn_blocking(move || {
            write_zip(&writer_id, &writer_partial, &entries, &writer_cancel)
        })
        .await
        .map_err(|e| Error::archive(id, format!("writer task failed: {e}")))??;

        let artifact = self.artifact_path(id);
        tokio::fs::rename(partial, &artifact)
            .await
            .map_err(|e| Error::io(&artifact, e))?;

        let url = self.download_url(id);
        info!(archive = %id, url = %url, "archive created");
        Ok(url)
    }

    /// Check whether the artifact of `id` exists
    pub async fn exists(&self, id: &ArchiveId) -> Result<bool> {
        let path = self.artifact_path(id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::io(&path, e))
    }

    /// List the finished archives
    ///
    /// An unreadable root fails the whole listing; problems below it are
    /// reported in [`Listing::error`].
    pub async fn list(&self) -> Result<Listing> {
        let mut listing = Listing::default();
        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(Error::io(&self.root, e)),
        };

        let mut problems = Vec::new();
        while let Some(ns) = namespaces
            .next_entry()
            .await
            .map_err(|e| Error::io(&self.root, e))?
        {
            let path = ns.path();
            match ns.file_type().await {
                Ok(t) if t.is_dir() => {}
                Ok(_) => {
                    problems.push(Error::storage(&path, "unexpected file in archive root"));
                    continue;
                }
                Err(e) => {
                    problems.push(Error::io(&path, e));
                    continue;
                }
            }
            let Some(namespace) = ns.file_name().to_str().map(str::to_string) else {
                problems.push(Error::storage(&path, "namespace is not valid UTF-8"));
                continue;
            };
            if let Err(e) = list_namespace(&path, &namespace, &mut listing.archives).await {
                problems.push(e);
            }
        }

        listing.archives.sort();
        listing.error = Error::join(problems).err();
        Ok(listing)
    }

    /// Remove the artifact of `id` and prune an emptied namespace directory
    pub async fn delete(&self, id: &ArchiveId) -> Result<()> {
        remove_file_if_exists(&self.artifact_path(id)).await?;
        remove_file_if_exists(&self.partial_path(id)).await?;
        prune_empty_dir(&self.root.join(&id.namespace)).await
    }
}

async fn list_namespace(dir: &Path, namespace: &str, out: &mut Vec<ArchiveId>) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(dir, e))?;
    let mut malformed = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(dir, e))? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            malformed.push(Error::storage(entry.path(), "file name is not valid UTF-8"));
            continue;
        };
        if file_name.ends_with(PARTIAL_EXTENSION) {
            continue;
        }
        match file_name.strip_suffix(ARTIFACT_EXTENSION) {
            Some(name) if !name.is_empty() => out.push(ArchiveId::new(namespace, name)),
            _ => malformed.push(Error::storage(entry.path(), "not an archive file")),
        }
    }
    Error::join(malformed)
}

fn write_zip(
    id: &ArchiveId,
    partial: &Path,
    entries: &[(String, EntrySource)],
    cancel: &CancellationToken,
) -> Result<()> {
    if let Some(parent) = partial.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = File::create(partial).map_err(|e| Error::io(partial, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let zip_error = |e: zip::result::ZipError| Error::archive(id, e.to_string());

    for (name, source) in entries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        match source {
            EntrySource::File(path) => {
                let mut input = File::open(path).map_err(|e| Error::io(path, e))?;
                io::copy(&mut input, &mut zip).map_err(|e| Error::io(path, e))?;
            }
            EntrySource::Bytes(bytes) => {
                zip.write_all(bytes).map_err(|e| Error::io(partial, e))?;
            }
        }
    }

    let file = zip.finish().map_err(zip_error)?;
    file.sync_all().map_err(|e| Error::io(partial, e))
}
