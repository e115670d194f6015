//! On-disk work tree of the support archives being built
//!
//! ```text
//! <work-root>/<namespace>/<name>/<Domain>/...    persisted domain data
//! <work-root>/<namespace>/<name>/<Domain>.done   completion marker
//! <work-root>/<namespace>/<name>/.finalized      artifact built and published
//! ```
//!
//! Markers live next to, not inside, their domain directory. Clearing a
//! domain removes the marker first, so an interrupted clear can leave stray
//! data but never a marker over partial data.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use archivist_common::{ArchiveId, CollectorDomain, Error, Result};

const MARKER_SUFFIX: &str = "done";
const FINALIZED_FLAG: &str = ".finalized";

/// Paths and durable progress facts under the work root
#[derive(Clone, Debug)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    /// Create a layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the work tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything of one archive
    pub fn archive_dir(&self, id: &ArchiveId) -> PathBuf {
        self.root.join(&id.namespace).join(&id.name)
    }

    /// Directory holding the persisted records of one domain
    pub fn domain_dir(&self, id: &ArchiveId, domain: CollectorDomain) -> PathBuf {
        self.archive_dir(id).join(domain.as_str())
    }

    /// Completion marker of one domain
    pub fn marker_path(&self, id: &ArchiveId, domain: CollectorDomain) -> PathBuf {
        self.archive_dir(id)
            .join(format!("{}.{MARKER_SUFFIX}", domain.as_str()))
    }

    fn finalized_path(&self, id: &ArchiveId) -> PathBuf {
        self.archive_dir(id).join(FINALIZED_FLAG)
    }

    /// Resolve a record id to a file inside the domain directory
    ///
    /// Ids are relative `/`-separated paths; absolute ids and ids that would
    /// leave the domain directory are rejected.
    pub fn entry_path(
        &self,
        id: &ArchiveId,
        domain: CollectorDomain,
        record_id: &str,
    ) -> Result<PathBuf> {
        let mut path = self.domain_dir(id, domain);
        if record_id.is_empty() || record_id.starts_with('/') {
            return Err(Error::storage(&path, format!("invalid record id '{record_id}'")));
        }
        for part in record_id.split('/') {
            if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
                return Err(Error::storage(&path, format!("invalid record id '{record_id}'")));
            }
            path.push(part);
        }
        Ok(path)
    }

    /// Durably record that a domain is fully persisted
    pub async fn mark_collected(&self, id: &ArchiveId, domain: CollectorDomain) -> Result<()> {
        touch(&self.marker_path(id, domain)).await
    }

    /// Check the completion marker of a domain
    pub async fn is_collected(&self, id: &ArchiveId, domain: CollectorDomain) -> Result<bool> {
        exists(&self.marker_path(id, domain)).await
    }

    /// Remove a domain's marker and then its data
    ///
    /// Absent files are not an error.
    pub async fn clear_domain(&self, id: &ArchiveId, domain: CollectorDomain) -> Result<()> {
        remove_file_if_exists(&self.marker_path(id, domain)).await?;
        remove_dir_if_exists(&self.domain_dir(id, domain)).await
    }

    /// Record that the artifact was built and the status published
    pub async fn mark_finalized(&self, id: &ArchiveId) -> Result<()> {
        touch(&self.finalized_path(id)).await
    }

    /// Check the finalized flag
    pub async fn is_finalized(&self, id: &ArchiveId) -> Result<bool> {
        exists(&self.finalized_path(id)).await
    }

    /// Drop the finalized flag so the archive is built again
    pub async fn clear_finalized(&self, id: &ArchiveId) -> Result<()> {
        remove_file_if_exists(&self.finalized_path(id)).await
    }

    /// Remove the whole archive directory and an emptied namespace directory
    pub async fn remove_archive(&self, id: &ArchiveId) -> Result<()> {
        remove_dir_if_exists(&self.archive_dir(id)).await?;
        prune_empty_dir(&self.root.join(&id.namespace)).await
    }

    /// Every file persisted for a domain, as (record id, path), sorted by id
    pub async fn domain_files(
        &self,
        id: &ArchiveId,
        domain: CollectorDomain,
    ) -> Result<Vec<(String, PathBuf)>> {
        let base = self.domain_dir(id, domain);
        let mut files = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound && dir == base => break,
                Err(e) => return Err(Error::io(&dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| Error::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push((relative_id(&base, &path)?, path));
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn relative_id(base: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| Error::storage(path, "file outside of its domain directory"))?;
    let parts = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| Error::storage(path, "file name is not valid UTF-8"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

async fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    tokio::fs::write(path, b"")
        .await
        .map_err(|e| Error::io(path, e))?;
    sync_file(path).await?;
    // make the new directory entry itself durable
    if let Some(parent) = path.parent().filter(|_| cfg!(unix)) {
        sync_file(parent).await?;
    }
    Ok(())
}

/// Flush a file's contents to stable storage
pub async fn sync_file(path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    file.sync_all().await.map_err(|e| Error::io(path, e))
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::io(path, e))
}

/// Remove a file, treating an absent file as success
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a directory tree, treating an absent tree as success
pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove `dir` if it exists and holds nothing
pub async fn prune_empty_dir(dir: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    if entries
        .next_entry()
        .await
        .map_err(|e| Error::io(dir, e))?
        .is_some()
    {
        return Ok(());
    }
    remove_dir_if_exists(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn layout() -> (TempDir, WorkLayout) {
        let dir = TempDir::new().unwrap();
        let layout = WorkLayout::new(dir.path());
        (dir, layout)
    }

    fn id() -> ArchiveId {
        ArchiveId::new("ecosystem", "sa-1")
    }

    #[rstest]
    #[case("pod/nginx.log")]
    #[case("pods/web-0.yaml")]
    #[case("metric.csv")]
    fn valid_record_ids_resolve_inside_the_domain(#[case] record_id: &str) {
        let (_dir, layout) = layout();
        let path = layout
            .entry_path(&id(), CollectorDomain::Logs, record_id)
            .unwrap();
        assert!(path.starts_with(layout.domain_dir(&id(), CollectorDomain::Logs)));
    }

    #[rstest]
    #[case("")]
    #[case("/etc/passwd")]
    #[case("../Secrets/x.yaml")]
    #[case("pods//web.yaml")]
    #[case("pods/./web.yaml")]
    fn escaping_record_ids_are_rejected(#[case] record_id: &str) {
        let (_dir, layout) = layout();
        assert!(layout
            .entry_path(&id(), CollectorDomain::Logs, record_id)
            .is_err());
    }

    #[tokio::test]
    async fn markers_survive_a_new_layout_instance() {
        let (dir, layout) = layout();
        layout
            .mark_collected(&id(), CollectorDomain::Secret)
            .await
            .unwrap();

        let reopened = WorkLayout::new(dir.path());
        assert!(reopened
            .is_collected(&id(), CollectorDomain::Secret)
            .await
            .unwrap());
        assert!(!reopened
            .is_collected(&id(), CollectorDomain::Logs)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn clearing_a_domain_removes_marker_and_data() {
        let (_dir, layout) = layout();
        let file = layout
            .entry_path(&id(), CollectorDomain::Logs, "p/c.log")
            .unwrap();
        tokio::fs::create_dir_all(file.parent().unwrap()).await.unwrap();
        tokio::fs::write(&file, "x").await.unwrap();
        layout
            .mark_collected(&id(), CollectorDomain::Logs)
            .await
            .unwrap();

        layout
            .clear_domain(&id(), CollectorDomain::Logs)
            .await
            .unwrap();

        assert!(!file.exists());
        assert!(!layout
            .is_collected(&id(), CollectorDomain::Logs)
            .await
            .unwrap());
        // a second clear finds nothing and still succeeds
        layout
            .clear_domain(&id(), CollectorDomain::Logs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn domain_files_are_listed_recursively_and_sorted() {
        let (_dir, layout) = layout();
        for record_id in ["pods/b.yaml", "services/a.yaml", "pods/a.yaml"] {
            let path = layout
                .entry_path(&id(), CollectorDomain::SystemState, record_id)
                .unwrap();
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, "kind: X\n").await.unwrap();
        }

        let ids: Vec<String> = layout
            .domain_files(&id(), CollectorDomain::SystemState)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["pods/a.yaml", "pods/b.yaml", "services/a.yaml"]);
    }

    #[tokio::test]
    async fn syncing_requires_the_file_to_exist() {
        let (dir, layout) = layout();
        layout.mark_collected(&id(), CollectorDomain::Logs).await.unwrap();

        sync_file(&layout.marker_path(&id(), CollectorDomain::Logs))
            .await
            .unwrap();
        let missing = sync_file(&dir.path().join("absent.log")).await;
        assert!(matches!(missing, Err(Error::Storage { .. })));
    }

    #[tokio::test]
    async fn missing_domain_has_no_files() {
        let (_dir, layout) = layout();
        assert!(layout
            .domain_files(&id(), CollectorDomain::Events)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn removing_the_last_archive_prunes_the_namespace() {
        let (dir, layout) = layout();
        let other = ArchiveId::new("ecosystem", "sa-2");
        layout.mark_finalized(&id()).await.unwrap();
        layout.mark_finalized(&other).await.unwrap();

        layout.remove_archive(&id()).await.unwrap();
        assert!(dir.path().join("ecosystem").exists());
        assert!(!layout.is_finalized(&id()).await.unwrap());

        layout.remove_archive(&other).await.unwrap();
        assert!(!dir.path().join("ecosystem").exists());

        // already gone
        layout.remove_archive(&other).await.unwrap();
    }
}
