//! Fixtures shared by the orchestrator tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use kube::runtime::events::EventType;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use archivist_archive::{DownloadEndpoint, ZipAssembler};
use archivist_collector::{
    ArchiveEntry, CollectorRegistry, DomainHandle, EntrySource, RecordSender, WorkLayout,
};
use archivist_common::crd::{SupportArchive, SupportArchiveSpec};
use archivist_common::events::EventPublisher;
use archivist_common::{ArchiveId, CollectorDomain, Error, Result, Timeframe};

pub(crate) const NAMESPACE: &str = "ecosystem";

/// A SupportArchive in [`NAMESPACE`] created `offset_hours` after a fixed epoch
pub(crate) fn archive(name: &str, offset_hours: i64) -> SupportArchive {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    SupportArchive {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            creation_timestamp: Some(Time(base + ChronoDuration::hours(offset_hours))),
            ..Default::default()
        },
        spec: SupportArchiveSpec::default(),
        status: None,
    }
}

pub(crate) fn id(name: &str) -> ArchiveId {
    ArchiveId::new(NAMESPACE, name)
}

/// Work tree and archive directory in one temporary directory
pub(crate) struct Workspace {
    _dir: TempDir,
    pub layout: WorkLayout,
    pub assembler: Arc<ZipAssembler>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = WorkLayout::new(dir.path().join("work"));
        let assembler = Arc::new(ZipAssembler::new(
            dir.path().join("archives"),
            DownloadEndpoint {
                service: "archives".to_string(),
                namespace: "archivist-system".to_string(),
                port: 8443,
            },
        ));
        Self {
            _dir: dir,
            layout,
            assembler,
        }
    }

    /// One fake handle per domain, in collection order
    pub fn fakes(&self) -> Vec<Arc<FakeDomain>> {
        CollectorDomain::ALL
            .into_iter()
            .map(|d| Arc::new(FakeDomain::new(d, self.layout.clone())))
            .collect()
    }
}

pub(crate) fn registry_of(fakes: &[Arc<FakeDomain>]) -> CollectorRegistry {
    fakes.iter().fold(CollectorRegistry::new(), |registry, fake| {
        registry.register(fake.clone() as Arc<dyn DomainHandle>)
    })
}

/// Domain handle writing one file per collection into the work tree
pub(crate) struct FakeDomain {
    domain: CollectorDomain,
    layout: WorkLayout,
    collects: AtomicUsize,
    fail_collect: bool,
    fail_delete: bool,
    fail_stream: bool,
}

impl FakeDomain {
    pub fn new(domain: CollectorDomain, layout: WorkLayout) -> Self {
        Self {
            domain,
            layout,
            collects: AtomicUsize::new(0),
            fail_collect: false,
            fail_delete: false,
            fail_stream: false,
        }
    }

    pub fn failing_collect(mut self) -> Self {
        self.fail_collect = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    /// Abort the entry stream without finishing it
    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    /// Number of collect calls so far
    pub fn collects(&self) -> usize {
        self.collects.load(Ordering::SeqCst)
    }

    /// Persist data and set the marker as a successful collection would
    pub async fn seed(&self, id: &ArchiveId) {
        let path = self.layout.entry_path(id, self.domain, "data.txt").unwrap();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, self.domain.as_str()).await.unwrap();
        self.layout.mark_collected(id, self.domain).await.unwrap();
    }
}

#[async_trait]
impl DomainHandle for FakeDomain {
    fn domain(&self) -> CollectorDomain {
        self.domain
    }

    async fn collect(
        &self,
        _cancel: &CancellationToken,
        id: &ArchiveId,
        _window: Timeframe,
    ) -> Result<()> {
        self.collects.fetch_add(1, Ordering::SeqCst);
        if self.fail_collect {
            return Err(Error::collection(self.domain, "scripted failure"));
        }
        self.seed(id).await;
        Ok(())
    }

    async fn is_collected(&self, id: &ArchiveId) -> Result<bool> {
        self.layout.is_collected(id, self.domain).await
    }

    async fn delete(&self, id: &ArchiveId) -> Result<()> {
        if self.fail_delete {
            return Err(Error::storage(
                self.layout.domain_dir(id, self.domain),
                "scripted failure",
            ));
        }
        self.layout.clear_domain(id, self.domain).await
    }

    async fn stream(
        &self,
        cancel: &CancellationToken,
        id: &ArchiveId,
        out: RecordSender<ArchiveEntry>,
    ) -> Result<()> {
        if self.fail_stream {
            drop(out);
            return Err(Error::collection(self.domain, "scripted stream failure"));
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

/// Event publisher remembering the reasons it was asked to publish
#[derive(Default)]
pub(crate) struct RecordingEvents {
    reasons: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}
