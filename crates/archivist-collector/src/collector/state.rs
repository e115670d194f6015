use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use super::{cancellable, strip_export_metadata, to_value, Collector};
use crate::record::ResourceRecord;
use crate::stream::RecordSender;

/// Snapshot of the namespace's workload and configuration resources
pub struct SystemStateCollector {
    client: Client,
    label_selector: Option<String>,
}

impl SystemStateCollector {
    /// Create a collector, optionally narrowed by a label selector
    pub fn new(client: Client, label_selector: Option<String>) -> Self {
        Self {
            client,
            label_selector,
        }
    }

    fn list_params(&self) -> ListParams {
        match &self.label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }

    async fn export<K>(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        plural: &str,
        out: &RecordSender<ResourceRecord>,
    ) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize
            + Send
            + Sync
            + 'static,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = cancellable(cancel, api.list(&self.list_params()))
            .await?
            .map_err(|e| Error::collection(self.domain(), format!("listing {plural}: {e}")))?;

        debug!(kind = plural, count = list.items.len(), "exporting resources");
        for obj in list {
            out.send(cancel, export_record(plural, obj)?).await?;
        }
        Ok(())
    }
}

fn export_record<K: Resource + Serialize>(plural: &str, mut obj: K) -> Result<ResourceRecord> {
    strip_export_metadata(obj.meta_mut());
    Ok(ResourceRecord {
        path: format!("{plural}/{}", obj.name_any()),
        body: to_value(CollectorDomain::SystemState, &obj)?,
    })
}

#[async_trait]
impl Collector for SystemStateCollector {
    type Record = ResourceRecord;

    fn domain(&self) -> CollectorDomain {
        CollectorDomain::SystemState
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        _window: Timeframe,
        out: &RecordSender<ResourceRecord>,
    ) -> Result<()> {
        self.export::<Pod>(cancel, namespace, "pods", out).await?;
        self.export::<Deployment>(cancel, namespace, "deployments", out)
            .await?;
        self.export::<StatefulSet>(cancel, namespace, "statefulsets", out)
            .await?;
        self.export::<DaemonSet>(cancel, namespace, "daemonsets", out)
            .await?;
        self.export::<Service>(cancel, namespace, "services", out)
            .await?;
        self.export::<ConfigMap>(cancel, namespace, "configmaps", out)
            .await?;
        self.export::<PersistentVolumeClaim>(cancel, namespace, "persistentvolumeclaims", out)
            .await?;
        self.export::<Ingress>(cancel, namespace, "ingresses", out)
            .await
    }
}
