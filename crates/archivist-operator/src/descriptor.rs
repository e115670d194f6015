//! Access to SupportArchive descriptors
//!
//! The orchestrators only see the [`DescriptorApi`] trait so they can be
//! tested without an API server.

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use archivist_common::crd::{SupportArchive, SupportArchiveStatus};
use archivist_common::retry::{retry_with_backoff, RetryConfig};
use archivist_common::{ArchiveId, Result, FIELD_MANAGER};

/// Operations on SupportArchive objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DescriptorApi: Send + Sync {
    /// Fetch a descriptor; `None` when it does not exist
    async fn get(&self, id: &ArchiveId) -> Result<Option<SupportArchive>>;

    /// List the descriptors of a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<SupportArchive>>;

    /// Delete a descriptor; an absent descriptor is not an error
    async fn delete(&self, id: &ArchiveId) -> Result<()>;

    /// Replace the status block
    async fn patch_status(&self, id: &ArchiveId, status: &SupportArchiveStatus) -> Result<()>;

    /// Add a finalizer unless present
    async fn add_finalizer(&self, id: &ArchiveId, finalizer: &str) -> Result<()>;

    /// Remove a finalizer if present
    async fn remove_finalizer(&self, id: &ArchiveId, finalizer: &str) -> Result<()>;
}

/// [`DescriptorApi`] backed by the Kubernetes API
pub struct KubeDescriptorApi {
    client: Client,
}

impl KubeDescriptorApi {
    /// Create an API using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<SupportArchive> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(&self, id: &ArchiveId, finalizers: Vec<String>) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(&id.namespace)
            .patch(
                &id.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DescriptorApi for KubeDescriptorApi {
    async fn get(&self, id: &ArchiveId) -> Result<Option<SupportArchive>> {
        Ok(self.api(&id.namespace).get_opt(&id.name).await?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<SupportArchive>> {
        Ok(self
            .api(namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn delete(&self, id: &ArchiveId) -> Result<()> {
        match self
            .api(&id.namespace)
            .delete(&id.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(&self, id: &ArchiveId, status: &SupportArchiveStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api(&id.namespace)
            .patch_status(
                &id.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, id: &ArchiveId, finalizer: &str) -> Result<()> {
        let Some(archive) = self.get(id).await? else {
            return Ok(());
        };
        let mut finalizers = archive.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(id, finalizers).await
    }

    async fn remove_finalizer(&self, id: &ArchiveId, finalizer: &str) -> Result<()> {
        let Some(archive) = self.get(id).await? else {
            return Ok(());
        };
        let finalizers = archive.metadata.finalizers.unwrap_or_default();
        if !finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let remaining = finalizers.into_iter().filter(|f| f != finalizer).collect();
        self.patch_finalizers(id, remaining).await
    }
}

/// Re-read the descriptor, apply `mutate` to its status and write it back
///
/// Transient failures are retried with backoff. A descriptor that vanished
/// meanwhile has no status left to update and is skipped.
pub async fn update_status_with_retry<F>(
    descriptors: &dyn DescriptorApi,
    id: &ArchiveId,
    retry: &RetryConfig,
    mutate: F,
) -> Result<()>
where
    F: Fn(&mut SupportArchiveStatus) + Send + Sync,
{
    let mutate = &mutate;
    retry_with_backoff(retry, "update_status", move || async move {
        let Some(archive) = descriptors.get(id).await? else {
            debug!(archive = %id, "descriptor is gone, skipping status update");
            return Ok(());
        };
        let mut status = archive.status.unwrap_or_default();
        mutate(&mut status);
        descriptors.patch_status(id, &status).await
    })
    .await
}
