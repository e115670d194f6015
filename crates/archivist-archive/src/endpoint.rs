//! Download location of finished archives

use archivist_common::{ArchiveId, OperatorConfig};

/// Cluster-internal service that serves the archive directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadEndpoint {
    /// Service name
    pub service: String,
    /// Namespace of the service
    pub namespace: String,
    /// Service port
    pub port: u16,
}

impl DownloadEndpoint {
    /// URL under which the artifact of `id` is served
    pub fn url(&self, id: &ArchiveId) -> String {
        format!(
            "https://{}.{}.svc.cluster.local:{}/{}/{}.zip",
            self.service, self.namespace, self.port, id.namespace, id.name
        )
    }
}

impl From<&OperatorConfig> for DownloadEndpoint {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            service: config.download_service_name.clone(),
            namespace: config.namespace.clone(),
            port: config.download_service_port,
        }
    }
}
