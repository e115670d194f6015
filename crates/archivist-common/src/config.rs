//! Operator configuration
//!
//! Built once at startup from the process environment and then passed to
//! every component by constructor. Nothing reads the environment after that.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, DEFAULT_NAMESPACE};

/// Runtime configuration of the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator watches and stores archives for
    pub namespace: String,
    /// Root of the per-archive working tree
    pub work_dir: PathBuf,
    /// Root of the finished zip artifacts
    pub archive_dir: PathBuf,
    /// Period of the drift-correcting sync; zero disables it
    pub sync_interval: Duration,
    /// Period of the retention garbage collection; zero disables it
    pub gc_interval: Duration,
    /// Number of completed archives garbage collection keeps
    pub gc_number_to_keep: usize,
    /// Service that serves the archive directory
    pub download_service_name: String,
    /// Port of the download service
    pub download_service_port: u16,
    /// Base URL of the Prometheus-compatible metrics backend
    pub metrics_url: String,
    /// Resolution of volume metric range queries
    pub volume_metrics_step: Duration,
    /// Resolution of node metric range queries
    pub node_metrics_step: Duration,
    /// Window length used when a SupportArchive names no timeframe
    pub default_timeframe: Duration,
    /// Label selector narrowing the system state collection
    pub system_state_label_selector: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            work_dir: PathBuf::from("/data/work"),
            archive_dir: PathBuf::from("/data/support-archives"),
            sync_interval: Duration::from_secs(300),
            gc_interval: Duration::from_secs(600),
            gc_number_to_keep: 5,
            download_service_name: "archivist-download".to_string(),
            download_service_port: 8080,
            metrics_url: "http://prometheus.monitoring.svc:9090".to_string(),
            volume_metrics_step: Duration::from_secs(300),
            node_metrics_step: Duration::from_secs(60),
            default_timeframe: Duration::from_secs(24 * 3600),
            system_state_label_selector: None,
        }
    }
}

impl OperatorConfig {
    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.is_empty() {
            return Err(Error::validation("namespace must not be empty"));
        }
        if self.volume_metrics_step.is_zero() || self.node_metrics_step.is_zero() {
            return Err(Error::validation("metric step sizes must be positive"));
        }
        if self.work_dir == self.archive_dir {
            return Err(Error::validation("work and archive directories must differ"));
        }
        Ok(())
    }
}
