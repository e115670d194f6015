//! Archivist operator - builds support archives for SupportArchive resources

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use archivist_common::crd::SupportArchive;
use archivist_common::telemetry::{init_telemetry, TelemetryConfig};
use archivist_common::{Error, OperatorConfig, Result, DEFAULT_NAMESPACE};
use archivist_operator::controller_runner::build_controllers;

/// Archivist - collects diagnostic data into downloadable support archives
#[derive(Parser, Debug)]
#[command(name = "archivist-operator", version, about, long_about = None)]
struct Cli {
    /// Print the SupportArchive CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Namespace whose SupportArchives are processed
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Root of the per-archive working tree
    #[arg(long, env = "WORK_DIR", default_value = "/data/work")]
    work_dir: PathBuf,

    /// Root of the finished zip artifacts
    #[arg(long, env = "ARCHIVE_DIR", default_value = "/data/support-archives")]
    archive_dir: PathBuf,

    /// Seconds between sync runs; 0 disables sync
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = 300)]
    sync_interval_secs: u64,

    /// Seconds between garbage collection runs; 0 disables it
    #[arg(long, env = "GC_INTERVAL_SECS", default_value_t = 600)]
    gc_interval_secs: u64,

    /// Finished archives kept by garbage collection
    #[arg(long, env = "GC_NUMBER_TO_KEEP", default_value_t = 5)]
    gc_number_to_keep: usize,

    /// Service that serves the archive directory
    #[arg(long, env = "DOWNLOAD_SERVICE_NAME", default_value = "archivist-download")]
    download_service_name: String,

    /// Port of the download service
    #[arg(long, env = "DOWNLOAD_SERVICE_PORT", default_value_t = 8080)]
    download_service_port: u16,

    /// Base URL of the Prometheus-compatible metrics backend
    #[arg(long, env = "METRICS_URL", default_value = "http://prometheus.monitoring.svc:9090")]
    metrics_url: String,

    /// Step of volume metric queries in seconds
    #[arg(long, env = "VOLUME_METRICS_STEP_SECS", default_value_t = 300)]
    volume_metrics_step_secs: u64,

    /// Step of node metric queries in seconds
    #[arg(long, env = "NODE_METRICS_STEP_SECS", default_value_t = 60)]
    node_metrics_step_secs: u64,

    /// Window collected when a SupportArchive names no timeframe, in hours
    #[arg(long, env = "DEFAULT_TIMEFRAME_HOURS", default_value_t = 24)]
    default_timeframe_hours: u64,

    /// Label selector narrowing the system state collection
    #[arg(long, env = "SYSTEM_STATE_LABEL_SELECTOR")]
    system_state_label_selector: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_FORMAT_JSON", default_value_t = true, action = clap::ArgAction::Set)]
    log_format_json: bool,
}

impl Cli {
    fn operator_config(&self) -> Result<OperatorConfig> {
        let default_timeframe = self
            .default_timeframe_hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::validation("DEFAULT_TIMEFRAME_HOURS is out of range"))?;
        Ok(OperatorConfig {
            namespace: self.namespace.clone(),
            work_dir: self.work_dir.clone(),
            archive_dir: self.archive_dir.clone(),
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            gc_interval: Duration::from_secs(self.gc_interval_secs),
            gc_number_to_keep: self.gc_number_to_keep,
            download_service_name: self.download_service_name.clone(),
            download_service_port: self.download_service_port,
            metrics_url: self.metrics_url.clone(),
            volume_metrics_step: Duration::from_secs(self.volume_metrics_step_secs),
            node_metrics_step: Duration::from_secs(self.node_metrics_step_secs),
            default_timeframe,
            system_state_label_selector: self.system_state_label_selector.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&SupportArchive::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.log_format_json,
        ..Default::default()
    })?;

    let config = cli.operator_config()?;
    config.validate()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(namespace = %config.namespace, "Starting archivist operator");

    let shutdown = CancellationToken::new();
    let tasks = build_controllers(client, &config, shutdown.clone())?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, cancelling in-flight work");
            signal_shutdown.cancel();
        }
    });

    futures::future::join_all(tasks).await;

    tracing::info!("Archivist operator shutting down");
    Ok(())
}
