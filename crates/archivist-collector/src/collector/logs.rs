use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use super::{cancellable, Collector};
use crate::record::LogRecord;
use crate::stream::RecordSender;

/// Collects the logs of every container in the namespace
pub struct LogCollector {
    client: Client,
}

impl LogCollector {
    /// Create a collector using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for LogCollector {
    type Record = LogRecord;

    fn domain(&self) -> CollectorDomain {
        CollectorDomain::Logs
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        window: Timeframe,
        out: &RecordSender<LogRecord>,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = cancellable(cancel, pods.list(&ListParams::default()))
            .await?
            .map_err(|e| Error::collection(self.domain(), e.to_string()))?;

        for pod in list {
            let pod_name = pod.name_any();
            for container in container_names(&pod) {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let params = LogParams {
                    container: Some(container.clone()),
                    since_time: Some(window.start),
                    timestamps: true,
                    ..Default::default()
                };
                let text = match cancellable(cancel, pods.logs(&pod_name, &params)).await? {
                    Ok(text) => text,
                    // containers that never started have no log to fetch
                    Err(kube::Error::Api(ae)) if ae.code == 400 || ae.code == 404 => {
                        warn!(
                            pod = %pod_name,
                            container = %container,
                            reason = %ae.message,
                            "skipping container logs"
                        );
                        continue;
                    }
                    Err(e) => return Err(Error::collection(self.domain(), e.to_string())),
                };

                let text = lines_until(&text, window.end);
                if text.is_empty() {
                    continue;
                }
                debug!(
                    pod = %pod_name,
                    container = %container,
                    bytes = text.len(),
                    "collected logs"
                );
                out.send(
                    cancel,
                    LogRecord {
                        pod: pod_name.clone(),
                        container,
                        text,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }
}

fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|c| c.name.clone())
        .collect()
}

/// Keep the timestamped lines that are not newer than `end`
///
/// Lines without a leading timestamp belong to the previous line and share
/// its fate.
fn lines_until(text: &str, end: DateTime<Utc>) -> String {
    let mut kept = String::with_capacity(text.len());
    let mut keep = true;
    for line in text.lines() {
        if let Some(at) = line
            .split_once(' ')
            .and_then(|(ts, _)| DateTime::parse_from_rfc3339(ts).ok())
        {
            keep = at.with_timezone(&Utc) <= end;
        }
        if keep {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    kept
}
