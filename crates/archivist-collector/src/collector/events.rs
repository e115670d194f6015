use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use archivist_common::{CollectorDomain, Error, Result, Timeframe};

use super::{cancellable, strip_export_metadata, to_value, Collector};
use crate::record::ResourceRecord;
use crate::stream::RecordSender;

/// Collects the core/v1 events of the namespace observed within the window
pub struct EventCollector {
    client: Client,
}

impl EventCollector {
    /// Create a collector using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Collector for EventCollector {
    type Record = ResourceRecord;

    fn domain(&self) -> CollectorDomain {
        CollectorDomain::Events
    }

    async fn collect(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        window: Timeframe,
        out: &RecordSender<ResourceRecord>,
    ) -> Result<()> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let events = cancellable(cancel, api.list(&ListParams::default()))
            .await?
            .map_err(|e| Error::collection(self.domain(), e.to_string()))?;

        for mut event in events {
            if !observed_at(&event).is_some_and(|at| window.contains(at)) {
                continue;
            }
            strip_export_metadata(&mut event.metadata);
            let path = event.name_any();
            let body = to_value(self.domain(), &event)?;
            out.send(cancel, ResourceRecord { path, body }).await?;
        }
        Ok(())
    }
}

/// Most recent time the event was seen
fn observed_at(event: &Event) -> Option<DateTime<Utc>> {
    event
        .series
        .as_ref()
        .and_then(|s| s.last_observed_time.as_ref())
        .map(|t| t.0)
        .or_else(|| event.last_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}
