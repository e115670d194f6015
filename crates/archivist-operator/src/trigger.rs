//! Reconciliation trigger feed
//!
//! Anything that learns an archive needs attention outside of the watch
//! stream (the sync timer, mostly) pushes its reference here. The receiving
//! half is handed to the controller through `Controller::reconcile_on`.

use kube::runtime::reflector::ObjectRef;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use archivist_common::crd::SupportArchive;
use archivist_common::{ArchiveId, Error, Result};

/// Sending half of the trigger feed
#[derive(Clone, Debug)]
pub struct TriggerFeed {
    tx: mpsc::Sender<ObjectRef<SupportArchive>>,
}

/// Create a feed buffering up to `capacity` pending triggers
pub fn trigger_feed(capacity: usize) -> (TriggerFeed, ReceiverStream<ObjectRef<SupportArchive>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TriggerFeed { tx }, ReceiverStream::new(rx))
}

impl TriggerFeed {
    /// Ask the controller to reconcile `id`
    ///
    /// Never waits: a full or closed feed is reported and the trigger dropped.
    pub fn trigger(&self, id: &ArchiveId) -> Result<()> {
        let obj = ObjectRef::new(&id.name).within(&id.namespace);
        self.tx.try_send(obj).map_err(|e| {
            Error::internal_with_context("trigger", format!("could not trigger {id}: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn triggers_reach_the_stream() {
        let (feed, mut stream) = trigger_feed(4);
        feed.trigger(&ArchiveId::new("ecosystem", "sa-1")).unwrap();

        let obj = stream.next().await.unwrap();
        assert_eq!(obj.name, "sa-1");
        assert_eq!(obj.namespace.as_deref(), Some("ecosystem"));
    }

    #[test]
    fn full_feed_drops_the_trigger() {
        let (feed, _stream) = trigger_feed(1);
        feed.trigger(&ArchiveId::new("ecosystem", "a")).unwrap();
        assert!(feed.trigger(&ArchiveId::new("ecosystem", "b")).is_err());
    }

    #[test]
    fn closed_feed_reports_an_error() {
        let (feed, stream) = trigger_feed(1);
        drop(stream);
        assert!(feed.trigger(&ArchiveId::new("ecosystem", "a")).is_err());
    }
}
