//! Cancellable record pipe between a producer and a consumer
//!
//! Every blocking send and receive races the data against the shared
//! [`CancellationToken`], so neither side can stay parked once the other has
//! given up. The producer ends a successful stream with
//! [`RecordSender::finish`]; a sender dropped without finishing is reported to
//! the consumer as an aborted stream, never as a complete one.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archivist_common::{Error, Result};

enum Frame<T> {
    Item(T),
    End,
}

/// Producing half of a [`pipe`]
pub struct RecordSender<T> {
    tx: mpsc::Sender<Frame<T>>,
}

/// Consuming half of a [`pipe`]
pub struct RecordReceiver<T> {
    rx: mpsc::Receiver<Frame<T>>,
    finished: bool,
}

/// Create a connected sender/receiver pair
///
/// The channel holds at most one record in flight, so a producer never runs
/// ahead of its consumer.
pub fn pipe<T>() -> (RecordSender<T>, RecordReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        RecordSender { tx },
        RecordReceiver {
            rx,
            finished: false,
        },
    )
}

impl<T> RecordSender<T> {
    /// Deliver one record
    ///
    /// Fails with [`Error::Cancelled`] when the token fires first and with a
    /// stream error when the consumer is gone.
    pub async fn send(&self, cancel: &CancellationToken, item: T) -> Result<()> {
        self.send_frame(cancel, Frame::Item(item)).await
    }

    /// Mark the stream as complete and release the sender
    pub async fn finish(self, cancel: &CancellationToken) -> Result<()> {
        self.send_frame(cancel, Frame::End).await
    }

    /// Check if the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send_frame(&self, cancel: &CancellationToken, frame: Frame<T>) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sent = self.tx.send(frame) => {
                sent.map_err(|_| Error::stream("consumer stopped reading"))
            }
        }
    }
}

impl<T> RecordReceiver<T> {
    /// Wait for the next record
    ///
    /// Returns `Ok(None)` once the producer finished the stream.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        if self.finished {
            return Ok(None);
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            frame = self.rx.recv() => frame,
        };

        match frame {
            Some(Frame::Item(item)) => Ok(Some(item)),
            Some(Frame::End) => {
                self.finished = true;
                Ok(None)
            }
            None => Err(Error::stream("producer closed the stream without finishing")),
        }
    }

    /// Drain the remaining records into a vector
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.recv(cancel).await? {
            items.push(item);
        }
        Ok(items)
    }
}
