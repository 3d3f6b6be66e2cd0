//! `ByteSink` backed by a channel feeding an HTTP response body

use std::io;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::filesystem::streamer::{ByteSink, ConsumerGone};

pub type BodyReceiver = mpsc::Receiver<io::Result<Bytes>>;

pub struct ChannelSink {
    ready: Option<oneshot::Sender<u64>>,
    body: Option<mpsc::Sender<io::Result<Bytes>>>,
}

impl ChannelSink {
    /// Returns the sink, a receiver for the declared length, and the body
    /// channel. Dropping the body receiver is how a disconnect shows up.
    pub fn new(capacity: usize) -> (Self, oneshot::Receiver<u64>, BodyReceiver) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                ready: Some(ready_tx),
                body: Some(body_tx),
            },
            ready_rx,
            body_rx,
        )
    }
}

/// Wrap the body channel as a streaming response body.
///
/// An `Err` item makes hyper cut the connection instead of ending the body
/// cleanly, so a client never mistakes a partial file for a full one.
pub fn into_body(rx: BodyReceiver) -> Body {
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}

#[async_trait]
impl ByteSink for ChannelSink {
    fn declare_length(&mut self, len: u64) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(len);
        }
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), ConsumerGone> {
        match &self.body {
            Some(tx) => tx.send(Ok(chunk)).await.map_err(|_| ConsumerGone),
            None => Err(ConsumerGone),
        }
    }

    async fn consumer_gone(&self) {
        if let Some(tx) = &self.body {
            tx.closed().await;
        }
    }

    async fn close(&mut self) {
        self.body.take();
    }

    async fn abort(&mut self, error: io::Error) {
        if let Some(tx) = self.body.take() {
            let _ = tx.send(Err(error)).await;
        }
    }
}
