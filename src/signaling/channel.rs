//! Shared writer for a signaling channel
//!
//! Every session spawned from one channel writes through the same
//! [`ChannelWriter`]. Writes are serialized by an async mutex and each one
//! (waiting for the lock included) is bounded by the write deadline, so a
//! client that stops reading surfaces as a `TransportWrite` error instead of
//! a stuck session.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Default per-write deadline
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

/// One inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Bytes),
    Close,
}

impl Inbound {
    /// Map an axum WebSocket message. Pings and pongs map to `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Inbound::Text(text.as_str().to_owned())),
            Message::Binary(data) => Some(Inbound::Binary(data)),
            Message::Close(_) => Some(Inbound::Close),
            Message::Ping(_) | Message::Pong(_) => None,
        }
    }
}

type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Cloneable, deadline-bounded writer half of a signaling channel
#[derive(Clone)]
pub struct ChannelWriter {
    sink: Arc<Mutex<FrameSink>>,
    write_deadline: Duration,
    closed: CancellationToken,
}

impl ChannelWriter {
    /// Wrap any frame sink
    pub fn new<S>(sink: S, write_deadline: Duration) -> Self
    where
        S: Sink<Frame, Error = Error> + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::pin(sink))),
            write_deadline,
            closed: CancellationToken::new(),
        }
    }

    /// Wrap the sending half of an axum WebSocket
    pub fn websocket(sink: SplitSink<WebSocket, Message>, write_deadline: Duration) -> Self {
        let sink = sink
            .sink_map_err(|e| Error::TransportWrite(e.to_string()))
            .with(|frame: Frame| futures::future::ready(Ok::<_, Error>(Message::from(frame))));
        Self::new(sink, write_deadline)
    }

    pub fn write_deadline(&self) -> Duration {
        self.write_deadline
    }

    /// Send one frame within the write deadline
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::TransportWrite("channel closed".into()));
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(frame).await
        };

        match tokio::time::timeout(self.write_deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(Error::TransportWrite("write deadline exceeded".into())),
        }
    }

    /// Serialize `message` and send it as a text frame
    pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let text =
            serde_json::to_string(message).map_err(|e| Error::TransportWrite(e.to_string()))?;
        self.send(Frame::Text(text)).await
    }

    /// Flush and close the sink. Later sends fail.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let close = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(self.write_deadline, close).await {
            tracing::debug!(error = %e, "Signaling channel close failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("write_deadline", &self.write_deadline)
            .field("closed", &self.is_closed())
            .finish()
    }
}
