#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;

use live_relay::error::{Error, Result};
use live_relay::signaling::{ChannelWriter, Frame};
use live_relay::{
    AppState, CodecDescriptor, CodecFamily, Ingest, MediaPacket, RegistryConfig, ServerConfig,
    StreamConfig, StreamFeed, StreamRegistry,
};

/// Reports a fixed codec set (or nothing) and then idles
pub struct StaticIngest {
    pub codecs: Option<Vec<CodecDescriptor>>,
}

#[async_trait]
impl Ingest for StaticIngest {
    async fn run(&self, _config: &StreamConfig, feed: StreamFeed) -> Result<()> {
        if let Some(codecs) = &self.codecs {
            feed.report_codecs(codecs.clone());
        }
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn avcc() -> Bytes {
    Bytes::from_static(&[
        0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02,
        0x68, 0xCE,
    ])
}

pub fn h264_aac() -> Vec<CodecDescriptor> {
    vec![
        CodecDescriptor::new(0, CodecFamily::H264, avcc()),
        CodecDescriptor::new(1, CodecFamily::Aac, Bytes::from_static(&[0x12, 0x10])),
    ]
}

pub fn server_config() -> ServerConfig {
    ServerConfig::default()
        .liveness_window(Duration::from_millis(300))
        .write_deadline(Duration::from_millis(200))
        .registry(RegistryConfig::default().codec_wait(Duration::from_millis(200)))
}

/// State with one stream, `cam`, backed by `codecs`
pub async fn state_with(codecs: Option<Vec<CodecDescriptor>>, config: ServerConfig) -> AppState {
    let ingest = Arc::new(StaticIngest { codecs });
    let registry = Arc::new(StreamRegistry::new(config.registry.clone(), ingest));
    registry
        .add_stream("cam", StreamConfig::new("tcp://127.0.0.1:9000").on_demand(true))
        .await;
    AppState::new(registry, config)
}

pub async fn state() -> AppState {
    state_with(Some(h264_aac()), server_config()).await
}

/// A channel writer whose frames land in a receiver
pub fn frame_channel(capacity: usize, deadline: Duration) -> (ChannelWriter, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sink = tx.sink_map_err(|e| Error::TransportWrite(e.to_string()));
    (ChannelWriter::new(sink, deadline), rx)
}

pub fn keyframe(n: u64) -> MediaPacket {
    MediaPacket::video(
        0,
        Duration::from_millis(n * 40),
        Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]),
        true,
    )
}

/// Wait until `stream` has `count` subscribers
pub async fn wait_for_subscribers(state: &AppState, stream: &str, count: usize) {
    let hub = state.registry.hub();
    for _ in 0..200 {
        if hub.subscriber_count(stream) == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} subscribers on {}, have {}",
        count,
        stream,
        hub.subscriber_count(stream)
    );
}
