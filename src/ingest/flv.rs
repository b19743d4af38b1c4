//! FLV ingestion
//!
//! Reads an FLV byte stream and turns it into codec reports and media
//! packets. Two kinds of source are supported:
//!
//! - `tcp://host:port`: a live FLV feed (for example
//!   `ffmpeg -re -i rtsp://... -c copy -f flv tcp://relay:9000?listen`)
//! - `file:///path/to/file.flv` or a bare path: replayed at real-time pace
//!
//! Track layout: video is track 0; audio is track 1, or track 0 when the
//! source has no video.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{Ingest, StreamFeed};
use crate::error::{Error, MediaError, Result};
use crate::media::flv::{validate_video_config, FlvReader, TagPayload};
use crate::media::{CodecDescriptor, CodecFamily, MediaPacket};
use crate::registry::entry::StreamConfig;

/// Tags to wait for a missing decoder configuration before reporting the
/// tracks that are known
const CODEC_SCAN_TAGS: usize = 64;

/// Where an FLV stream comes from
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Tcp(String),
    File(String),
}

impl Source {
    fn parse(url: &str) -> Result<Self> {
        if let Some(addr) = url.strip_prefix("tcp://") {
            return Ok(Source::Tcp(addr.trim_end_matches('/').to_string()));
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Source::File(path.to_string()));
        }
        if url.starts_with('/') || url.starts_with('.') || url.ends_with(".flv") {
            return Ok(Source::File(url.to_string()));
        }
        Err(Error::ActivationFailed(format!(
            "unsupported source url: {}",
            url
        )))
    }
}

/// Ingestion worker for FLV sources
#[derive(Debug, Clone)]
pub struct FlvIngest {
    connect_timeout: Duration,
}

impl Default for FlvIngest {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl FlvIngest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Ingest for FlvIngest {
    async fn run(&self, config: &StreamConfig, feed: StreamFeed) -> Result<()> {
        match Source::parse(&config.url)? {
            Source::Tcp(addr) => {
                let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| Error::ActivationFailed(format!("connect to {} timed out", addr)))?
                    .map_err(|e| Error::ActivationFailed(format!("connect to {}: {}", addr, e)))?;
                stream.set_nodelay(true)?;

                tracing::info!(stream = %feed.stream_id(), addr = %addr, "Connected to FLV source");
                relay(FlvReader::new(BufReader::new(stream)), &feed, false).await
            }
            Source::File(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| Error::ActivationFailed(format!("open {}: {}", path, e)))?;

                tracing::info!(stream = %feed.stream_id(), path = %path, "Replaying FLV file");
                relay(FlvReader::new(BufReader::new(file)), &feed, true).await
            }
        }
    }
}

/// Decoder configurations collected before the codec report
#[derive(Debug, Default)]
struct TrackScan {
    video_track: Option<u8>,
    audio_track: Option<u8>,
    video: Option<CodecDescriptor>,
    audio: Option<CodecDescriptor>,
    tags_seen: usize,
}

impl TrackScan {
    fn new(has_video: bool, has_audio: bool) -> Self {
        Self {
            video_track: has_video.then_some(0),
            audio_track: has_audio.then_some(if has_video { 1 } else { 0 }),
            ..Default::default()
        }
    }

    /// Every announced track is configured, or we gave up waiting
    fn ready(&self) -> bool {
        let complete = self.video_track.is_none() == self.video.is_none()
            && self.audio_track.is_none() == self.audio.is_none();
        let any = self.video.is_some() || self.audio.is_some();
        complete || (any && self.tags_seen >= CODEC_SCAN_TAGS)
    }

    fn descriptors(&self) -> Vec<CodecDescriptor> {
        self.video.iter().chain(self.audio.iter()).cloned().collect()
    }
}

/// Pump tags from `reader` into `feed` until the stream ends
async fn relay<R: AsyncRead + Unpin>(
    mut reader: FlvReader<R>,
    feed: &StreamFeed,
    paced: bool,
) -> Result<()> {
    let header = reader.read_header().await?;
    let mut scan = TrackScan::new(header.has_video, header.has_audio);
    let mut reported = false;
    let mut unsupported_logged = false;

    let started = Instant::now();
    let mut first_timestamp: Option<u32> = None;

    while let Some(tag) = reader.next_tag().await? {
        if paced {
            let first = *first_timestamp.get_or_insert(tag.timestamp);
            let offset = Duration::from_millis(tag.timestamp.saturating_sub(first) as u64);
            tokio::time::sleep_until(started + offset).await;
        }

        let payload = match tag.payload() {
            Ok(payload) => payload,
            Err(MediaError::UnsupportedCodec(codec)) => {
                if !unsupported_logged {
                    tracing::warn!(stream = %feed.stream_id(), codec = %codec, "Skipping unsupported track");
                    unsupported_logged = true;
                }
                continue;
            }
            Err(e) => {
                tracing::debug!(stream = %feed.stream_id(), error = %e, "Skipping malformed tag");
                continue;
            }
        };
        let time = Duration::from_millis(tag.timestamp as u64);
        scan.tags_seen += 1;

        match payload {
            TagPayload::VideoConfig { family, config } => {
                if !validate_video_config(family, &config) {
                    tracing::warn!(
                        stream = %feed.stream_id(),
                        codec = family.name(),
                        "Ignoring invalid decoder configuration"
                    );
                } else if let Some(track) = scan.video_track {
                    scan.video = Some(CodecDescriptor::new(track, family, config));
                }
            }
            TagPayload::AudioConfig { family, config } => {
                if let Some(track) = scan.audio_track {
                    scan.audio = Some(CodecDescriptor::new(track, family, config));
                }
            }
            TagPayload::Video {
                keyframe,
                composition_time,
                data,
                ..
            } => {
                if let (true, Some(track)) = (reported, scan.video_track) {
                    let cts = Duration::from_millis(composition_time.max(0) as u64);
                    feed.publish(
                        MediaPacket::video(track, time, data, keyframe).with_composition_time(cts),
                    );
                }
            }
            TagPayload::Audio { family, data } => {
                if let Some(track) = scan.audio_track {
                    if scan.audio.is_none() && family != CodecFamily::Aac {
                        scan.audio = Some(CodecDescriptor::bare(track, family));
                    }
                    if reported {
                        feed.publish(MediaPacket::audio(track, time, data));
                    }
                }
            }
            TagPayload::Skip => {}
        }

        if !reported && scan.ready() {
            feed.report_codecs(scan.descriptors());
            reported = true;
        }
    }

    tracing::info!(stream = %feed.stream_id(), "FLV source ended");
    Ok(())
}
