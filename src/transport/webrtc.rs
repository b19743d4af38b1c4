//! Peer-connection sink
//!
//! Answers a browser's SDP offer with one `TrackLocalStaticSample` per
//! negotiated track and writes samples to them. Pacing and packetization are
//! left to the WebRTC stack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use crate::media::h264::{avcc_to_annexb, AvcConfig};
use crate::media::{CodecDescriptor, CodecFamily, MediaPacket};
use crate::registry::StreamRegistry;
use crate::session::{CloseReason, Negotiated, ProtocolSink};

const STREAM_ID: &str = "live-relay";
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);
const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// ICE and port settings for new peer connections
#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    pub ice_servers: Vec<String>,
    pub ice_username: String,
    pub ice_credential: String,
    pub port_range: Option<(u16, u16)>,
}

impl PeerOptions {
    pub fn from_registry(registry: &StreamRegistry) -> Self {
        Self {
            ice_servers: registry.ice_servers().to_vec(),
            ice_username: registry.ice_username().to_string(),
            ice_credential: registry.ice_credential().to_string(),
            port_range: registry.webrtc_port_range(),
        }
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                username: self.ice_username.clone(),
                credential: self.ice_credential.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

struct PeerTrack {
    source: u8,
    family: CodecFamily,
    local: Arc<TrackLocalStaticSample>,
    avc: Option<AvcConfig>,
    last_time: Option<Duration>,
}

impl PeerTrack {
    fn new(codec: &CodecDescriptor) -> Result<Self> {
        let mime_type = match codec.family {
            CodecFamily::H264 => MIME_TYPE_H264,
            CodecFamily::PcmAlaw => MIME_TYPE_PCMA,
            CodecFamily::PcmMulaw => MIME_TYPE_PCMU,
            CodecFamily::Opus => MIME_TYPE_OPUS,
            other => {
                return Err(Error::NegotiationFailed(format!(
                    "{} is not supported by peer connections",
                    other
                )))
            }
        };

        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            format!("{}-{}", codec.kind(), codec.track),
            STREAM_ID.to_owned(),
        ));

        // An empty or broken avcC still streams; SPS/PPS then travel in-band
        let avc = match codec.family {
            CodecFamily::H264 if !codec.config.is_empty() => {
                AvcConfig::parse(codec.config.clone()).ok()
            }
            _ => None,
        };

        Ok(Self {
            source: codec.track,
            family: codec.family,
            local,
            avc,
            last_time: None,
        })
    }

    /// Sample payload and duration for one packet
    fn sample(&mut self, packet: &MediaPacket) -> Sample {
        let elapsed = self
            .last_time
            .and_then(|last| packet.time.checked_sub(last))
            .filter(|d| !d.is_zero());
        self.last_time = Some(packet.time);

        let (data, duration) = match self.family {
            CodecFamily::H264 => {
                let length_size = self.avc.as_ref().map_or(4, |c| c.nalu_length_size);
                let frame = avcc_to_annexb(&packet.data, length_size);
                let data = match &self.avc {
                    Some(avc) if packet.is_keyframe => {
                        let params = avc.parameter_sets_annexb();
                        let mut buf = BytesMut::with_capacity(params.len() + frame.len());
                        buf.put_slice(&params);
                        buf.put_slice(&frame);
                        buf.freeze()
                    }
                    _ => frame,
                };
                (data, elapsed.unwrap_or(DEFAULT_FRAME_DURATION))
            }
            // 8 kHz, one byte per sample
            CodecFamily::PcmAlaw | CodecFamily::PcmMulaw => (
                packet.data.clone(),
                Duration::from_micros(packet.data.len() as u64 * 125),
            ),
            _ => (packet.data.clone(), elapsed.unwrap_or(OPUS_FRAME_DURATION)),
        };

        Sample {
            data,
            duration,
            ..Default::default()
        }
    }
}

/// Writes negotiated tracks to a WebRTC peer connection
pub struct PeerSink {
    pc: Arc<RTCPeerConnection>,
    tracks: Vec<PeerTrack>,
    disconnected: CancellationToken,
    closed: bool,
}

impl PeerSink {
    /// Answer `offer_sdp` with the negotiated tracks
    ///
    /// Returns the sink and the answer SDP (ICE candidates gathered).
    pub async fn answer(
        options: &PeerOptions,
        negotiated: &Negotiated,
        offer_sdp: &str,
    ) -> Result<(Self, String)> {
        if negotiated.is_empty() {
            return Err(Error::NegotiationFailed(
                "no tracks supported by peer connection".into(),
            ));
        }
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
        let tracks = negotiated
            .tracks
            .iter()
            .map(PeerTrack::new)
            .collect::<Result<Vec<_>>>()?;

        let pc = new_peer_connection(options).await?;
        let disconnected = CancellationToken::new();
        let token = disconnected.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(state = %state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed
            ) {
                token.cancel();
            }
            Box::pin(async {})
        }));

        let mut sink = Self {
            pc,
            tracks,
            disconnected,
            closed: false,
        };

        match sink.complete_answer(offer).await {
            Ok(answer) => Ok((sink, answer)),
            Err(e) => {
                sink.shutdown().await;
                Err(e)
            }
        }
    }

    async fn complete_answer(&self, offer: RTCSessionDescription) -> Result<String> {
        self.pc.set_remote_description(offer).await?;

        for track in &self.tracks {
            let sender = self
                .pc
                .add_track(Arc::clone(&track.local) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // Drain RTCP so interceptors keep running
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        let answer = self.pc.create_answer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| Error::NegotiationFailed("no local description".into()))
    }

    /// Cancelled when the peer connection fails or closes
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pc.close().await {
            tracing::debug!(error = %e, "Peer connection close failed");
        }
    }
}

async fn new_peer_connection(options: &PeerOptions) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let mut setting_engine = SettingEngine::default();
    if let Some((min, max)) = options.port_range {
        let ephemeral = EphemeralUDP::new(min, max).map_err(|e| {
            Error::NegotiationFailed(format!("invalid UDP port range {}-{}: {}", min, max, e))
        })?;
        setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
    }

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build();

    Ok(Arc::new(api.new_peer_connection(options.configuration()).await?))
}

#[async_trait]
impl ProtocolSink for PeerSink {
    async fn write_packet(&mut self, packet: &MediaPacket) -> Result<()> {
        let Some(track) = self.tracks.iter_mut().find(|t| t.source == packet.track) else {
            return Ok(());
        };

        let sample = track.sample(packet);
        track
            .local
            .write_sample(&sample)
            .await
            .map_err(|e| Error::TransportWrite(e.to_string()))
    }

    async fn close(&mut self, reason: &CloseReason) {
        tracing::debug!(reason = %reason, "Closing peer connection");
        self.shutdown().await;
    }
}

impl Drop for PeerSink {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pc = Arc::clone(&self.pc);
            handle.spawn(async move {
                let _ = pc.close().await;
            });
        }
    }
}

impl std::fmt::Debug for PeerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSink")
            .field("tracks", &self.tracks.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

    use super::*;
    use crate::session::{negotiate, Transport};

    /// A recv-only video offer, as a browser would send it
    async fn viewer_offer() -> String {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap();
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let sdp = pc.local_description().await.unwrap().sdp;
        pc.close().await.unwrap();
        sdp
    }

    fn h264() -> Negotiated {
        negotiate(
            "cam",
            &[CodecDescriptor::new(0, CodecFamily::H264, avcc())],
            Transport::PeerConnection,
        )
    }

    fn sample_bytes(track: &mut PeerTrack, packet: &MediaPacket) -> (Bytes, Duration) {
        let sample = track.sample(packet);
        (sample.data, sample.duration)
    }

    fn avcc() -> Bytes {
        Bytes::from_static(&[
            0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00,
            0x02, 0x68, 0xCE,
        ])
    }

    #[test]
    fn test_h264_keyframe_carries_parameter_sets() {
        let mut track = PeerTrack::new(&CodecDescriptor::new(0, CodecFamily::H264, avcc())).unwrap();
        let frame = Bytes::from_static(&[0, 0, 0, 2, 0x65, 0x88]);

        let key = MediaPacket::video(0, Duration::ZERO, frame.clone(), true);
        let (data, duration) = sample_bytes(&mut track, &key);
        assert_eq!(
            &data[..],
            &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1E, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88]
        );
        assert_eq!(duration, DEFAULT_FRAME_DURATION);

        let delta = MediaPacket::video(0, Duration::from_millis(40), frame, false);
        let (data, duration) = sample_bytes(&mut track, &delta);
        assert_eq!(&data[..], &[0, 0, 0, 1, 0x65, 0x88]);
        assert_eq!(duration, Duration::from_millis(40));
    }

    #[test]
    fn test_g711_duration_from_length() {
        let mut track = PeerTrack::new(&CodecDescriptor::bare(1, CodecFamily::PcmMulaw)).unwrap();
        let packet = MediaPacket::audio(1, Duration::ZERO, Bytes::from(vec![0xFF; 160]));
        let (_, duration) = sample_bytes(&mut track, &packet);
        assert_eq!(duration, Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_unsupported_track() {
        assert!(matches!(
            PeerTrack::new(&CodecDescriptor::bare(0, CodecFamily::Aac)),
            Err(Error::NegotiationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_offer() {
        let negotiated = negotiate(
            "cam",
            &[CodecDescriptor::new(0, CodecFamily::H264, avcc())],
            Transport::PeerConnection,
        );
        let err = PeerSink::answer(&PeerOptions::default(), &negotiated, "not an sdp")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));
    }

    #[tokio::test]
    async fn test_no_tracks() {
        let negotiated = negotiate(
            "cam",
            &[CodecDescriptor::bare(0, CodecFamily::H265)],
            Transport::PeerConnection,
        );
        let err = PeerSink::answer(&PeerOptions::default(), &negotiated, "v=0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));
    }

    #[tokio::test]
    async fn test_answer_uses_port_range() {
        let options = PeerOptions {
            port_range: Some((46000, 46100)),
            ..Default::default()
        };
        let offer = viewer_offer().await;

        let (mut sink, answer) = PeerSink::answer(&options, &h264(), &offer).await.unwrap();
        assert!(answer.contains("m=video"));

        let ports: Vec<u16> = answer
            .lines()
            .filter(|line| line.starts_with("a=candidate:"))
            .filter(|line| line.to_ascii_lowercase().contains(" udp "))
            .filter_map(|line| line.split_whitespace().nth(5)?.parse().ok())
            .collect();
        for port in ports {
            assert!((46000..=46100).contains(&port), "candidate port {}", port);
        }

        sink.close(&CloseReason::ClientDisconnected).await;
    }

    #[tokio::test]
    async fn test_inverted_port_range_is_rejected() {
        let options = PeerOptions {
            port_range: Some((5000, 4000)),
            ..Default::default()
        };
        let offer = viewer_offer().await;

        let err = PeerSink::answer(&options, &h264(), &offer).await.unwrap_err();
        match err {
            Error::NegotiationFailed(msg) => assert!(msg.contains("5000-4000")),
            other => panic!("expected negotiation failure, got {:?}", other),
        }
    }
}
