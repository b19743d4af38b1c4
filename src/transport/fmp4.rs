//! Fragmented MP4 muxer for Media Source Extensions
//!
//! Produces one init segment (`ftyp` + `moov`) describing every negotiated
//! track, then one `moof` + `mdat` pair per packet.
//!
//! ```text
//! init:      ftyp | moov { mvhd, trak*, mvex { trex* } }
//! fragment:  moof { mfhd, traf { tfhd, tfdt, trun } } | mdat
//! ```
//!
//! Video samples keep their length-prefixed (AVCC/HVCC) layout, which is
//! exactly what ISO BMFF expects.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;
use crate::media::{
    AudioSpecificConfig, AvcConfig, CodecDescriptor, CodecFamily, HevcConfig, MediaPacket,
};

const VIDEO_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1000;

/// Default video sample duration (30 fps) when only one sample is known
const DEFAULT_VIDEO_DURATION: u32 = VIDEO_TIMESCALE / 30;

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_COMPOSITION_OFFSET: u32 = 0x000800;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

const UNIT_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Decoder-specific part of a muxed track
#[derive(Debug, Clone)]
enum TrackFormat {
    Avc { config: AvcConfig, width: u16, height: u16 },
    Hevc { config: HevcConfig },
    Aac { config: AudioSpecificConfig },
}

#[derive(Debug, Clone)]
struct MuxTrack {
    /// 1-based ISO BMFF track id
    id: u32,
    /// Source track index
    source: u8,
    timescale: u32,
    format: TrackFormat,
    last_dts: Option<u64>,
    last_duration: u32,
}

impl MuxTrack {
    fn new(id: u32, codec: &CodecDescriptor) -> Result<Self, MediaError> {
        let format = match codec.family {
            CodecFamily::H264 => {
                let config = AvcConfig::parse(codec.config.clone())?;
                let (width, height) = config.dimensions().unwrap_or((0, 0));
                TrackFormat::Avc {
                    config,
                    width,
                    height,
                }
            }
            CodecFamily::H265 => TrackFormat::Hevc {
                config: HevcConfig::parse(codec.config.clone())?,
            },
            CodecFamily::Aac => TrackFormat::Aac {
                config: AudioSpecificConfig::parse(codec.config.clone())?,
            },
            other => return Err(MediaError::UnsupportedCodec(other.to_string())),
        };

        let (timescale, last_duration) = match &format {
            TrackFormat::Aac { config } => {
                (config.sampling_frequency, config.samples_per_frame())
            }
            _ => (VIDEO_TIMESCALE, DEFAULT_VIDEO_DURATION),
        };

        Ok(Self {
            id,
            source: codec.track,
            timescale,
            format,
            last_dts: None,
            last_duration,
        })
    }

    fn is_video(&self) -> bool {
        !matches!(self.format, TrackFormat::Aac { .. })
    }

    fn codec_string(&self) -> String {
        match &self.format {
            TrackFormat::Avc { config, .. } => config.codec_string(),
            TrackFormat::Hevc { config } => config.codec_string(),
            TrackFormat::Aac { config } => config.codec_string(),
        }
    }

    fn ticks(&self, time: Duration) -> u64 {
        (time.as_nanos() * self.timescale as u128 / 1_000_000_000) as u64
    }
}

/// Builds the init segment and media fragments for a set of tracks
#[derive(Debug)]
pub struct FragmentedMuxer {
    tracks: Vec<MuxTrack>,
    sequence: u32,
}

impl FragmentedMuxer {
    /// Create a muxer for the given tracks (H.264, H.265, AAC)
    pub fn new(codecs: &[CodecDescriptor]) -> Result<Self, MediaError> {
        if codecs.is_empty() {
            return Err(MediaError::NoTracks);
        }

        let tracks = codecs
            .iter()
            .enumerate()
            .map(|(i, codec)| MuxTrack::new(i as u32 + 1, codec))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tracks,
            sequence: 0,
        })
    }

    /// MSE codecs string, e.g. `avc1.64001f,mp4a.40.2`
    pub fn codecs(&self) -> String {
        self.tracks
            .iter()
            .map(MuxTrack::codec_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Number of fragments produced so far
    pub fn fragments(&self) -> u32 {
        self.sequence
    }

    /// The `ftyp` + `moov` init segment
    pub fn init_segment(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1024);

        write_box(&mut buf, b"ftyp", |b| {
            b.put_slice(b"iso5");
            b.put_u32(0x200);
            for brand in [b"iso5", b"iso6", b"mp41"] {
                b.put_slice(brand);
            }
        });

        write_box(&mut buf, b"moov", |b| {
            write_full_box(b, b"mvhd", 0, 0, |b| {
                b.put_u32(0); // creation time
                b.put_u32(0); // modification time
                b.put_u32(MOVIE_TIMESCALE);
                b.put_u32(0); // duration
                b.put_u32(0x0001_0000); // rate 1.0
                b.put_u16(0x0100); // volume 1.0
                b.put_bytes(0, 10);
                put_matrix(b);
                b.put_bytes(0, 24);
                b.put_u32(self.tracks.len() as u32 + 1);
            });

            for track in &self.tracks {
                write_trak(b, track);
            }

            write_box(b, b"mvex", |b| {
                for track in &self.tracks {
                    write_full_box(b, b"trex", 0, 0, |b| {
                        b.put_u32(track.id);
                        b.put_u32(1); // sample description index
                        b.put_u32(0);
                        b.put_u32(0);
                        b.put_u32(0);
                    });
                }
            });
        });

        buf.freeze()
    }

    /// Wrap one packet in a `moof` + `mdat` fragment
    ///
    /// Returns `None` for packets of tracks this muxer was not built with.
    pub fn fragment(&mut self, packet: &MediaPacket) -> Option<Bytes> {
        let index = self.tracks.iter().position(|t| t.source == packet.track)?;
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;

        let track = &mut self.tracks[index];
        let dts = track.ticks(packet.time);
        let duration = match track.last_dts {
            Some(last) if dts > last => (dts - last).min(u32::MAX as u64) as u32,
            _ => track.last_duration,
        };
        track.last_dts = Some(dts);
        track.last_duration = duration;

        let composition_offset = track.ticks(packet.composition_time) as u32;
        let flags = if !track.is_video() || packet.is_keyframe {
            SAMPLE_FLAGS_SYNC
        } else {
            SAMPLE_FLAGS_NON_SYNC
        };

        let mut buf = BytesMut::with_capacity(packet.data.len() + 128);
        let mut data_offset_at = 0;

        write_box(&mut buf, b"moof", |b| {
            write_full_box(b, b"mfhd", 0, 0, |b| b.put_u32(sequence));
            write_box(b, b"traf", |b| {
                write_full_box(b, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, |b| {
                    b.put_u32(track.id);
                });
                write_full_box(b, b"tfdt", 1, 0, |b| b.put_u64(dts));
                let trun_flags = TRUN_DATA_OFFSET
                    | TRUN_SAMPLE_DURATION
                    | TRUN_SAMPLE_SIZE
                    | TRUN_SAMPLE_FLAGS
                    | TRUN_COMPOSITION_OFFSET;
                write_full_box(b, b"trun", 0, trun_flags, |b| {
                    b.put_u32(1); // sample count
                    data_offset_at = b.len();
                    b.put_u32(0); // data offset, patched below
                    b.put_u32(duration);
                    b.put_u32(packet.data.len() as u32);
                    b.put_u32(flags);
                    b.put_u32(composition_offset);
                });
            });
        });

        // Sample data starts right after the mdat header
        let data_offset = (buf.len() + 8) as u32;
        buf[data_offset_at..data_offset_at + 4].copy_from_slice(&data_offset.to_be_bytes());

        buf.put_u32(packet.data.len() as u32 + 8);
        buf.put_slice(b"mdat");
        buf.put_slice(&packet.data);

        Some(buf.freeze())
    }
}

fn write_box(buf: &mut BytesMut, kind: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, kind, |b| {
        b.put_u32((version as u32) << 24 | (flags & 0x00FF_FFFF));
        body(b);
    });
}

fn put_matrix(buf: &mut BytesMut) {
    for v in UNIT_MATRIX {
        buf.put_u32(v);
    }
}

fn write_trak(buf: &mut BytesMut, track: &MuxTrack) {
    let (width, height) = match &track.format {
        TrackFormat::Avc { width, height, .. } => (*width, *height),
        _ => (0, 0),
    };

    write_box(buf, b"trak", |b| {
        // enabled | in movie
        write_full_box(b, b"tkhd", 0, 0x000003, |b| {
            b.put_u32(0);
            b.put_u32(0);
            b.put_u32(track.id);
            b.put_u32(0);
            b.put_u32(0); // duration
            b.put_bytes(0, 8);
            b.put_u16(0); // layer
            b.put_u16(0); // alternate group
            b.put_u16(if track.is_video() { 0 } else { 0x0100 });
            b.put_u16(0);
            put_matrix(b);
            b.put_u32((width as u32) << 16);
            b.put_u32((height as u32) << 16);
        });

        write_box(b, b"mdia", |b| {
            write_full_box(b, b"mdhd", 0, 0, |b| {
                b.put_u32(0);
                b.put_u32(0);
                b.put_u32(track.timescale);
                b.put_u32(0);
                b.put_u16(0x55C4); // "und"
                b.put_u16(0);
            });

            let (handler, name): (&[u8; 4], &[u8]) = if track.is_video() {
                (b"vide", b"VideoHandler\0")
            } else {
                (b"soun", b"SoundHandler\0")
            };
            write_full_box(b, b"hdlr", 0, 0, |b| {
                b.put_u32(0);
                b.put_slice(handler);
                b.put_bytes(0, 12);
                b.put_slice(name);
            });

            write_box(b, b"minf", |b| {
                if track.is_video() {
                    write_full_box(b, b"vmhd", 0, 1, |b| b.put_bytes(0, 8));
                } else {
                    write_full_box(b, b"smhd", 0, 0, |b| b.put_u32(0));
                }

                write_box(b, b"dinf", |b| {
                    write_full_box(b, b"dref", 0, 0, |b| {
                        b.put_u32(1);
                        write_full_box(b, b"url ", 0, 1, |_| {});
                    });
                });

                write_box(b, b"stbl", |b| {
                    write_full_box(b, b"stsd", 0, 0, |b| {
                        b.put_u32(1);
                        write_sample_entry(b, track, width, height);
                    });
                    for kind in [b"stts", b"stsc", b"stco"] {
                        write_full_box(b, kind, 0, 0, |b| b.put_u32(0));
                    }
                    write_full_box(b, b"stsz", 0, 0, |b| {
                        b.put_u32(0);
                        b.put_u32(0);
                    });
                });
            });
        });
    });
}

fn write_sample_entry(buf: &mut BytesMut, track: &MuxTrack, width: u16, height: u16) {
    match &track.format {
        TrackFormat::Avc { config, .. } => {
            write_box(buf, b"avc1", |b| {
                put_visual_entry(b, width, height);
                write_box(b, b"avcC", |b| b.put_slice(&config.raw));
            });
        }
        TrackFormat::Hevc { config } => {
            write_box(buf, b"hvc1", |b| {
                put_visual_entry(b, width, height);
                write_box(b, b"hvcC", |b| b.put_slice(&config.raw));
            });
        }
        TrackFormat::Aac { config } => {
            write_box(buf, b"mp4a", |b| {
                b.put_bytes(0, 6);
                b.put_u16(1); // data reference index
                b.put_bytes(0, 8);
                b.put_u16(config.channels().max(1) as u16);
                b.put_u16(16); // sample size
                b.put_u32(0);
                b.put_u32(config.sampling_frequency.min(0xFFFF) << 16);
                write_esds(b, &config.raw);
            });
        }
    }
}

fn put_visual_entry(buf: &mut BytesMut, width: u16, height: u16) {
    buf.put_bytes(0, 6);
    buf.put_u16(1); // data reference index
    buf.put_bytes(0, 16);
    buf.put_u16(width);
    buf.put_u16(height);
    buf.put_u32(0x0048_0000); // 72 dpi
    buf.put_u32(0x0048_0000);
    buf.put_u32(0);
    buf.put_u16(1); // frame count
    buf.put_bytes(0, 32); // compressor name
    buf.put_u16(0x0018); // depth
    buf.put_i16(-1);
}

fn write_esds(buf: &mut BytesMut, asc: &[u8]) {
    let dsi_len = asc.len();
    let dcd_len = 13 + 2 + dsi_len;
    let es_len = 3 + 2 + dcd_len + 3;

    write_full_box(buf, b"esds", 0, 0, |b| {
        b.put_u8(0x03); // ES_Descriptor
        b.put_u8(es_len as u8);
        b.put_u16(1); // ES_ID
        b.put_u8(0);

        b.put_u8(0x04); // DecoderConfigDescriptor
        b.put_u8(dcd_len as u8);
        b.put_u8(0x40); // MPEG-4 audio
        b.put_u8(0x15); // audio stream
        b.put_bytes(0, 3); // buffer size
        b.put_u32(0); // max bitrate
        b.put_u32(0); // avg bitrate

        b.put_u8(0x05); // DecoderSpecificInfo
        b.put_u8(dsi_len as u8);
        b.put_slice(asc);

        b.put_u8(0x06); // SLConfigDescriptor
        b.put_u8(1);
        b.put_u8(0x02);
    });
}
