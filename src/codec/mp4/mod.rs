//! Playback index over an ISO BMFF file. Box parsing is done by the `mp4`
//! crate; this module picks the H.264 and AAC tracks, resolves their sample
//! tables to file offsets and merges them in decode order.

mod error;
pub mod sample_table;

use {
    self::sample_table::{read_samples, Sample},
    bytes::Bytes,
    mp4::{Mp4Reader, Mp4Track, TrackType, WriteBox, HEADER_SIZE},
    rml_rtmp::sessions::StreamMetadata,
    std::{
        fs,
        io::{BufReader, Cursor, Read, Seek, SeekFrom},
        path::Path,
    },
};

pub use self::error::Mp4Error;

// FLV CodecID / SoundFormat values carried in onMetaData.
const FLV_CODEC_AVC: u32 = 7;
const FLV_CODEC_AAC: u32 = 10;

/// Cheap container sniff on the first bytes of an upload.
pub fn is_mp4(prefix: &[u8]) -> bool {
    prefix.len() >= 12 && &prefix[4..8] == b"ftyp"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone)]
pub enum CodecConfig {
    Avc {
        width: u16,
        height: u16,
        avcc: Bytes,
    },
    Aac {
        sample_rate: u32,
        channels: u16,
        audio_specific_config: Bytes,
    },
}

#[derive(Debug, Clone)]
pub struct Track {
    pub kind: TrackKind,
    pub timescale: u32,
    pub codec: CodecConfig,
    pub samples: Vec<Sample>,
    /// End of the last sample, in timescale units.
    pub end: u64,
}

impl Track {
    fn to_ms(&self, value: i64) -> i64 {
        (value as i128 * 1000 / self.timescale as i128) as i64
    }

    pub fn duration_ms(&self) -> u64 {
        self.to_ms(self.end as i64).max(0) as u64
    }
}

/// One entry of the interleaved playback index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub kind: TrackKind,
    pub offset: u64,
    pub size: u32,
    pub dts_ms: u64,
    pub cts_ms: i32,
    pub keyframe: bool,
}

#[derive(Debug, Clone)]
pub struct Movie {
    pub video: Track,
    pub audio: Option<Track>,
}

impl Movie {
    /// Parses a whole file held in memory.
    pub fn from_bytes(file: &[u8]) -> Result<Self, Mp4Error> {
        if !is_mp4(file) {
            return Err(Mp4Error::NotMp4);
        }
        let reader = Mp4Reader::read_header(Cursor::new(file), file.len() as u64)?;
        Self::from_reader(&reader)
    }

    /// Reads the header of a file on disk, seeking over `mdat`. Blocking.
    pub fn open(path: &Path) -> Result<Self, Mp4Error> {
        let mut file = fs::File::open(path)?;
        let size = file.metadata()?.len();
        let mut prefix = Vec::with_capacity(12);
        (&mut file).take(12).read_to_end(&mut prefix)?;
        if !is_mp4(&prefix) {
            return Err(Mp4Error::NotMp4);
        }
        file.seek(SeekFrom::Start(0))?;
        let reader = Mp4Reader::read_header(BufReader::new(file), size)?;
        Self::from_reader(&reader)
    }

    pub fn from_reader<R: Read + Seek>(reader: &Mp4Reader<R>) -> Result<Self, Mp4Error> {
        if reader.is_fragmented() {
            return Err(Mp4Error::Fragmented);
        }

        let mut tracks: Vec<&Mp4Track> = reader.tracks().values().collect();
        tracks.sort_by_key(|track| track.track_id());

        let mut video = None;
        let mut audio = None;
        for track in tracks {
            match read_track(track)? {
                Some(track) if track.kind == TrackKind::Video && video.is_none() => {
                    video = Some(track)
                }
                Some(track) if track.kind == TrackKind::Audio && audio.is_none() => {
                    audio = Some(track)
                }
                Some(track) => log::debug!("Ignoring extra {:?} track", track.kind),
                None => {}
            }
        }

        let video = video.ok_or(Mp4Error::NoVideoTrack)?;
        if video.samples.is_empty() || video.end == 0 {
            return Err(Mp4Error::EmptyMedia);
        }
        if !video.samples.iter().any(|sample| sample.keyframe) {
            return Err(Mp4Error::InconsistentSampleTable("video track has no sync samples"));
        }
        Ok(Self { video, audio })
    }

    pub fn duration_ms(&self) -> u64 {
        let audio = self.audio.as_ref().map(Track::duration_ms).unwrap_or(0);
        self.video.duration_ms().max(audio)
    }

    pub fn frame_rate(&self) -> f32 {
        let seconds = self.video.duration_ms() as f32 / 1000.0;
        self.video.samples.len() as f32 / seconds
    }

    /// Video and audio samples merged in decode order.
    pub fn frames(&self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self
            .audio
            .iter()
            .chain(std::iter::once(&self.video))
            .flat_map(|track| {
                track.samples.iter().map(move |sample| Frame {
                    kind: track.kind,
                    offset: sample.offset,
                    size: sample.size,
                    dts_ms: track.to_ms(sample.dts as i64) as u64,
                    cts_ms: track.to_ms(sample.cts_offset) as i32,
                    keyframe: sample.keyframe,
                })
            })
            .collect();
        // stable: audio stays ahead of video at equal timestamps
        frames.sort_by_key(|frame| frame.dts_ms);
        frames
    }

    pub fn stream_metadata(&self) -> StreamMetadata {
        let mut metadata = StreamMetadata::new();
        if let CodecConfig::Avc { width, height, .. } = self.video.codec {
            metadata.video_width = Some(width as u32);
            metadata.video_height = Some(height as u32);
            metadata.video_codec_id = Some(FLV_CODEC_AVC);
            metadata.video_frame_rate = Some(self.frame_rate());
        }
        if let Some(CodecConfig::Aac {
            sample_rate,
            channels,
            ..
        }) = self.audio.as_ref().map(|track| &track.codec)
        {
            metadata.audio_codec_id = Some(FLV_CODEC_AAC);
            metadata.audio_sample_rate = Some(*sample_rate);
            metadata.audio_channels = Some(*channels as u32);
            metadata.audio_is_stereo = Some(*channels == 2);
        }
        metadata.encoder = Some(concat!("xrelay/", env!("CARGO_PKG_VERSION")).to_string());
        metadata
    }
}

fn read_track(track: &Mp4Track) -> Result<Option<Track>, Mp4Error> {
    let kind = match track.track_type() {
        Ok(TrackType::Video) => TrackKind::Video,
        Ok(TrackType::Audio) => TrackKind::Audio,
        _ => return Ok(None),
    };
    let stsd = &track.trak.mdia.minf.stbl.stsd;
    let codec = match kind {
        TrackKind::Video => match &stsd.avc1 {
            Some(avc1) => {
                let mut record = Vec::new();
                avc1.avcc.write_box(&mut record)?;
                Some(CodecConfig::Avc {
                    width: avc1.width,
                    height: avc1.height,
                    avcc: Bytes::from(record).slice(HEADER_SIZE as usize..),
                })
            }
            None => None,
        },
        TrackKind::Audio => stsd.mp4a.as_ref().and_then(|mp4a| {
            let esds = mp4a.esds.as_ref()?;
            let config = &esds.es_desc.dec_config.dec_specific;
            // escape-coded object types do not fit the two-byte form
            if config.profile == 0 || config.profile > 30 {
                return None;
            }
            Some(CodecConfig::Aac {
                sample_rate: mp4a.samplerate.value() as u32,
                channels: mp4a.channelcount,
                audio_specific_config: Bytes::from(vec![
                    config.profile << 3 | config.freq_index >> 1,
                    config.freq_index << 7 | config.chan_conf << 3,
                ]),
            })
        }),
    };
    let Some(codec) = codec else {
        log::warn!("Skipping {:?} track with unsupported codec", kind);
        return Ok(None);
    };
    let timescale = track.timescale();
    if timescale == 0 {
        return Err(Mp4Error::InconsistentSampleTable("mdhd timescale is zero"));
    }

    let (samples, end) = read_samples(track)?;
    Ok(Some(Track {
        kind,
        timescale,
        codec,
        samples,
        end,
    }))
}
