use {
    crate::{
        codec::{
            flv::{AudioData, VideoData},
            mp4::{CodecConfig, Frame, Movie, Mp4Error, TrackKind},
        },
        packet::Packet,
    },
    bytes::Bytes,
    rml_rtmp::sessions::StreamMetadata,
    std::{
        io::{self, SeekFrom},
        path::Path,
    },
    tokio::{
        fs::File,
        io::{AsyncReadExt, AsyncSeekExt},
    },
};

const MAX_SAMPLE_SIZE: u32 = 64 << 20;

/// Reads an MP4 file sample by sample as RTMP-ready packets.
///
/// With looping enabled the file is replayed forever and every replay is
/// shifted by the accumulated source duration, so timestamps never go back.
pub struct Source {
    file: File,
    movie: Movie,
    frames: Vec<Frame>,
    position: usize,
    looping: bool,
    loop_offset: u64,
    loops: u64,
    last_timestamp: u64,
    await_keyframe: bool,
}

impl Source {
    pub async fn open<P: AsRef<Path>>(path: P, looping: bool) -> Result<Self, Mp4Error> {
        let header_path = path.as_ref().to_path_buf();
        let movie = tokio::task::spawn_blocking(move || Movie::open(&header_path))
            .await
            .map_err(io::Error::from)??;
        let file = File::open(path.as_ref()).await?;
        let frames = movie.frames();
        log::debug!(
            "Opened {}: {} frames, {}ms",
            path.as_ref().display(),
            frames.len(),
            movie.duration_ms()
        );

        Ok(Self {
            file,
            movie,
            frames,
            position: 0,
            looping,
            loop_offset: 0,
            loops: 0,
            last_timestamp: 0,
            await_keyframe: false,
        })
    }

    pub fn duration_ms(&self) -> u64 {
        self.movie.duration_ms()
    }

    /// Completed replays of the file.
    pub fn loops(&self) -> u64 {
        self.loops
    }

    /// Timestamp of the last packet handed out.
    pub fn position_ms(&self) -> u64 {
        self.last_timestamp
    }

    pub fn metadata(&self) -> StreamMetadata {
        self.movie.stream_metadata()
    }

    /// AVC and AAC decoder configuration, stamped at the current position.
    pub fn sequence_headers(&self) -> Vec<Packet> {
        let timestamp = self.last_timestamp;
        let mut headers = Vec::with_capacity(2);
        if let CodecConfig::Avc { avcc, .. } = &self.movie.video.codec {
            headers.push(Packet::new_video(timestamp, &VideoData::sequence_header(avcc.clone())));
        }
        if let Some(CodecConfig::Aac {
            audio_specific_config,
            ..
        }) = self.movie.audio.as_ref().map(|track| &track.codec)
        {
            headers.push(Packet::new_audio(
                timestamp,
                &AudioData::sequence_header(audio_specific_config.clone()),
            ));
        }
        headers
    }

    /// Drops video until the next keyframe. Used after a reconnect, when the
    /// decoder on the other side has lost its reference frames.
    pub fn resume_at_keyframe(&mut self) {
        self.await_keyframe = true;
    }

    /// Next packet in decode order; `None` at the end of a non-looping file.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, Mp4Error> {
        loop {
            if self.position == self.frames.len() {
                if !self.looping {
                    return Ok(None);
                }
                self.position = 0;
                self.loops += 1;
                self.loop_offset += self.movie.duration_ms();
                log::debug!("Rewinding source, replay {}", self.loops);
            }

            let frame = self.frames[self.position];
            self.position += 1;
            if frame.kind == TrackKind::Video && self.await_keyframe {
                if !frame.keyframe {
                    continue;
                }
                self.await_keyframe = false;
            }

            let body = self.read_sample(&frame).await?;
            let timestamp = frame.dts_ms + self.loop_offset;
            self.last_timestamp = timestamp;
            let packet = match frame.kind {
                TrackKind::Video => Packet::new_video(
                    timestamp,
                    &VideoData::access_unit(frame.keyframe, frame.cts_ms, body),
                ),
                TrackKind::Audio => Packet::new_audio(timestamp, &AudioData::raw(body)),
            };
            return Ok(Some(packet));
        }
    }

    async fn read_sample(&mut self, frame: &Frame) -> Result<Bytes, Mp4Error> {
        if frame.size > MAX_SAMPLE_SIZE {
            return Err(Mp4Error::InconsistentSampleTable("sample larger than 64MiB"));
        }
        let mut body = vec![0u8; frame.size as usize];
        self.file.seek(SeekFrom::Start(frame.offset)).await?;
        self.file.read_exact(&mut body).await?;
        Ok(Bytes::from(body))
    }
}
