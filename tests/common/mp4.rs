//! Synthesizes small but well-formed MP4 files: `ftyp`, `mdat`, then `moov`
//! with `mvhd`, an H.264 track and an optional AAC track, one chunk per track.

pub const WIDTH: u16 = 640;
pub const HEIGHT: u16 = 360;
pub const KEYFRAME_NAL: u8 = 0x65;
pub const INTER_NAL: u8 = 0x41;
pub const AUDIO_SPECIFIC_CONFIG: [u8; 2] = [0x12, 0x10];
pub const AVCC: [u8; 17] = [
    1, 0x64, 0, 0x1f, 0xFF, 0xE1, 0, 4, 0x67, 0x64, 0, 0x1f, 1, 0, 2, 0x68, 0xEE,
];

const VIDEO_TIMESCALE: u32 = 90_000;
const AUDIO_TIMESCALE: u32 = 44_100;
const AAC_FRAME: u32 = 1024;
const AUDIO_SAMPLE_SIZE: usize = 32;

pub struct Mp4Fixture {
    frames: u32,
    fps: u32,
    frame_size: usize,
    audio: bool,
    avcc: bool,
}

impl Mp4Fixture {
    pub fn video(frames: u32, fps: u32) -> Self {
        Self {
            frames,
            fps,
            frame_size: 200,
            audio: false,
            avcc: true,
        }
    }

    pub fn with_audio(mut self) -> Self {
        self.audio = true;
        self
    }

    pub fn frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size.max(8);
        self
    }

    pub fn without_avcc(mut self) -> Self {
        self.avcc = false;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames as u64 * 1000 / self.fps as u64
    }

    fn audio_frames(&self) -> u32 {
        let samples = self.frames as u64 * AUDIO_TIMESCALE as u64 / self.fps as u64;
        ((samples + AAC_FRAME as u64 - 1) / AAC_FRAME as u64) as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let ftyp = mp4_box(b"ftyp", &[&b"isom"[..], &[0, 0, 2, 0], b"isom", b"avc1"].concat());

        let mut video = Vec::new();
        for i in 0..self.frames {
            let nal = if i % self.fps == 0 { KEYFRAME_NAL } else { INTER_NAL };
            video.extend_from_slice(&((self.frame_size - 4) as u32).to_be_bytes());
            video.push(nal);
            video.extend(std::iter::repeat((i % 251) as u8).take(self.frame_size - 5));
        }
        let audio_frames = if self.audio { self.audio_frames() } else { 0 };
        let audio = vec![0x21u8; audio_frames as usize * AUDIO_SAMPLE_SIZE];

        let video_offset = (ftyp.len() + 8) as u32;
        let audio_offset = video_offset + video.len() as u32;
        let mdat = mp4_box(b"mdat", &[video.as_slice(), audio.as_slice()].concat());

        let mut children = vec![mvhd(self.duration_ms() as u32), self.video_trak(video_offset)];
        if self.audio {
            children.push(audio_trak(audio_frames, audio_offset));
        }
        let moov = mp4_box(b"moov", &children.concat());

        [ftyp, mdat, moov].concat()
    }

    fn video_trak(&self, chunk_offset: u32) -> Vec<u8> {
        let delta = VIDEO_TIMESCALE / self.fps;

        let mut entry = vec![0u8; 6];
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 16]);
        entry.extend_from_slice(&WIDTH.to_be_bytes());
        entry.extend_from_slice(&HEIGHT.to_be_bytes());
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        entry.extend_from_slice(&[0u8; 4]);
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 32]);
        entry.extend_from_slice(&0x0018u16.to_be_bytes());
        entry.extend_from_slice(&0xFFFFu16.to_be_bytes());
        if self.avcc {
            entry.extend(mp4_box(b"avcC", &AVCC));
        }
        let stsd = full_box(b"stsd", &[&u32s(&[1])[..], &mp4_box(b"avc1", &entry)].concat());

        let sync: Vec<u32> = (0..self.frames)
            .filter(|i| i % self.fps == 0)
            .map(|i| i + 1)
            .collect();
        let stss = full_box(b"stss", &[u32s(&[sync.len() as u32]), u32s(&sync)].concat());

        let sizes = vec![self.frame_size as u32; self.frames as usize];
        trak(
            1,
            b"vide",
            VIDEO_TIMESCALE,
            self.frames * delta,
            &[
                stsd,
                full_box(b"stts", &u32s(&[1, self.frames, delta])),
                stss,
                full_box(b"stsc", &u32s(&[1, 1, self.frames, 1])),
                full_box(b"stsz", &[u32s(&[0, self.frames]), u32s(&sizes)].concat()),
                full_box(b"stco", &u32s(&[1, chunk_offset])),
            ]
            .concat(),
        )
    }
}

fn audio_trak(frames: u32, chunk_offset: u32) -> Vec<u8> {
    let mut entry = vec![0u8; 6];
    entry.extend_from_slice(&1u16.to_be_bytes());
    entry.extend_from_slice(&[0u8; 8]);
    entry.extend_from_slice(&2u16.to_be_bytes());
    entry.extend_from_slice(&16u16.to_be_bytes());
    entry.extend_from_slice(&[0u8; 4]);
    entry.extend_from_slice(&(AUDIO_TIMESCALE << 16).to_be_bytes());

    let mut descriptors = vec![0x04, 17, 0x40, 0x15, 0, 0, 0];
    descriptors.extend_from_slice(&128_000u32.to_be_bytes());
    descriptors.extend_from_slice(&128_000u32.to_be_bytes());
    descriptors.extend_from_slice(&[0x05, AUDIO_SPECIFIC_CONFIG.len() as u8]);
    descriptors.extend_from_slice(&AUDIO_SPECIFIC_CONFIG);
    let mut es = vec![0x03, (3 + descriptors.len() + 3) as u8, 0, 1, 0];
    es.extend(descriptors);
    es.extend_from_slice(&[0x06, 1, 2]);
    entry.extend(full_box(b"esds", &es));

    let stsd = full_box(b"stsd", &[&u32s(&[1])[..], &mp4_box(b"mp4a", &entry)].concat());
    trak(
        2,
        b"soun",
        AUDIO_TIMESCALE,
        frames * AAC_FRAME,
        &[
            stsd,
            full_box(b"stts", &u32s(&[1, frames, AAC_FRAME])),
            full_box(b"stsc", &u32s(&[1, 1, frames, 1])),
            full_box(b"stsz", &u32s(&[AUDIO_SAMPLE_SIZE as u32, frames])),
            full_box(b"stco", &u32s(&[1, chunk_offset])),
        ]
        .concat(),
    )
}

// Identity transform matrix shared by mvhd and tkhd.
const MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

fn mvhd(duration_ms: u32) -> Vec<u8> {
    let mut body = u32s(&[0, 0, 1000, duration_ms, 0x0001_0000]);
    body.extend_from_slice(&[1, 0, 0, 0]);
    body.extend_from_slice(&[0u8; 8]);
    body.extend(u32s(&MATRIX));
    body.extend_from_slice(&[0u8; 24]);
    body.extend(u32s(&[3]));
    full_box(b"mvhd", &body)
}

fn tkhd(track_id: u32, duration: u32, audio: bool) -> Vec<u8> {
    let mut body = u32s(&[0, 0, track_id, 0, duration]);
    body.extend_from_slice(&[0u8; 8]);
    body.extend_from_slice(&[0, 0, 0, 0]);
    body.extend_from_slice(if audio { &[1, 0] } else { &[0, 0] });
    body.extend_from_slice(&[0, 0]);
    body.extend(u32s(&MATRIX));
    if audio {
        body.extend(u32s(&[0, 0]));
    } else {
        body.extend(u32s(&[(WIDTH as u32) << 16, (HEIGHT as u32) << 16]));
    }
    mp4_box(b"tkhd", &[&[0, 0, 0, 3][..], &body].concat())
}

fn trak(track_id: u32, handler: &[u8; 4], timescale: u32, duration: u32, stbl: &[u8]) -> Vec<u8> {
    let tkhd = tkhd(track_id, duration, handler == b"soun");
    let mdhd = full_box(b"mdhd", &[u32s(&[0, 0, timescale, duration]), vec![0x55, 0xC4, 0, 0]].concat());
    let hdlr = full_box(
        b"hdlr",
        &[&[0u8; 4][..], handler, &[0u8; 12], b"relay\0"].concat(),
    );
    let dinf = mp4_box(b"dinf", &full_box(b"dref", &u32s(&[0])));
    let minf = mp4_box(b"minf", &[dinf, mp4_box(b"stbl", stbl)].concat());
    mp4_box(b"trak", &[tkhd, mp4_box(b"mdia", &[mdhd, hdlr, minf].concat())].concat())
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    mp4_box(kind, &[&[0u8; 4][..], body].concat())
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}
