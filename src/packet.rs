use {
    crate::codec::flv::{AudioData, VideoData},
    bytes::Bytes,
    rml_rtmp::time::RtmpTimestamp,
    serde::Serialize,
    std::ops::Add,
};

/// Milliseconds on the outbound stream's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp {
    value: u64,
}

impl Timestamp {
    pub fn as_millis(self) -> u64 {
        self.value
    }
}

impl From<u64> for Timestamp {
    fn from(val: u64) -> Self {
        Self { value: val }
    }
}

impl From<Timestamp> for u64 {
    fn from(val: Timestamp) -> Self {
        val.value
    }
}

// RTMP timestamps are 32 bits and wrap after ~49 days
impl From<Timestamp> for RtmpTimestamp {
    fn from(val: Timestamp) -> Self {
        RtmpTimestamp::new(val.value as u32)
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: u64) -> Timestamp {
        Timestamp::from(self.value + rhs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum PacketType {
    Video,
    Audio,
}

/// One RTMP media message: an FLV tag body and its timestamp.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketType,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

impl Packet {
    pub fn new<T, B>(kind: PacketType, timestamp: T, payload: B) -> Self
    where
        T: Into<Timestamp>,
        B: Into<Bytes>,
    {
        Self {
            kind,
            timestamp: timestamp.into(),
            payload: payload.into(),
        }
    }

    pub fn new_video<T>(timestamp: T, data: &VideoData) -> Self
    where
        T: Into<Timestamp>,
    {
        Self::new(PacketType::Video, timestamp, data.to_bytes())
    }

    pub fn new_audio<T>(timestamp: T, data: &AudioData) -> Self
    where
        T: Into<Timestamp>,
    {
        Self::new(PacketType::Audio, timestamp, data.to_bytes())
    }

    pub fn is_video(&self) -> bool {
        self.kind == PacketType::Video
    }

    // 0x17 0x01: AVC keyframe NALU
    pub fn is_keyframe(&self) -> bool {
        self.is_video() && self.payload.first().map_or(false, |b| b >> 4 == 1)
    }

    pub fn is_sequence_header(&self) -> bool {
        self.payload.get(1) == Some(&0)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}
