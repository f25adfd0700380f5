use {
    bytes::{BufMut, Bytes, BytesMut},
    std::fmt::{self, Debug},
};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum FrameType {
    KeyFrame,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyframe,
    VideoInfoFrame,
}

impl From<FrameType> for u8 {
    fn from(val: FrameType) -> Self {
        match val {
            FrameType::KeyFrame => 1,
            FrameType::InterFrame => 2,
            FrameType::DisposableInterFrame => 3,
            FrameType::GeneratedKeyframe => 4,
            FrameType::VideoInfoFrame => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Codec {
    H264,
}

impl Codec {
    fn id(self) -> u8 {
        match self {
            Codec::H264 => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AvcPacketType {
    SequenceHeader,
    NalUnit,
    EndOfSequence,
}

impl From<AvcPacketType> for u8 {
    fn from(val: AvcPacketType) -> Self {
        match val {
            AvcPacketType::SequenceHeader => 0,
            AvcPacketType::NalUnit => 1,
            AvcPacketType::EndOfSequence => 2,
        }
    }
}

// Field                | Type
// -------------------- | ---
// Frame Type           | u4
// Codec ID             | u4
// AVC Packet Type      | u8
// Composition Time     | i24
// Body                 | [u8]
#[derive(Clone)]
pub struct VideoData {
    pub frame_type: FrameType,
    pub packet_type: AvcPacketType,
    pub composition_time: i32,
    pub codec: Codec,
    pub body: Bytes,
}

impl VideoData {
    /// Wraps an `avcC` decoder configuration record.
    pub fn sequence_header(avcc: Bytes) -> Self {
        Self {
            frame_type: FrameType::KeyFrame,
            packet_type: AvcPacketType::SequenceHeader,
            composition_time: 0,
            codec: Codec::H264,
            body: avcc,
        }
    }

    /// Wraps one length-prefixed access unit as stored in an MP4 sample.
    pub fn access_unit(keyframe: bool, composition_time: i32, body: Bytes) -> Self {
        Self {
            frame_type: if keyframe {
                FrameType::KeyFrame
            } else {
                FrameType::InterFrame
            },
            packet_type: AvcPacketType::NalUnit,
            composition_time,
            codec: Codec::H264,
            body,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == AvcPacketType::SequenceHeader
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::KeyFrame
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.body.len());
        buf.put_u8(u8::from(self.frame_type) << 4 | self.codec.id());
        let packet_type = u8::from(self.packet_type) as u32;
        buf.put_u32(packet_type << 24 | (self.composition_time as u32 & 0x00_FF_FF_FF));
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

impl Debug for VideoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Video")
            .field("frame_type", &self.frame_type)
            .field("packet_type", &self.packet_type)
            .field("composition_time", &self.composition_time)
            .finish()
    }
}
