use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AudioFormat {
    Aac,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AacPacketType {
    SequenceHeader,
    Raw,
}

// Field                | Type
// -------------------- | ---
// Sound Format         | u4
// Sound Rate           | u2
// Sound Size           | u1
// Sound Type           | u1
// AAC Packet Type      | u8
// Body                 | [u8]
//
// For AAC the rate/size/type bits are fixed at 44kHz/16bit/stereo; the real
// parameters travel in the AudioSpecificConfig.
const AAC_HEADER: u8 = 0xAF;

#[derive(Debug, Clone)]
pub struct AudioData {
    pub format: AudioFormat,
    pub packet_type: AacPacketType,
    pub body: Bytes,
}

impl AudioData {
    pub fn sequence_header(audio_specific_config: Bytes) -> Self {
        Self {
            format: AudioFormat::Aac,
            packet_type: AacPacketType::SequenceHeader,
            body: audio_specific_config,
        }
    }

    pub fn raw(body: Bytes) -> Self {
        Self {
            format: AudioFormat::Aac,
            packet_type: AacPacketType::Raw,
            body,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == AacPacketType::SequenceHeader
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.body.len());
        buf.put_u8(AAC_HEADER);
        buf.put_u8(match self.packet_type {
            AacPacketType::SequenceHeader => 0,
            AacPacketType::Raw => 1,
        });
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}
