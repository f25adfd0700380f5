pub mod tag;

pub use {
    tag::audio::{AacPacketType, AudioData, AudioFormat},
    tag::video::{AvcPacketType, Codec, FrameType, VideoData},
};
