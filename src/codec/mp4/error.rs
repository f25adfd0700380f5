use {std::io, thiserror::Error};

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("Not an MP4 container")]
    NotMp4,

    #[error("Malformed MP4: {0}")]
    Malformed(mp4::Error),

    #[error("Fragmented MP4 is not supported")]
    Fragmented,

    #[error("No H.264 video track")]
    NoVideoTrack,

    #[error("Inconsistent sample table: {0}")]
    InconsistentSampleTable(&'static str),

    #[error("Media has zero duration")]
    EmptyMedia,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<mp4::Error> for Mp4Error {
    fn from(err: mp4::Error) -> Self {
        match err {
            // a short read inside a box is a truncated file, not a storage fault
            mp4::Error::IoError(err) if err.kind() != io::ErrorKind::UnexpectedEof => {
                Mp4Error::Io(err)
            }
            err => Mp4Error::Malformed(err),
        }
    }
}
