use {
    crate::{error::TransportError, packet::Packet, stream_key::StreamKey},
    async_trait::async_trait,
    rml_rtmp::sessions::StreamMetadata,
    std::fmt,
    url::Url,
};

pub const DEFAULT_INGEST_URL: &str = "rtmp://a.rtmp.youtube.com/live2";
const DEFAULT_RTMP_PORT: u16 = 1935;

/// An RTMP ingest application, e.g. `rtmp://a.rtmp.youtube.com/live2`.
/// The stream key is kept apart so it never ends up in a log line.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    url: Url,
}

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if url.scheme() != "rtmp" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!("{}: missing host", raw)));
        }
        if url.path().trim_matches('/').is_empty() {
            return Err(TransportError::InvalidUrl(format!(
                "{}: missing application name",
                raw
            )));
        }
        Ok(Self { url })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or(DEFAULT_RTMP_PORT)
    }

    pub fn app(&self) -> &str {
        self.url.path().trim_matches('/')
    }

    pub fn tc_url(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({})", self.url)
    }
}

/// Opens publishing connections to an ingest endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects and negotiates publishing of `key`. Returns once the
    /// endpoint has accepted the publish request.
    async fn connect(
        &self,
        destination: &Destination,
        key: &StreamKey,
    ) -> Result<Box<dyn Publisher>, TransportError>;
}

/// An accepted publish. Each call returns the number of bytes put on the wire.
#[async_trait]
pub trait Publisher: Send {
    async fn send_metadata(&mut self, metadata: &StreamMetadata) -> Result<u64, TransportError>;

    async fn send(&mut self, packet: &Packet) -> Result<u64, TransportError>;

    /// Flushes and drops the connection. Errors are only logged.
    async fn close(&mut self);
}
