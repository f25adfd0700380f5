#![allow(dead_code)]

pub mod mp4;

use {
    async_trait::async_trait,
    rml_rtmp::sessions::StreamMetadata,
    std::{
        io,
        sync::{Arc, Mutex},
        time::Duration,
    },
    tempfile::TempDir,
    tokio::{sync::watch, time::timeout},
    xrelay::{
        error::TransportError,
        packet::Packet,
        retry::RetryPolicy,
        Connector, Destination, IngestManager, Publisher, Registry, RegistryConfig, SessionId,
        SessionRuntime, SessionSnapshot, SessionState, Store, StreamKey,
    },
};

pub const INGEST_URL: &str = "rtmp://ingest.test/live2";
pub const METADATA_BYTES: u64 = 64;

/// What one publishing connection received.
#[derive(Debug, Default, Clone)]
pub struct Connection {
    pub key: String,
    pub metadata: usize,
    pub packets: Vec<Packet>,
    pub closed: bool,
}

impl Connection {
    pub fn media(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter().filter(|p| !p.is_sequence_header())
    }
}

#[derive(Default)]
struct Behaviour {
    reject: bool,
    stall: bool,
    refuse_from: Option<usize>,
    drop_first_after: Option<usize>,
    hang_after: Option<usize>,
    close_delay: Option<Duration>,
}

/// In-memory ingest endpoint.
#[derive(Default)]
pub struct MemoryConnector {
    behaviour: Behaviour,
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish request is refused.
    pub fn rejecting() -> Self {
        let mut connector = Self::default();
        connector.behaviour.reject = true;
        connector
    }

    /// Connect never completes.
    pub fn stalling() -> Self {
        let mut connector = Self::default();
        connector.behaviour.stall = true;
        connector
    }

    /// The first connection drops after `packets` media packets.
    pub fn drop_first_after(mut self, packets: usize) -> Self {
        self.behaviour.drop_first_after = Some(packets);
        self
    }

    /// `send` never returns once `packets` media packets went through.
    pub fn hang_after(mut self, packets: usize) -> Self {
        self.behaviour.hang_after = Some(packets);
        self
    }

    /// `close` takes `delay` to complete.
    pub fn slow_close(mut self, delay: Duration) -> Self {
        self.behaviour.close_delay = Some(delay);
        self
    }

    /// Connection attempts from the `n`th on are refused at the socket.
    pub fn refuse_from(mut self, n: usize) -> Self {
        self.behaviour.refuse_from = Some(n);
        self
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn bytes_received(&self) -> u64 {
        self.connections()
            .iter()
            .map(|c| c.metadata as u64 * METADATA_BYTES + c.packets.iter().map(|p| p.len() as u64).sum::<u64>())
            .sum()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _destination: &Destination,
        key: &StreamKey,
    ) -> Result<Box<dyn Publisher>, TransportError> {
        if self.behaviour.stall {
            std::future::pending::<()>().await;
        }
        if self.behaviour.reject {
            return Err(TransportError::RequestRejected("publish denied".to_string()));
        }

        let index = {
            let mut connections = self.connections.lock().unwrap();
            if self.behaviour.refuse_from.map_or(false, |n| connections.len() >= n) {
                return Err(TransportError::Disconnected(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            connections.push(Connection {
                key: key.expose().to_string(),
                ..Default::default()
            });
            connections.len() - 1
        };

        let drop_after = if index == 0 {
            self.behaviour.drop_first_after
        } else {
            None
        };
        Ok(Box::new(MemoryPublisher {
            index,
            media_sent: 0,
            drop_after,
            hang_after: self.behaviour.hang_after,
            close_delay: self.behaviour.close_delay,
            connections: self.connections.clone(),
        }))
    }
}

struct MemoryPublisher {
    index: usize,
    media_sent: usize,
    drop_after: Option<usize>,
    hang_after: Option<usize>,
    close_delay: Option<Duration>,
    connections: Arc<Mutex<Vec<Connection>>>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn send_metadata(&mut self, _metadata: &StreamMetadata) -> Result<u64, TransportError> {
        self.connections.lock().unwrap()[self.index].metadata += 1;
        Ok(METADATA_BYTES)
    }

    async fn send(&mut self, packet: &Packet) -> Result<u64, TransportError> {
        if !packet.is_sequence_header() {
            if self.drop_after == Some(self.media_sent) {
                return Err(TransportError::ConnectionClosed);
            }
            if self.hang_after == Some(self.media_sent) {
                std::future::pending::<()>().await;
            }
            self.media_sent += 1;
        }
        self.connections.lock().unwrap()[self.index]
            .packets
            .push(packet.clone());
        Ok(packet.len() as u64)
    }

    async fn close(&mut self) {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.connections.lock().unwrap()[self.index].closed = true;
    }
}

pub struct Harness {
    pub registry: Arc<Registry>,
    pub ingest: Arc<IngestManager>,
    pub connector: Arc<MemoryConnector>,
    pub store: Store,
    _dir: TempDir,
}

pub struct HarnessConfig {
    pub max_concurrent: usize,
    pub max_file_size: u64,
    pub retention: Duration,
    pub watchdog: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_file_size: 16 << 20,
            retention: Duration::from_secs(60),
            watchdog: Duration::from_secs(30),
        }
    }
}

pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

pub async fn harness(connector: MemoryConnector) -> Harness {
    harness_with(connector, HarnessConfig::default()).await
}

pub async fn harness_with(connector: MemoryConnector, config: HarnessConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("uploads")).await.unwrap();
    let connector = Arc::new(connector);
    let runtime = SessionRuntime {
        connector: connector.clone(),
        retry: RetryPolicy::default(),
        grace_period: GRACE_PERIOD,
        watchdog: config.watchdog,
    };
    let registry = Arc::new(Registry::new(
        RegistryConfig {
            max_concurrent: config.max_concurrent,
            retention: config.retention,
        },
        runtime,
        store.clone(),
    ));
    let ingest = Arc::new(IngestManager::new(
        registry.clone(),
        store.clone(),
        Destination::parse(INGEST_URL).unwrap(),
        config.max_file_size,
    ));
    Harness {
        registry,
        ingest,
        connector,
        store,
        _dir: dir,
    }
}

impl Harness {
    pub async fn submit(&self, fixture: &mp4::Mp4Fixture, key: &str, looping: bool) -> SessionId {
        self.ingest
            .submit(&fixture.build(), "video/mp4", looping, key)
            .await
            .unwrap()
    }

    pub async fn watch(&self, id: &SessionId) -> watch::Receiver<SessionSnapshot> {
        self.registry.get(id).await.unwrap().subscribe()
    }
}

/// Waits until the session reaches `state`, panicking if it settles in a
/// different terminal state first.
pub async fn wait_for(rx: &mut watch::Receiver<SessionSnapshot>, state: SessionState) -> SessionSnapshot {
    let wait = async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.state == state {
                return snapshot;
            }
            assert!(
                !snapshot.state.is_terminal(),
                "expected {:?}, session ended {:?}: {:?}",
                state,
                snapshot.state,
                snapshot.last_error
            );
            rx.changed().await.unwrap();
        }
    };
    timeout(Duration::from_secs(3600), wait)
        .await
        .unwrap_or_else(|_| panic!("session never reached {:?}", state))
}
