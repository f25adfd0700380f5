use {
    crate::{
        error::TransportError,
        packet::{Packet, PacketType},
        stream_key::StreamKey,
        transport::{Connector, Destination, Publisher},
    },
    async_trait::async_trait,
    bytes::Bytes,
    futures::{FutureExt, SinkExt},
    rml_rtmp::{
        handshake::{Handshake, HandshakeProcessResult, PeerType},
        sessions::{
            ClientSession, ClientSessionConfig, ClientSessionError, ClientSessionEvent,
            ClientSessionResult, PublishRequestType, StreamMetadata,
        },
    },
    std::time::Duration,
    tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout},
    tokio_stream::StreamExt,
    tokio_util::codec::{BytesCodec, Framed},
};

const CHUNK_SIZE: u32 = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

fn protocol(err: ClientSessionError) -> TransportError {
    TransportError::Protocol(format!("{:?}", err))
}

/// Publishes over plain RTMP (no TLS) using rml_rtmp's client session.
pub struct RtmpConnector {
    connect_timeout: Duration,
}

impl RtmpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for RtmpConnector {
    async fn connect(
        &self,
        destination: &Destination,
        key: &StreamKey,
    ) -> Result<Box<dyn Publisher>, TransportError> {
        let publisher = timeout(self.connect_timeout, RtmpPublisher::connect(destination, key)).await??;
        Ok(Box::new(publisher))
    }
}

enum Negotiation {
    Connect,
    Publish,
}

pub struct RtmpPublisher {
    bytes_stream: Framed<TcpStream, BytesCodec>,
    session: ClientSession,
}

impl RtmpPublisher {
    async fn connect(destination: &Destination, key: &StreamKey) -> Result<Self, TransportError> {
        log::debug!("Connecting to {}", destination);
        let stream = TcpStream::connect((destination.host(), destination.port())).await?;
        stream.set_nodelay(true)?;
        let mut bytes_stream = Framed::new(stream, BytesCodec::new());
        let remaining = handshake(&mut bytes_stream).await?;

        let mut config = ClientSessionConfig::new();
        config.chunk_size = CHUNK_SIZE;
        config.tc_url = Some(destination.tc_url().to_string());
        let (session, results) = ClientSession::new(config).map_err(protocol)?;

        let mut publisher = Self {
            bytes_stream,
            session,
        };
        publisher.handle_results(results).await?;
        if !remaining.is_empty() {
            let results = publisher.session.handle_input(&remaining).map_err(protocol)?;
            publisher.handle_results(results).await?;
        }

        let request = publisher
            .session
            .request_connection(destination.app().to_string())
            .map_err(protocol)?;
        publisher.write_result(request).await?;
        publisher.negotiate(Negotiation::Connect).await?;

        let request = publisher
            .session
            .request_publishing(key.expose().to_string(), PublishRequestType::Live)
            .map_err(protocol)?;
        publisher.write_result(request).await?;
        publisher.negotiate(Negotiation::Publish).await?;

        log::info!("Publishing {} to {}", key, destination);
        Ok(publisher)
    }

    /// Reads until the server answers the pending request.
    async fn negotiate(&mut self, step: Negotiation) -> Result<(), TransportError> {
        loop {
            let data = self
                .bytes_stream
                .try_next()
                .await?
                .ok_or(TransportError::ConnectionClosed)?;
            let results = self.session.handle_input(&data).map_err(protocol)?;
            let mut done = false;
            for result in results {
                match result {
                    ClientSessionResult::OutboundResponse(packet) => {
                        self.write(packet.bytes).await?;
                    }
                    ClientSessionResult::RaisedEvent(event) => match (&step, event) {
                        (Negotiation::Connect, ClientSessionEvent::ConnectionRequestAccepted) => {
                            done = true
                        }
                        (Negotiation::Connect, ClientSessionEvent::ConnectionRequestRejected { description }) => {
                            return Err(TransportError::RequestRejected(description));
                        }
                        (Negotiation::Publish, ClientSessionEvent::PublishRequestAccepted) => {
                            done = true
                        }
                        (_, ClientSessionEvent::UnhandleableAmf0Command { command_name, .. })
                            if command_name == "_error" =>
                        {
                            return Err(TransportError::RequestRejected(command_name));
                        }
                        (_, event) => log::debug!("Ignoring RTMP event {:?}", event),
                    },
                    ClientSessionResult::UnhandleableMessageReceived(_) => {}
                }
            }
            if done {
                return Ok(());
            }
        }
    }

    /// Answers whatever the server sent since the last write (acks, pings)
    /// without waiting for more.
    async fn drain_incoming(&mut self) -> Result<(), TransportError> {
        while let Some(next) = self.bytes_stream.try_next().now_or_never() {
            let data = next?.ok_or(TransportError::ConnectionClosed)?;
            let results = self.session.handle_input(&data).map_err(protocol)?;
            self.handle_results(results).await?;
        }
        Ok(())
    }

    async fn handle_results(&mut self, results: Vec<ClientSessionResult>) -> Result<u64, TransportError> {
        let mut written = 0;
        for result in results {
            written += self.write_result(result).await?;
        }
        Ok(written)
    }

    async fn write_result(&mut self, result: ClientSessionResult) -> Result<u64, TransportError> {
        match result {
            ClientSessionResult::OutboundResponse(packet) => self.write(packet.bytes).await,
            ClientSessionResult::RaisedEvent(event) => {
                log::debug!("Ignoring RTMP event {:?}", event);
                Ok(0)
            }
            ClientSessionResult::UnhandleableMessageReceived(_) => Ok(0),
        }
    }

    async fn write(&mut self, bytes: Vec<u8>) -> Result<u64, TransportError> {
        let len = bytes.len() as u64;
        timeout(WRITE_TIMEOUT, self.bytes_stream.send(Bytes::from(bytes))).await??;
        Ok(len)
    }
}

#[async_trait]
impl Publisher for RtmpPublisher {
    async fn send_metadata(&mut self, metadata: &StreamMetadata) -> Result<u64, TransportError> {
        let result = self.session.publish_metadata(metadata).map_err(protocol)?;
        self.write_result(result).await
    }

    async fn send(&mut self, packet: &Packet) -> Result<u64, TransportError> {
        self.drain_incoming().await?;
        let payload = packet.payload.clone();
        let timestamp = packet.timestamp.into();
        let result = match packet.kind {
            PacketType::Video => self.session.publish_video_data(payload, timestamp, false),
            PacketType::Audio => self.session.publish_audio_data(payload, timestamp, false),
        }
        .map_err(protocol)?;
        self.write_result(result).await
    }

    async fn close(&mut self) {
        // deleteStream, best effort: the socket may already be gone
        match self.session.stop_publishing() {
            Ok(results) => {
                if let Err(e) = self.handle_results(results).await {
                    log::debug!("deleteStream on close failed: {}", e);
                }
            }
            Err(e) => log::debug!("Cannot stop publishing: {:?}", e),
        }
        if let Err(e) = SinkExt::<Bytes>::flush(&mut self.bytes_stream).await {
            log::debug!("Flush on close failed: {}", e);
        }
        if let Err(e) = self.bytes_stream.get_mut().shutdown().await {
            log::debug!("Shutdown on close failed: {}", e);
        }
    }
}

async fn handshake(bytes_stream: &mut Framed<TcpStream, BytesCodec>) -> Result<Vec<u8>, TransportError> {
    let failed = |e| TransportError::HandshakeFailed(format!("{:?}", e));
    let mut handshake = Handshake::new(PeerType::Client);
    let p0_and_p1 = handshake.generate_outbound_p0_and_p1().map_err(failed)?;
    bytes_stream.send(Bytes::from(p0_and_p1)).await?;

    loop {
        let data = bytes_stream
            .try_next()
            .await?
            .ok_or(TransportError::ConnectionClosed)?;
        match handshake.process_bytes(&data).map_err(failed)? {
            HandshakeProcessResult::InProgress { response_bytes } => {
                if !response_bytes.is_empty() {
                    bytes_stream.send(Bytes::from(response_bytes)).await?;
                }
            }
            HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            } => {
                if !response_bytes.is_empty() {
                    bytes_stream.send(Bytes::from(response_bytes)).await?;
                }
                return Ok(remaining_bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::codec::flv::VideoData,
        rml_rtmp::sessions::{ServerSession, ServerSessionConfig, ServerSessionEvent, ServerSessionResult},
        tokio::{net::TcpListener, sync::oneshot},
    };

    #[derive(Debug, Default)]
    struct Received {
        app: String,
        stream_key: String,
        metadata: bool,
        video: usize,
    }

    async fn serve_one(listener: TcpListener, done: oneshot::Sender<Received>) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, BytesCodec::new());

        let mut handshake = Handshake::new(PeerType::Server);
        let remaining = loop {
            let data = framed.try_next().await.unwrap().unwrap();
            match handshake.process_bytes(&data).unwrap() {
                HandshakeProcessResult::InProgress { response_bytes } => {
                    framed.send(Bytes::from(response_bytes)).await.unwrap();
                }
                HandshakeProcessResult::Completed {
                    response_bytes,
                    remaining_bytes,
                } => {
                    if !response_bytes.is_empty() {
                        framed.send(Bytes::from(response_bytes)).await.unwrap();
                    }
                    break remaining_bytes;
                }
            }
        };

        let (mut session, initial) = ServerSession::new(ServerSessionConfig::new()).unwrap();
        let mut pending = initial;
        pending.extend(session.handle_input(&remaining).unwrap());
        let mut received = Received::default();

        loop {
            while !pending.is_empty() {
                for result in std::mem::take(&mut pending) {
                    match result {
                        ServerSessionResult::OutboundResponse(packet) => {
                            framed.send(Bytes::from(packet.bytes)).await.unwrap();
                        }
                        ServerSessionResult::RaisedEvent(event) => match event {
                            ServerSessionEvent::ConnectionRequested {
                                request_id,
                                app_name,
                                ..
                            } => {
                                received.app = app_name;
                                pending.extend(session.accept_request(request_id).unwrap());
                            }
                            ServerSessionEvent::PublishStreamRequested {
                                request_id,
                                stream_key,
                                ..
                            } => {
                                received.stream_key = stream_key;
                                pending.extend(session.accept_request(request_id).unwrap());
                            }
                            ServerSessionEvent::StreamMetadataChanged { .. } => received.metadata = true,
                            ServerSessionEvent::VideoDataReceived { .. } => received.video += 1,
                            _ => {}
                        },
                        ServerSessionResult::UnhandleableMessageReceived(_) => {}
                    }
                }
            }
            match framed.try_next().await {
                Ok(Some(data)) => pending.extend(session.handle_input(&data).unwrap()),
                _ => break,
            }
        }
        let _ = done.send(received);
    }

    #[tokio::test]
    async fn publishes_to_an_rtmp_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(serve_one(listener, done_tx));

        let destination = Destination::parse(&format!("rtmp://127.0.0.1:{}/live2", port)).unwrap();
        let key = StreamKey::parse("abcd-1234").unwrap();
        let mut publisher = RtmpConnector::new(Duration::from_secs(5))
            .connect(&destination, &key)
            .await
            .unwrap();

        let mut metadata = StreamMetadata::new();
        metadata.video_width = Some(640);
        assert!(publisher.send_metadata(&metadata).await.unwrap() > 0);

        let header = VideoData::sequence_header(Bytes::from_static(&[1, 0x64, 0, 0x1f]));
        let mut sent = publisher.send(&Packet::new_video(0u64, &header)).await.unwrap();
        for i in 0..3u64 {
            let frame = VideoData::access_unit(i == 0, 0, Bytes::from(vec![0u8; 300]));
            sent += publisher.send(&Packet::new_video(i * 40, &frame)).await.unwrap();
        }
        assert!(sent > 4 * 5);
        publisher.close().await;

        let received = done_rx.await.unwrap();
        assert_eq!(received.app, "live2");
        assert_eq!(received.stream_key, "abcd-1234");
        assert!(received.metadata);
        assert_eq!(received.video, 4);
    }

    #[tokio::test]
    async fn connect_fails_fast_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let destination = Destination::parse(&format!("rtmp://127.0.0.1:{}/live2", port)).unwrap();
        let key = StreamKey::parse("key").unwrap();
        let err = RtmpConnector::new(Duration::from_secs(5))
            .connect(&destination, &key)
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }
}
