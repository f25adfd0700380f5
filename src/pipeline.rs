use {
    crate::{
        error::TransportError,
        errors::RelayError,
        metrics,
        packet::Packet,
        retry::RetryPolicy,
        session::SessionId,
        source::Source,
        stream_key::StreamKey,
        transport::{Connector, Destination, Publisher},
    },
    serde::Serialize,
    std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{
        sync::mpsc,
        time::{sleep, sleep_until, Instant},
    },
    tokio_util::sync::CancellationToken,
};

/// Counters shared between a running pipeline and status queries.
#[derive(Debug, Default)]
pub struct Progress {
    bytes_sent: AtomicU64,
    elapsed_ms: AtomicU64,
    loops: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub elapsed_seconds: f64,
    pub bytes_sent: u64,
    pub loops: u64,
    pub reconnects: u64,
}

impl Progress {
    fn record(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        metrics!(add_bytes_sent, bytes);
    }

    fn advance(&self, packet: &Packet, loops: u64) {
        self.elapsed_ms
            .fetch_max(packet.timestamp.as_millis(), Ordering::Relaxed);
        self.loops.store(loops, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            elapsed_seconds: self.elapsed_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            loops: self.loops.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// How a pipeline that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    EndOfFile,
    Cancelled,
}

/// Milestones a running pipeline reports to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The endpoint accepted the first media message.
    Live,
    /// The source is exhausted and the publisher is being closed.
    Draining,
}

/// Maps media time onto the wall clock. Rebased after every reconnect so the
/// resumed stream does not try to catch up on the outage.
struct Clock {
    origin: Instant,
    base_ms: u64,
}

impl Clock {
    fn new(base_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            base_ms,
        }
    }

    fn deadline(&self, timestamp_ms: u64) -> Instant {
        self.origin + Duration::from_millis(timestamp_ms.saturating_sub(self.base_ms))
    }

    fn rebase(&mut self, base_ms: u64) {
        *self = Self::new(base_ms);
    }
}

pub struct Pipeline {
    pub id: SessionId,
    pub source: PathBuf,
    pub looping: bool,
    pub destination: Destination,
    pub key: StreamKey,
    pub connector: Arc<dyn Connector>,
    pub retry: RetryPolicy,
    pub progress: Arc<Progress>,
    pub cancel: CancellationToken,
}

fn start_failed(message: impl ToString) -> RelayError {
    RelayError::PipelineStartFailed {
        message: message.to_string(),
    }
}

impl Pipeline {
    /// Streams the source until EOF, cancellation or an unrecoverable error,
    /// reporting milestones on `events`.
    pub async fn run(self, events: mpsc::UnboundedSender<PipelineEvent>) -> Result<PipelineExit, RelayError> {
        let mut source = Source::open(&self.source, self.looping)
            .await
            .map_err(start_failed)?;

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(PipelineExit::Cancelled),
            res = self.connector.connect(&self.destination, &self.key) => res,
        };
        let mut publisher = connected.map_err(start_failed)?;
        if let Err(e) = self.prime(publisher.as_mut(), &source).await {
            publisher.close().await;
            return Err(start_failed(e));
        }

        let mut live = false;
        let mut clock = Clock::new(0);
        let mut attempts = 0u32;
        let exit = loop {
            let packet = match source.next_packet().await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    let _ = events.send(PipelineEvent::Draining);
                    break Ok(PipelineExit::EndOfFile);
                }
                Err(e) if !live => break Err(start_failed(e)),
                Err(e) => break Err(e.into()),
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(PipelineExit::Cancelled),
                _ = sleep_until(clock.deadline(packet.timestamp.as_millis())) => {}
            }

            match publisher.send(&packet).await {
                Ok(bytes) => {
                    self.progress.record(bytes);
                    self.progress.advance(&packet, source.loops());
                    attempts = 0;
                    if !live {
                        live = true;
                        let _ = events.send(PipelineEvent::Live);
                    }
                }
                Err(e) if !live => break Err(start_failed(e)),
                Err(e) => {
                    publisher.close().await;
                    match self.reconnect(&mut source, e, &mut attempts).await {
                        Ok(Some(reconnected)) => {
                            publisher = reconnected;
                            clock.rebase(source.position_ms());
                        }
                        Ok(None) => return Ok(PipelineExit::Cancelled),
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        publisher.close().await;
        exit
    }

    /// Sends `onMetaData` and the decoder configuration records.
    async fn prime(&self, publisher: &mut dyn Publisher, source: &Source) -> Result<(), TransportError> {
        let bytes = publisher.send_metadata(&source.metadata()).await?;
        self.progress.record(bytes);
        for header in source.sequence_headers() {
            let bytes = publisher.send(&header).await?;
            self.progress.record(bytes);
        }
        Ok(())
    }

    /// Reconnects with backoff until the budget in `attempts` runs out.
    /// `Ok(None)` means the session was cancelled while waiting.
    async fn reconnect(
        &self,
        source: &mut Source,
        mut error: TransportError,
        attempts: &mut u32,
    ) -> Result<Option<Box<dyn Publisher>>, RelayError> {
        loop {
            if !error.is_transient() {
                log::error!("Session {}: {}", self.id, error);
                return Err(error.into());
            }
            let Some(delay) = self.retry.delay(*attempts) else {
                return Err(RelayError::FatalTransportError {
                    message: format!("gave up after {} reconnects: {}", attempts, error),
                });
            };
            *attempts += 1;
            log::warn!(
                "Session {}: {}, reconnecting in {:?} ({}/{})",
                self.id,
                error,
                delay,
                attempts,
                self.retry.max_retries
            );
            self.progress.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics!(increment_reconnects);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                res = async {
                    sleep(delay).await;
                    self.connector.connect(&self.destination, &self.key).await
                } => res,
            };
            match connected {
                Ok(mut publisher) => match self.prime(publisher.as_mut(), source).await {
                    Ok(()) => {
                        log::info!("Session {}: reconnected to {}", self.id, self.destination);
                        source.resume_at_keyframe();
                        return Ok(Some(publisher));
                    }
                    Err(e) => {
                        publisher.close().await;
                        error = e;
                    }
                },
                Err(e) => error = e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_schedules_relative_to_base() {
        let mut clock = Clock::new(0);
        let start = Instant::now();
        assert_eq!(clock.deadline(0), start);
        assert_eq!(clock.deadline(1500), start + Duration::from_millis(1500));

        sleep(Duration::from_secs(10)).await;
        clock.rebase(4000);
        assert_eq!(clock.deadline(4040), Instant::now() + Duration::from_millis(40));
        // already overdue packets go out immediately
        assert_eq!(clock.deadline(3000), Instant::now());
    }

    #[test]
    fn progress_snapshot() {
        let progress = Progress::default();
        progress.record(100);
        progress.record(50);
        let packet = Packet::new(crate::packet::PacketType::Audio, 2500u64, vec![0xAF, 1]);
        progress.advance(&packet, 2);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.bytes_sent, 150);
        assert_eq!(snapshot.elapsed_seconds, 2.5);
        assert_eq!(snapshot.loops, 2);
    }
}
