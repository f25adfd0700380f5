use {
    crate::{
        errors::RelayError,
        metrics,
        pipeline::{Pipeline, PipelineEvent, PipelineExit, Progress, ProgressSnapshot},
        retry::RetryPolicy,
        stream_key::StreamKey,
        transport::{Connector, Destination},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{
        fmt,
        path::{Path, PathBuf},
        str::FromStr,
        sync::Arc,
        time::Duration,
    },
    tokio::{
        sync::{mpsc, watch, Mutex},
        time::{sleep, timeout, Instant},
    },
    tokio_util::sync::CancellationToken,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Pending,
    Starting,
    Live,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Holding a capacity permit and a stream key.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Live | SessionState::Stopping
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, Live)
                | (Starting, Failed)
                | (Live, Stopping)
                | (Live, Failed)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Point-in-time view of a session, as served by the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub destination: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
    /// Monotonic time of the last transition, for retention.
    #[serde(skip)]
    pub changed_at: Instant,
}

/// What every session needs to run a pipeline.
#[derive(Clone)]
pub struct SessionRuntime {
    pub connector: Arc<dyn Connector>,
    pub retry: RetryPolicy,
    pub grace_period: Duration,
    pub watchdog: Duration,
}

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    retired: bool,
}

/// One relay attempt. Transitions are serialized by `control`; readers get
/// whole snapshots from the watch channel.
pub struct Session {
    id: SessionId,
    source: PathBuf,
    key: StreamKey,
    looping: bool,
    destination: Destination,
    progress: Arc<Progress>,
    state: watch::Sender<SessionSnapshot>,
    control: Mutex<Control>,
}

impl Session {
    pub fn new(
        id: SessionId,
        source: PathBuf,
        key: StreamKey,
        looping: bool,
        destination: Destination,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            id,
            state: SessionState::Pending,
            looping,
            destination: destination.to_string(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            last_error: None,
            progress: ProgressSnapshot::default(),
            changed_at: Instant::now(),
        });
        Self {
            id,
            source,
            key,
            looping,
            destination,
            progress: Arc::new(Progress::default()),
            state,
            control: Mutex::new(Control::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.state.borrow().clone();
        snapshot.progress = self.progress.snapshot();
        snapshot
    }

    /// State changes as they happen. Progress counters are not pushed.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState, error: Option<String>) -> bool {
        self.state.send_if_modified(|snapshot| {
            if !snapshot.state.can_transition_to(next) {
                log::debug!(
                    "Session {}: ignoring {} -> {}",
                    self.id,
                    snapshot.state,
                    next
                );
                return false;
            }
            match &error {
                Some(error) => log::error!("Session {}: {} -> {}: {}", self.id, snapshot.state, next, error),
                None => log::info!("Session {}: {} -> {}", self.id, snapshot.state, next),
            }

            let now = Utc::now();
            snapshot.state = next;
            snapshot.changed_at = Instant::now();
            match next {
                SessionState::Live => snapshot.started_at = Some(now),
                SessionState::Stopped => snapshot.ended_at = Some(now),
                SessionState::Failed => {
                    snapshot.ended_at = Some(now);
                    snapshot.last_error = error.clone();
                }
                _ => {}
            }
            true
        })
    }

    /// Pending -> Starting. `acquire` runs under the transition lock and
    /// yields whatever must be held while the session is active.
    pub(crate) async fn start<L, F>(
        self: &Arc<Self>,
        runtime: &SessionRuntime,
        acquire: F,
    ) -> Result<(), RelayError>
    where
        L: Send + 'static,
        F: FnOnce(&Session) -> Result<L, RelayError>,
    {
        let mut control = self.control.lock().await;
        let state = self.state();
        if control.retired || state != SessionState::Pending {
            return Err(RelayError::InvalidTransition {
                state: state.to_string(),
                action: "start",
            });
        }
        let lease = acquire(&**self)?;
        self.transition(SessionState::Starting, None);

        let cancel = CancellationToken::new();
        control.cancel = Some(cancel.clone());
        let pipeline = Pipeline {
            id: self.id,
            source: self.source.clone(),
            looping: self.looping,
            destination: self.destination.clone(),
            key: self.key.clone(),
            connector: runtime.connector.clone(),
            retry: runtime.retry.clone(),
            progress: self.progress.clone(),
            cancel,
        };
        metrics!(increment_sessions);
        tokio::spawn(self.clone().drive(pipeline, runtime.clone(), lease));
        Ok(())
    }

    /// Requests a graceful stop. Returns without waiting for it.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let control = self.control.lock().await;
        let state = self.state();
        match state {
            SessionState::Pending => {
                return Err(RelayError::InvalidTransition {
                    state: state.to_string(),
                    action: "stop",
                })
            }
            SessionState::Starting => log::info!("Session {}: cancelling start", self.id),
            SessionState::Live => {
                self.transition(SessionState::Stopping, None);
            }
            SessionState::Stopping | SessionState::Stopped | SessionState::Failed => return Ok(()),
        }
        if let Some(cancel) = &control.cancel {
            cancel.cancel();
        }
        Ok(())
    }

    /// Marks a finished session as removed so it can never start again.
    /// Pending sessions qualify only with `include_pending`.
    pub(crate) async fn retire(&self, include_pending: bool) -> Result<(), RelayError> {
        let mut control = self.control.lock().await;
        let state = self.state();
        if state.is_active() || (state == SessionState::Pending && !include_pending) {
            return Err(RelayError::SessionStillActive { id: self.id });
        }
        control.retired = true;
        Ok(())
    }

    async fn drive<L: Send + 'static>(self: Arc<Self>, pipeline: Pipeline, runtime: SessionRuntime, lease: L) {
        let cancel = pipeline.cancel.clone();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut task = tokio::spawn(pipeline.run(events_tx));

        let mut watchdog_expired = false;
        tokio::select! {
            event = events.recv() => {
                if event == Some(PipelineEvent::Live) {
                    let _control = self.control.lock().await;
                    self.transition(SessionState::Live, None);
                }
            }
            _ = sleep(runtime.watchdog) => {
                watchdog_expired = true;
                cancel.cancel();
            }
        }

        // once cancelled the pipeline gets the grace period, then it is aborted
        let result = loop {
            tokio::select! {
                res = &mut task => break Some(res),
                Some(event) = events.recv() => {
                    if event == PipelineEvent::Draining {
                        let _control = self.control.lock().await;
                        if self.state() == SessionState::Live {
                            self.transition(SessionState::Stopping, None);
                        }
                    }
                }
                _ = cancel.cancelled() => break match timeout(runtime.grace_period, &mut task).await {
                    Ok(res) => Some(res),
                    Err(_) => {
                        log::warn!("Session {}: pipeline ignored stop for {:?}, aborting", self.id, runtime.grace_period);
                        task.abort();
                        None
                    }
                },
            }
        };

        let _control = self.control.lock().await;
        let state = self.state();
        let (next, error) = match result {
            _ if watchdog_expired => (
                SessionState::Failed,
                Some(format!("ingest did not accept the stream within {:?}", runtime.watchdog)),
            ),
            Some(Ok(Ok(_))) | None if state == SessionState::Starting => {
                (SessionState::Failed, Some("stopped before going live".to_string()))
            }
            Some(Ok(Ok(exit))) => {
                if exit == PipelineExit::EndOfFile {
                    log::info!("Session {}: end of source", self.id);
                }
                (SessionState::Stopped, None)
            }
            None => (SessionState::Stopped, None),
            Some(Ok(Err(e))) if state == SessionState::Stopping => {
                log::warn!("Session {}: error while stopping: {}", self.id, e);
                (SessionState::Stopped, None)
            }
            Some(Ok(Err(e))) => (SessionState::Failed, Some(e.to_string())),
            Some(Err(e)) if state == SessionState::Stopping => {
                log::warn!("Session {}: pipeline task ended abnormally: {}", self.id, e);
                (SessionState::Stopped, None)
            }
            Some(Err(e)) => (SessionState::Failed, Some(format!("pipeline task failed: {}", e))),
        };

        if next == SessionState::Stopped && self.state() == SessionState::Live {
            self.transition(SessionState::Stopping, None);
        }
        // free the key and the slot before anyone can observe the terminal state
        drop(lease);
        self.transition(next, error);
        metrics!(decrement_sessions, next == SessionState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn only_documented_edges_are_allowed() {
        let all = [Pending, Starting, Live, Stopping, Stopped, Failed];
        let allowed: Vec<_> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (Pending, Starting),
                (Starting, Live),
                (Starting, Failed),
                (Live, Stopping),
                (Live, Failed),
                (Stopping, Stopped),
            ]
        );
        assert!(all.iter().filter(|s| s.is_terminal()).all(|s| all.iter().all(|n| !s.can_transition_to(*n))));
    }

    #[test]
    fn session_ids_round_trip_through_strings() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[tokio::test]
    async fn stop_on_pending_is_rejected() {
        let destination = Destination::parse("rtmp://localhost/live").unwrap();
        let key = StreamKey::parse("key").unwrap();
        let session = Session::new(SessionId::new(), PathBuf::from("x.mp4"), key, false, destination);

        assert!(matches!(
            session.stop().await,
            Err(RelayError::InvalidTransition { action: "stop", .. })
        ));
        assert_eq!(session.state(), Pending);

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["state"], "Pending");
        assert_eq!(json["loop"], false);
        assert!(json["startedAt"].is_null());
        assert!(json.get("endedAt").is_none());
        assert_eq!(json["bytesSent"], 0);
    }
}
