use {
    crate::{
        errors::{RelayError, Result},
        session::{Session, SessionId, SessionRuntime, SessionSnapshot},
        store::Store,
        stream_key::StreamKey,
        transport::Destination,
    },
    futures::future::join_all,
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::{
        sync::{OwnedSemaphorePermit, RwLock, Semaphore},
        task::JoinHandle,
        time::{interval, timeout},
    },
};

type ActiveKeys = Arc<Mutex<HashSet<(Destination, StreamKey)>>>;

/// Claim on a stream key at a destination, released on drop.
struct KeyClaim {
    keys: ActiveKeys,
    entry: (Destination, StreamKey),
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.entry);
    }
}

/// Held by a session from Starting until it is terminal.
pub struct Lease {
    _permit: OwnedSemaphorePermit,
    _claim: KeyClaim,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_concurrent: usize,
    pub retention: Duration,
}

/// All sessions of the process, keyed by id.
pub struct Registry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    permits: Arc<Semaphore>,
    active_keys: ActiveKeys,
    runtime: SessionRuntime,
    store: Store,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig, runtime: SessionRuntime, store: Store) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            active_keys: Arc::new(Mutex::new(HashSet::new())),
            runtime,
            store,
            config,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    pub async fn register(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id(), session.clone());
        log::info!(
            "Registered session {} for {} ({} total)",
            session.id(),
            session.key(),
            sessions.len()
        );
        session
    }

    pub async fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::SessionNotFound { id: id.to_string() })
    }

    pub async fn snapshot(&self, id: &SessionId) -> Result<SessionSnapshot> {
        Ok(self.get(id).await?.snapshot())
    }

    /// Snapshots of every session, oldest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<_> = sessions.values().map(|s| s.snapshot()).collect();
        list.sort_by_key(|s| s.created_at);
        list
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.state().is_active()).count()
    }

    /// Starts a Pending session, gated on the stream key being free at its
    /// destination and on a free capacity slot.
    pub async fn start(&self, id: &SessionId) -> Result<()> {
        let session = self.get(id).await?;
        session
            .start(&self.runtime, |session| self.acquire(session))
            .await
    }

    pub async fn stop(&self, id: &SessionId) -> Result<()> {
        self.get(id).await?.stop().await
    }

    /// Stops every session that is still running and waits up to `deadline`
    /// for them to settle. Returns how many were still active at the deadline.
    pub async fn stop_all(&self, deadline: Duration) -> usize {
        let sessions: Vec<_> = {
            let sessions = self.sessions.read().await;
            sessions.values().filter(|s| s.state().is_active()).cloned().collect()
        };

        let mut stopping = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let mut rx = session.subscribe();
            if let Err(e) = session.stop().await {
                log::warn!("Failed to stop session {}: {}", session.id(), e);
            }
            stopping.push(async move {
                let _ = rx.wait_for(|snapshot| snapshot.state.is_terminal()).await;
            });
        }

        if timeout(deadline, join_all(stopping)).await.is_ok() {
            return 0;
        }
        let remaining = sessions.iter().filter(|s| s.state().is_active()).count();
        log::warn!("{} sessions still stopping after {:?}", remaining, deadline);
        remaining
    }

    /// Removes a terminal session and deletes its source.
    pub async fn remove(&self, id: &SessionId) -> Result<()> {
        let session = self.get(id).await?;
        session.retire(false).await?;
        self.evict(&session).await;
        Ok(())
    }

    /// Like `remove`, but also takes sessions that were never started.
    pub async fn discard(&self, id: &SessionId) -> Result<()> {
        let session = self.get(id).await?;
        session.retire(true).await?;
        self.evict(&session).await;
        Ok(())
    }

    fn acquire(&self, session: &Session) -> Result<Lease> {
        let entry = (session.destination().clone(), session.key().clone());
        let claimed = {
            let mut keys = self.active_keys.lock().unwrap_or_else(|e| e.into_inner());
            keys.insert(entry.clone())
        };
        if !claimed {
            return Err(RelayError::DuplicateStreamKey {
                destination: session.destination().to_string(),
            });
        }
        let claim = KeyClaim {
            keys: self.active_keys.clone(),
            entry,
        };

        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| RelayError::CapacityExceeded {
                limit: self.config.max_concurrent,
            })?;
        Ok(Lease {
            _permit: permit,
            _claim: claim,
        })
    }

    async fn evict(&self, session: &Session) {
        self.sessions.write().await.remove(&session.id());
        self.store.discard(session.source()).await;
        log::info!("Removed session {}", session.id());
    }

    /// Evicts terminal sessions, and Pending ones nobody started, once they
    /// have been idle for the retention window.
    pub async fn sweep(&self) -> usize {
        let expired: Vec<_> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| {
                    let snapshot = s.snapshot();
                    !snapshot.state.is_active()
                        && snapshot.changed_at.elapsed() >= self.config.retention
                })
                .cloned()
                .collect()
        };

        let mut evicted = 0;
        for session in expired {
            if session.retire(true).await.is_ok() {
                self.evict(&session).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::info!("Cleaned up {} expired sessions", evicted);
        }
        evicted
    }

    pub fn start_cleanup_task(self: &Arc<Self>, cleanup_interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }
}
