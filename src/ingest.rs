use {
    crate::{
        codec::mp4::{is_mp4, Movie},
        errors::{RelayError, Result},
        metrics,
        registry::Registry,
        session::{Session, SessionId},
        store::Store,
        stream_key::StreamKey,
        transport::Destination,
    },
    std::sync::Arc,
};

pub const MP4_MIME_TYPE: &str = "video/mp4";

/// Validates uploads and turns them into Pending sessions.
pub struct IngestManager {
    registry: Arc<Registry>,
    store: Store,
    destination: Destination,
    max_file_size: u64,
}

impl IngestManager {
    pub fn new(registry: Arc<Registry>, store: Store, destination: Destination, max_file_size: u64) -> Self {
        Self {
            registry,
            store,
            destination,
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn submit(
        &self,
        file: &[u8],
        declared_mime_type: &str,
        looping: bool,
        stream_key: &str,
    ) -> Result<SessionId> {
        let validated = self.validate(file, declared_mime_type, stream_key);
        let key = match validated {
            Ok(key) => key,
            Err(e) => {
                metrics!(increment_uploads_rejected);
                return Err(e);
            }
        };

        let id = SessionId::new();
        let path = self.store.persist(&id, file).await?;
        let session = Session::new(id, path, key, looping, self.destination.clone());
        self.registry.register(session).await;
        metrics!(increment_uploads_accepted);
        Ok(id)
    }

    fn validate(&self, file: &[u8], declared_mime_type: &str, stream_key: &str) -> Result<StreamKey> {
        let key = StreamKey::parse(stream_key).ok_or(RelayError::EmptyStreamKey)?;

        let size = file.len() as u64;
        if size > self.max_file_size {
            return Err(RelayError::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }

        let mime = declared_mime_type.split(';').next().unwrap_or_default().trim();
        if !mime.eq_ignore_ascii_case(MP4_MIME_TYPE) {
            return Err(RelayError::InvalidFormat {
                message: format!("expected {}, got '{}'", MP4_MIME_TYPE, declared_mime_type),
            });
        }
        if !is_mp4(file) {
            return Err(RelayError::InvalidFormat {
                message: "file does not start with an ftyp box".to_string(),
            });
        }

        let movie = Movie::from_bytes(file)?;
        log::debug!(
            "Accepted upload: {} bytes, {}ms, audio: {}",
            size,
            movie.duration_ms(),
            movie.audio.is_some()
        );
        Ok(key)
    }
}
