use {
    crate::{
        errors::{RelayError, Result},
        health::{HealthChecker, HealthReport},
        ingest::IngestManager,
        registry::Registry,
        session::{SessionId, SessionSnapshot},
    },
    axum::{
        body::Bytes,
        extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
        http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    },
    serde::Serialize,
    std::sync::Arc,
};

/// Headroom over the largest accepted file for the other multipart fields.
const FORM_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestManager>,
    pub registry: Arc<Registry>,
    pub health: Arc<HealthChecker>,
}

fn body_limit(max_file_size: u64) -> usize {
    usize::try_from(max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD)
}

pub fn router(state: AppState) -> Router {
    let body_limit = body_limit(state.ingest.max_file_size());

    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:id", get(get_session).delete(remove_session))
        .route("/sessions/:id/start", post(start_session))
        .route("/sessions/:id/stop", post(stop_session))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    pub session_id: SessionId,
}

/// Fields of the `POST /sessions` form.
struct Upload {
    video: Option<(Bytes, String)>,
    stream_key: String,
    looping: bool,
    start: bool,
}

/// Upload size bounds, as far as they are known before the body is read.
struct Limits {
    max_file_size: u64,
    declared: Option<u64>,
}

impl Limits {
    // past the body limit nothing was read: report the declared length, or
    // the limit as a lower bound
    fn check(&self, err: MultipartError) -> RelayError {
        if err.status() != StatusCode::PAYLOAD_TOO_LARGE {
            return err.into();
        }
        RelayError::FileTooLarge {
            size: self
                .declared
                .unwrap_or(body_limit(self.max_file_size) as u64),
            limit: self.max_file_size,
        }
    }
}

impl Upload {
    async fn read(multipart: &mut Multipart, limits: &Limits) -> Result<Self> {
        let mut upload = Upload {
            video: None,
            stream_key: String::new(),
            looping: false,
            start: true,
        };

        while let Some(field) = multipart.next_field().await.map_err(|e| limits.check(e))? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "video" => {
                    let mime = field.content_type().unwrap_or_default().to_string();
                    let video = field.bytes().await.map_err(|e| limits.check(e))?;
                    upload.video = Some((video, mime));
                }
                "streamKey" => upload.stream_key = field.text().await?,
                "loop" => upload.looping = parse_flag("loop", &field.text().await?)?,
                "start" => upload.start = parse_flag("start", &field.text().await?)?,
                _ => log::debug!("Ignoring form field '{}'", name),
            }
        }
        Ok(upload)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(RelayError::InvalidRequest {
            message: format!("'{}' is not a valid value for {}", other, name),
        }),
    }
}

fn parse_id(raw: &str) -> Result<SessionId> {
    raw.parse()
        .map_err(|_| RelayError::SessionNotFound { id: raw.to_string() })
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Created>)> {
    let limits = Limits {
        max_file_size: state.ingest.max_file_size(),
        declared: headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok()),
    };
    let upload = Upload::read(&mut multipart, &limits).await?;
    let (video, mime) = match upload.video {
        Some(video) => video,
        None if upload.stream_key.trim().is_empty() => return Err(RelayError::EmptyStreamKey),
        None => {
            return Err(RelayError::InvalidRequest {
                message: "missing 'video' field".to_string(),
            })
        }
    };

    let id = state
        .ingest
        .submit(&video, &mime, upload.looping, &upload.stream_key)
        .await?;

    if upload.start {
        if let Err(e) = state.registry.start(&id).await {
            // a session that could not start is not kept around
            if let Err(remove_err) = state.registry.discard(&id).await {
                log::warn!("Failed to discard session {}: {}", id, remove_err);
            }
            return Err(e);
        }
    }
    Ok((StatusCode::CREATED, Json(Created { session_id: id })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.registry.list().await)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>> {
    let id = parse_id(&id)?;
    Ok(Json(state.registry.snapshot(&id).await?))
}

async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SessionSnapshot>)> {
    let id = parse_id(&id)?;
    state.registry.start(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(state.registry.snapshot(&id).await?)))
}

async fn stop_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let id = parse_id(&id)?;
    state.registry.stop(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn remove_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    let id = parse_id(&id)?;
    state.registry.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check_all().await;
    let status = if report.overall_status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}
