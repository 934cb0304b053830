//! HTTP surface of the check-in daemon.
//!
//! | route | handler |
//! |---|---|
//! | `POST /api/face-recognition/` | [`recognize`] |
//! | `POST /api/members/{id}/face-enrollment/` | [`enroll`] |
//! | `POST /api/gallery/reload/` | [`reload_gallery`] |
//! | `GET /api/status/` | [`status`] |

use crate::engine::EngineHandle;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use gymface_core::{CheckinError, CheckinOutcome, CheckinService, MemberId, MemberStore, Probe, StoreError};
use gymface_store::SqliteStore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

pub struct AppState {
    pub service: Arc<CheckinService<SqliteStore>>,
    pub engine: EngineHandle,
    /// Budget for decode, detection and embedding of one image.
    pub timeout: Duration,
}

pub fn router(state: Arc<AppState>, max_image_bytes: usize) -> Router {
    Router::new()
        .route("/api/face-recognition/", post(recognize))
        .route("/api/members/{id}/face-enrollment/", post(enroll))
        .route("/api/gallery/reload/", post(reload_gallery))
        .route("/api/status/", get(status))
        .layer(DefaultBodyLimit::max(max_image_bytes))
        .with_state(state)
}

/// Everything a handler can answer with other than success.
#[derive(Debug)]
pub enum ApiError {
    NoImage,
    InvalidImage,
    TooLarge,
    NoFace,
    Checkin(CheckinError),
}

impl From<CheckinError> for ApiError {
    fn from(err: CheckinError) -> Self {
        ApiError::Checkin(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Checkin(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NoImage => (StatusCode::BAD_REQUEST, json!({ "error": "No image provided" })),
            ApiError::InvalidImage => (StatusCode::BAD_REQUEST, json!({ "error": "Invalid image" })),
            ApiError::TooLarge => (StatusCode::PAYLOAD_TOO_LARGE, json!({ "error": "Image too large" })),
            ApiError::NoFace => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "No face detected", "attendance_updated": false }),
            ),
            ApiError::Checkin(err) => checkin_error_response(err),
        };
        (status, Json(body)).into_response()
    }
}

fn checkin_error_response(err: CheckinError) -> (StatusCode, Value) {
    match err {
        CheckinError::InvalidImage(e) => {
            tracing::info!(error = %e, "undecodable image");
            (StatusCode::BAD_REQUEST, json!({ "error": "Invalid image" }))
        }
        CheckinError::FaceTooSmall { .. } | CheckinError::EmbeddingFailure(_) => {
            tracing::warn!(error = %err, "recognition declined");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": err.to_string(), "attendance_updated": false }),
            )
        }
        CheckinError::EmptyGallery => (
            StatusCode::NOT_FOUND,
            json!({ "error": "No members with face data found" }),
        ),
        CheckinError::StoreFailure(StoreError::MemberNotFound(_)) => {
            (StatusCode::NOT_FOUND, json!({ "error": "Member not found" }))
        }
        CheckinError::StoreFailure(e) => {
            tracing::error!(error = %e, "store failure");
            (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": "Storage unavailable" }))
        }
        CheckinError::Timeout(after) => {
            tracing::warn!(?after, "recognition timed out");
            (StatusCode::GATEWAY_TIMEOUT, json!({ "error": "Recognition timed out" }))
        }
        other => {
            // Backend errors carry model paths and runtime detail; keep them in the log.
            tracing::error!(error = %other, "recognition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Face recognition failed" }))
        }
    }
}

/// Raw image bytes from a multipart `image` field or a JSON `image` string.
pub struct ImagePayload(pub Vec<u8>);

#[derive(Deserialize)]
struct ImageBody {
    image: Option<String>,
}

impl<S> FromRequest<S> for ImagePayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|_| ApiError::NoImage)?;
            while let Some(field) = multipart.next_field().await.map_err(|e| {
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ApiError::TooLarge
                } else {
                    ApiError::InvalidImage
                }
            })? {
                if field.name() != Some("image") {
                    continue;
                }
                let is_file = field.file_name().is_some();
                let data = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        ApiError::TooLarge
                    } else {
                        ApiError::InvalidImage
                    }
                })?;
                if is_file {
                    if data.is_empty() {
                        return Err(ApiError::NoImage);
                    }
                    return Ok(ImagePayload(data.to_vec()));
                }
                let text = std::str::from_utf8(&data).map_err(|_| ApiError::InvalidImage)?;
                return decode_base64_image(text).map(ImagePayload);
            }
            return Err(ApiError::NoImage);
        }

        let body = match Json::<ImageBody>::from_request(req, state).await {
            Ok(Json(body)) => body,
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::TooLarge)
            }
            Err(_) => return Err(ApiError::NoImage),
        };
        let image = body.image.ok_or(ApiError::NoImage)?;
        decode_base64_image(&image).map(ImagePayload)
    }
}

/// Decode a base64 image, dropping any data-URL header up to the first comma.
pub fn decode_base64_image(raw: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = raw.split_once(',').map_or(raw, |(_, rest)| rest);
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(ApiError::NoImage);
    }
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| ApiError::InvalidImage)
}

/// Run the engine on `image` within the configured budget.
async fn probe(state: &AppState, image: Vec<u8>) -> Result<Probe, CheckinError> {
    tokio::time::timeout(state.timeout, state.engine.probe(image))
        .await
        .map_err(|_| CheckinError::Timeout(state.timeout))?
}

pub async fn recognize(
    State(state): State<Arc<AppState>>,
    ImagePayload(image): ImagePayload,
) -> Result<Json<Value>, ApiError> {
    let span = tracing::info_span!("recognize", request_id = %Uuid::new_v4(), bytes = image.len());
    run_recognition(&state, image).instrument(span).await
}

async fn run_recognition(state: &AppState, image: Vec<u8>) -> Result<Json<Value>, ApiError> {
    let embedding = match probe(state, image).await? {
        Probe::NoFace => {
            return Ok(Json(json!({
                "message": "No faces detected",
                "attendance_updated": false,
            })))
        }
        Probe::Face { embedding, .. } => embedding,
    };

    let body = match state.service.check_in(&embedding).await? {
        CheckinOutcome::NotRecognized { decision } => {
            tracing::info!(distance = decision.distance, "face not recognized");
            json!({ "message": "Face not recognized", "attendance_updated": false })
        }
        CheckinOutcome::AlreadyRecorded { member, .. } => {
            let name = member.display_name();
            json!({
                "message": format!("Already updated for {name}"),
                "attendance_updated": false,
                "member_name": name,
            })
        }
        CheckinOutcome::CheckedIn { member, event, .. } => json!({
            "message": format!("Welcome back, {}!", member.first_name),
            "attendance_updated": true,
            "data": event,
            "member_name": member.display_name(),
        }),
    };
    Ok(Json(body))
}

pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    ImagePayload(image): ImagePayload,
) -> Result<Json<Value>, ApiError> {
    let member_id = MemberId(id);
    let span = tracing::info_span!("enroll", request_id = %Uuid::new_v4(), member = %member_id);
    run_enrollment(&state, member_id, image).instrument(span).await
}

async fn run_enrollment(
    state: &AppState,
    member_id: MemberId,
    image: Vec<u8>,
) -> Result<Json<Value>, ApiError> {
    // Check before running the models so unknown ids fail fast.
    if state.service.store().member(member_id).await?.is_none() {
        return Err(StoreError::MemberNotFound(member_id).into());
    }

    let Probe::Face { embedding, face } = probe(state, image).await? else {
        return Err(ApiError::NoFace);
    };
    let (member, report) = state.service.enroll(member_id, &embedding).await?;

    Ok(Json(json!({
        "message": format!("Face enrolled for {}", member.display_name()),
        "member": member.id,
        "member_name": member.display_name(),
        "detection_confidence": face.confidence,
        "embedding_dimension": embedding.dimension(),
        "gallery": report,
    })))
}

pub async fn reload_gallery(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let report = state.service.reload_gallery().await?;
    Ok(Json(json!(report)))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let gallery = state.service.gallery();
    let (detector, extractor) = state.engine.backends();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": state.engine.is_running(),
        "detector": detector,
        "extractor": extractor,
        "gallery_size": gallery.len(),
        "gallery_loaded_at": gallery.loaded_at(),
        "embedding_dimension": state.service.dimension(),
        "distance_metric": state.service.metric().to_string(),
        "threshold": state.service.threshold(),
    }))
}
