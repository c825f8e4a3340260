use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{multipart::MultipartError, DefaultBodyLimit, FromRequestParts, Multipart, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

mod config;
mod gemini;
mod models;
mod photo;
mod session;
mod video;

use config::Config;
use gemini::{ContentGenerator, GeminiClient, GenerationError};
use models::{InputError, SelectRequest, VideoInstructionsRequest, WorkflowResponse};
use session::{Feature, SessionError, SessionEvent, SessionHandle, SessionStore, SESSION_HEADER};

const IMAGE_FIELD: &str = "image";

#[derive(Clone)]
struct AppState {
    generator: Arc<dyn ContentGenerator>,
    model: String,
    sessions: SessionStore,
    max_upload_bytes: usize,
}

// Resolves the caller's session from `x-session-id`, starting one if needed.
#[async_trait]
impl FromRequestParts<AppState> for SessionHandle {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let requested = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok());
        Ok(state.sessions.open(requested))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return Err(e.into());
        }
    };

    let client = GeminiClient::new(&config.gemini)?;
    tracing::info!(model = %config.gemini.model, "generative client ready");

    let state = AppState {
        generator: Arc::new(client),
        model: config.gemini.model.clone(),
        sessions: SessionStore::default(),
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(session_view))
        .route("/session/select", post(select_feature))
        .route("/video/instructions", post(video_instructions))
        .route("/image/ingredients", post(image_ingredients))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn session_view(session: SessionHandle) -> Response {
    respond(&session, Json(session.view()))
}

async fn select_feature(session: SessionHandle, Json(req): Json<SelectRequest>) -> Response {
    match session.apply(SessionEvent::Select(req.feature)) {
        Ok(()) => {
            tracing::info!(session = %session.id(), feature = %req.feature, "feature selected");
            respond(&session, Json(session.view()))
        }
        Err(e) => respond(&session, session_rejected(e)),
    }
}

async fn video_instructions(
    State(state): State<AppState>,
    session: SessionHandle,
    Json(req): Json<VideoInstructionsRequest>,
) -> Response {
    if let Err(e) = session.check_ready(Feature::VideoAssistant) {
        return respond(&session, session_rejected(e));
    }
    let url = match video::collect_url(&req.url) {
        Ok(url) => url,
        Err(e) => return respond(&session, input_rejected(e)),
    };
    let _in_flight = match session.begin(Feature::VideoAssistant) {
        Ok(guard) => guard,
        Err(e) => return respond(&session, session_rejected(e)),
    };

    tracing::info!(model = %state.model, url, "generating video instructions");
    let result = video::summarize(state.generator.as_ref(), &state.model, url).await;
    if let Err(e) = &result {
        tracing::error!("video instructions failed: {e}");
    }
    let status = status_for(&result);
    respond(&session, (status, Json(video::render(result))))
}

async fn image_ingredients(
    State(state): State<AppState>,
    session: SessionHandle,
    mut multipart: Multipart,
) -> Response {
    // Reject before reading or decoding the upload.
    if let Err(e) = session.check_ready(Feature::ImageSuggestions) {
        return respond(&session, session_rejected(e));
    }

    let (file_name, bytes) = match read_image_field(&mut multipart).await {
        Ok(field) => field,
        Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return respond(
                &session,
                input_rejected(InputError::TooLarge(state.max_upload_bytes)),
            );
        }
        Err(e) => {
            tracing::warn!("unreadable upload: {e}");
            return respond(
                &session,
                (e.status(), Json(WorkflowResponse::warning(e.body_text()))),
            );
        }
    };

    let collected =
        tokio::task::spawn_blocking(move || photo::collect_image(file_name.as_deref(), bytes))
            .await;
    let upload = match collected {
        Ok(Ok(upload)) => upload,
        Ok(Err(e)) => return respond(&session, input_rejected(e)),
        Err(e) => {
            tracing::error!("image decoding task failed: {e}");
            return respond(
                &session,
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(WorkflowResponse::failure("Error identifying ingredients")),
                ),
            );
        }
    };
    let _in_flight = match session.begin(Feature::ImageSuggestions) {
        Ok(guard) => guard,
        Err(e) => return respond(&session, session_rejected(e)),
    };

    tracing::info!(
        model = %state.model,
        mime = upload.mime_type,
        width = upload.width,
        height = upload.height,
        "identifying ingredients"
    );
    let result = photo::identify(state.generator.as_ref(), &state.model, &upload).await;
    if let Err(e) = &result {
        tracing::error!("ingredient identification failed: {e}");
    }
    let status = status_for(&result);
    respond(&session, (status, Json(photo::render(result))))
}

/// The file name and bytes of the `image` field, if the form has one.
async fn read_image_field(
    multipart: &mut Multipart,
) -> Result<(Option<String>, Vec<u8>), MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        return Ok((file_name, bytes.to_vec()));
    }
    Ok((None, Vec::new()))
}

/// Every session-aware response tells the client which session it used.
fn respond(session: &SessionHandle, response: impl IntoResponse) -> Response {
    ([(SESSION_HEADER, session.id().to_string())], response).into_response()
}

fn status_for<T>(result: &Result<T, GenerationError>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(GenerationError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Err(_) => StatusCode::BAD_GATEWAY,
    }
}

fn input_rejected(e: InputError) -> Response {
    tracing::warn!("input rejected: {e}");
    let status = match &e {
        InputError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        InputError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(WorkflowResponse::from(e))).into_response()
}

fn session_rejected(e: SessionError) -> Response {
    tracing::warn!("session rejected action: {e}");
    (
        StatusCode::CONFLICT,
        Json(WorkflowResponse::warning(e.to_string())),
    )
        .into_response()
}
