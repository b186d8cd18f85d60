use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::dispatch::{self, Directory};
use crate::sound::{validate_name, Sound};

use super::error::ApiError;
use super::{AppState, ClientsList};

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(super) async fn list_clients(State(state): State<AppState>) -> Json<ClientsList> {
    Json(ClientsList {
        clients: Directory::list(&state.registry),
    })
}

pub(super) async fn register_client(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        match state.registry.register(sink, stream).await {
            Ok(name) => tracing::debug!(client = %name, "client session started"),
            Err(e) => tracing::debug!(error = %e, "client session not started"),
        }
    })
}

#[derive(Deserialize)]
pub(super) struct PlayQuery {
    #[serde(default)]
    destination: Option<String>,
    /// Only match tags, never a sound name.
    #[serde(default)]
    tag: bool,
}

fn destination(raw: Option<String>) -> Option<String> {
    raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())
}

/// Play a sound (by name, else a random one with that tag) on the server's
/// speakers or on a registered player. The HTTP call returns once local
/// playback has finished.
pub(super) async fn play(
    State(state): State<AppState>,
    Path(sound): Path<String>,
    Query(query): Query<PlayQuery>,
) -> Result<StatusCode, ApiError> {
    validate_name(&sound).map_err(ApiError::InvalidSoundName)?;
    let resolved = if query.tag {
        state.sounds.by_tag(&sound)?
    } else {
        state.sounds.resolve(&sound)?
    };

    match destination(query.destination) {
        Some(dest) => dispatch::play_on(&state.registry, &dest, &resolved.name)?,
        None => {
            tracing::info!(sound = %resolved.name, "playing sound locally");
            state.player.play(&state.sounds.path_of(&resolved)).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_sounds(State(state): State<AppState>) -> Json<Vec<Sound>> {
    Json(state.sounds.list())
}

pub(super) async fn get_sound(
    State(state): State<AppState>,
    Path(sound): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_name(&sound).map_err(ApiError::InvalidSoundName)?;
    let audio = state.sounds.read(&sound).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio))
}

#[derive(Deserialize)]
pub(super) struct TagsQuery {
    #[serde(default)]
    tags: Option<String>,
}

pub(super) async fn add_sound(
    State(state): State<AppState>,
    Path(sound): Path<String>,
    Query(query): Query<TagsQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Sound>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::InvalidRequest("sound body is empty".into()));
    }
    let tags = query
        .tags
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let created = state.sounds.create(&sound, tags, &body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn delete_sound(
    State(state): State<AppState>,
    Path(sound): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_name(&sound).map_err(ApiError::InvalidSoundName)?;
    state.sounds.delete(&sound).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct TtsForm {
    #[serde(default)]
    text: String,
    #[serde(default)]
    destination: Option<String>,
}

pub(super) async fn tts(
    State(state): State<AppState>,
    Form(form): Form<TtsForm>,
) -> Result<StatusCode, ApiError> {
    let text = form.text.trim();
    if text.is_empty() {
        return Err(ApiError::InvalidRequest("text must not be empty".into()));
    }

    match destination(form.destination) {
        Some(dest) => dispatch::say_on(&state.registry, &dest, text)?,
        None => {
            let path = state.tts.synthesize(text).await?;
            state.player.play(&path).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct TextForm {
    #[serde(default)]
    text: String,
}

/// Synthesize `text` and return the audio instead of playing it.
pub(super) async fn tts_retrieve(
    State(state): State<AppState>,
    Form(form): Form<TextForm>,
) -> Result<impl IntoResponse, ApiError> {
    let text = form.text.trim();
    if text.is_empty() {
        return Err(ApiError::InvalidRequest("text must not be empty".into()));
    }
    let path = state.tts.synthesize(text).await?;
    let audio = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::InternalError(format!("reading {}: {}", path.display(), e)))?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio))
}
