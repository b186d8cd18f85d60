use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::dispatch::DispatchError;
use crate::playback::PlaybackError;
use crate::registry::SendError;
use crate::sound::SoundError;
use crate::tts::TtsError;

/// Structured error type for all API handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message. Implements [`IntoResponse`] so handlers can
/// return `Result<T, ApiError>` directly.
#[derive(Debug)]
pub enum ApiError {
    /// 403 - Chat command token missing or wrong.
    AuthInvalid,
    /// 403 - WebSocket upgrade from a foreign origin.
    OriginNotAllowed,
    /// 400 - Malformed or invalid request.
    InvalidRequest(String),
    /// 400 - Sound name or tag with forbidden characters.
    InvalidSoundName(String),
    /// 404 - No sound with this name or tag.
    SoundNotFound(String),
    /// 404 - No player registered under this name.
    DestinationNotFound(String),
    /// 503 - The player's outbound queue is full.
    DestinationBusy(String),
    /// 500 - Local playback failed.
    PlaybackFailed(String),
    /// 500 - Speech synthesis failed.
    TtsFailed(String),
    /// 500 - Catch-all internal error.
    InternalError(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::OriginNotAllowed => StatusCode::FORBIDDEN,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSoundName(_) => StatusCode::BAD_REQUEST,
            ApiError::SoundNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DestinationNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DestinationBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PlaybackFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TtsFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthInvalid => "auth_invalid",
            ApiError::OriginNotAllowed => "origin_not_allowed",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidSoundName(_) => "invalid_sound_name",
            ApiError::SoundNotFound(_) => "sound_not_found",
            ApiError::DestinationNotFound(_) => "destination_not_found",
            ApiError::DestinationBusy(_) => "destination_busy",
            ApiError::PlaybackFailed(_) => "playback_failed",
            ApiError::TtsFailed(_) => "tts_failed",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::AuthInvalid => "Invalid command token.".to_string(),
            ApiError::OriginNotAllowed => "Origin not allowed.".to_string(),
            ApiError::InvalidRequest(detail) => format!("Invalid request: {}.", detail),
            ApiError::InvalidSoundName(detail) => format!("Invalid sound name: {}.", detail),
            ApiError::SoundNotFound(name) => {
                format!("Sound or tag has not been found: {}.", name)
            }
            ApiError::DestinationNotFound(name) => {
                format!("Client {:?} isn't registered.", name)
            }
            ApiError::DestinationBusy(name) => {
                format!("Client {:?} is not keeping up. Try again shortly.", name)
            }
            ApiError::PlaybackFailed(detail) => format!("Playback failed: {}.", detail),
            ApiError::TtsFailed(detail) => format!("Text to speech failed: {}.", detail),
            ApiError::InternalError(detail) => format!("Internal error: {}.", detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(code = self.code(), message = %self.message(), "request failed");
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<SendError> for ApiError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NotRegistered(name) => ApiError::DestinationNotFound(name),
            SendError::QueueFull(name) => ApiError::DestinationBusy(name),
            SendError::Encode(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Play(e) | DispatchError::Say(e) => e.into(),
        }
    }
}

impl From<SoundError> for ApiError {
    fn from(err: SoundError) -> Self {
        match err {
            SoundError::NotFound(name) | SoundError::TagNotFound(name) => {
                ApiError::SoundNotFound(name)
            }
            SoundError::InvalidName(detail) => ApiError::InvalidSoundName(detail),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<PlaybackError> for ApiError {
    fn from(err: PlaybackError) -> Self {
        ApiError::PlaybackFailed(err.to_string())
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        match err {
            TtsError::EmptyText => ApiError::InvalidRequest("text must not be empty".into()),
            other => ApiError::TtsFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn response_parts(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = Body::new(response.into_body())
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn destination_not_found_shape() {
        let (status, json) =
            response_parts(ApiError::DestinationNotFound("kitchen".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "destination_not_found");
        assert_eq!(json["error"]["message"], "Client \"kitchen\" isn't registered.");
    }

    #[tokio::test]
    async fn destination_busy_is_503() {
        let (status, json) = response_parts(ApiError::DestinationBusy("x".into())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "destination_busy");
    }

    #[tokio::test]
    async fn sound_not_found_is_404() {
        let (status, json) = response_parts(ApiError::SoundNotFound("moo".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "sound_not_found");
    }

    #[tokio::test]
    async fn auth_and_origin_are_403() {
        assert_eq!(response_parts(ApiError::AuthInvalid).await.0, StatusCode::FORBIDDEN);
        let (status, json) = response_parts(ApiError::OriginNotAllowed).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["code"], "origin_not_allowed");
    }

    #[tokio::test]
    async fn invalid_request_message() {
        let (status, json) = response_parts(ApiError::InvalidRequest("bad".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "Invalid request: bad.");
    }

    #[test]
    fn send_errors_map_by_variant() {
        let err: ApiError = SendError::NotRegistered("a".into()).into();
        assert_eq!(err.code(), "destination_not_found");
        let err: ApiError = SendError::QueueFull("a".into()).into();
        assert_eq!(err.code(), "destination_busy");
        let err: ApiError = DispatchError::Say(SendError::NotRegistered("b".into())).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn sound_errors_map_by_variant() {
        let err: ApiError = SoundError::TagNotFound("t".into()).into();
        assert_eq!(err.code(), "sound_not_found");
        let err: ApiError = SoundError::InvalidName("x y".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err: ApiError = TtsError::EmptyText.into();
        assert_eq!(err.code(), "invalid_request");
    }
}
