pub mod error;
mod handlers;
mod mattermost;
pub mod origin;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::playback::Player;
use crate::registry::Registry;
use crate::sound::SoundCatalogue;
use crate::tts::Synthesizer;

use handlers::*;

/// Largest sound file accepted by the upload endpoint.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub sounds: SoundCatalogue,
    /// Speakers attached to the server itself.
    pub player: Arc<dyn Player>,
    pub tts: Arc<dyn Synthesizer>,
    /// Expected chat slash command token; `None` accepts any.
    pub mattermost_token: Option<String>,
}

/// Body of `GET /api/v1/clients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientsList {
    pub clients: Vec<String>,
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for a permissive setup.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origins allowed for CORS and for the registration WebSocket.
    pub allowed_origins: Vec<String>,
    /// Reject WebSocket upgrades from foreign origins.
    pub check_origin: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            check_origin: true,
        }
    }
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let api = Router::new()
        .route("/clients", get(list_clients))
        .route("/clients/register", get(register_client))
        .route("/play/{sound}", get(play))
        .route("/sounds", get(list_sounds))
        .route(
            "/sounds/{sound}",
            get(get_sound).post(add_sound).delete(delete_sound),
        )
        .route("/tts", post(tts))
        .route("/tts/retrieve", post(tts_retrieve))
        .route("/mattermost", post(mattermost::slash_command));

    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ));

    let router = if config.check_origin {
        let allowed_origins = config.allowed_origins.clone();
        router.layer(axum::middleware::from_fn(move |req, next| {
            let origins = allowed_origins.clone();
            origin::check_ws_origin(origins, req, next)
        }))
    } else {
        tracing::warn!("websocket origin check disabled");
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.allowed_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
    }
}
