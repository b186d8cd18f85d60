pub mod api;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod playback;
pub mod player;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod sound;
pub mod tts;
