#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bell::api::{self, AppState, RouterConfig};
use bell::playback::{PlaybackError, Player};
use bell::registry::Registry;
use bell::sound::SoundCatalogue;
use bell::tts::{cache_key, Synthesizer, TtsError};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
pub type WsTx = futures::stream::SplitSink<WsStream, Message>;
pub type WsRx = futures::stream::SplitStream<WsStream>;

/// Player that records what it was asked to play instead of making noise.
pub struct RecordingPlayer {
    tx: mpsc::UnboundedSender<(PathBuf, Vec<u8>)>,
}

#[async_trait]
impl Player for RecordingPlayer {
    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let audio = tokio::fs::read(path).await.unwrap_or_default();
        let _ = self.tx.send((path.to_path_buf(), audio));
        Ok(())
    }
}

pub fn recording_player() -> (Arc<RecordingPlayer>, mpsc::UnboundedReceiver<(PathBuf, Vec<u8>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingPlayer { tx }), rx)
}

/// Synthesizer writing the text itself as the "audio".
pub struct StubSynthesizer {
    dir: PathBuf,
}

#[async_trait]
impl Synthesizer for StubSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PathBuf, TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let path = self.dir.join(cache_key(text));
        tokio::fs::write(&path, format!("RIFF:{}", text))
            .await
            .map_err(|source| TtsError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

pub struct TestApp {
    pub state: AppState,
    pub played: mpsc::UnboundedReceiver<(PathBuf, Vec<u8>)>,
    pub dir: tempfile::TempDir,
}

/// App state over a temporary data dir holding one sound, `gong`
/// (tagged `meeting`).
pub async fn create_test_app(token: Option<&str>) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let sounds = SoundCatalogue::open(dir.path().join("store.json"), dir.path().join("sounds")).unwrap();
    sounds
        .create("gong", vec!["meeting".into()], b"ID3-gong")
        .await
        .unwrap();
    let tts_dir = dir.path().join("tts");
    std::fs::create_dir_all(&tts_dir).unwrap();

    let (player, played) = recording_player();
    let state = AppState {
        registry: Registry::new(),
        sounds,
        player,
        tts: Arc::new(StubSynthesizer { dir: tts_dir }),
        mattermost_token: token.map(String::from),
    };
    TestApp { state, played, dir }
}

pub fn test_router(state: AppState) -> axum::Router {
    api::router(state, RouterConfig::default())
}

pub async fn start_server(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Receive next text message, parse as JSON.
pub async fn recv_json(ws: &mut WsRx) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text message, got {:?}", other),
        }
    }
}

/// Open the registration socket, send `{"name": name}` and return the
/// connection with the server's answer.
pub async fn register(addr: SocketAddr, name: &str) -> (WsTx, WsRx, serde_json::Value) {
    let url = format!("ws://{}/api/v1/clients/register", addr);
    let (ws, _) = connect_async(url.as_str()).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    tx.send(Message::Text(serde_json::json!({ "name": name }).to_string().into()))
        .await
        .unwrap();
    let reply = recv_json(&mut rx).await;
    (tx, rx, reply)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
