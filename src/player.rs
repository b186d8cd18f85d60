//! Remote player: registers with a server and plays what it is told to.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::envelope::{Envelope, HandshakeReply, Kind, RegisterRequest};
use crate::playback::Player;
use crate::sound::{temp_sibling, validate_name};

/// How long to wait for the server's close frame after sending ours.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Registration endpoint for a server base URL. `http` becomes `ws`,
/// `https` becomes `wss`; a bare host is treated as `http`.
pub fn register_url(server: &str) -> Result<String> {
    let server = server.trim().trim_end_matches('/');
    let rest = if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if server.contains("://") {
        bail!("unsupported scheme in server address {:?}", server);
    } else {
        format!("ws://{}", server)
    };
    if rest.ends_with("://") {
        bail!("server address {:?} has no host", server);
    }
    Ok(format!("{}/api/v1/clients/register", rest))
}

/// Base HTTP URL for a server address, adding `http://` when absent.
pub fn http_base(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

#[derive(Clone)]
pub struct RemotePlayer {
    server: String,
    name: String,
    http: reqwest::Client,
    player: Arc<dyn Player>,
    cache_dir: PathBuf,
}

impl RemotePlayer {
    pub fn new(
        server: impl Into<String>,
        name: impl Into<String>,
        player: Arc<dyn Player>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server: http_base(&server.into()),
            name: name.into(),
            http: reqwest::Client::new(),
            player,
            cache_dir: cache_dir.into(),
        }
    }

    /// Register and process commands until the server closes the connection
    /// or `shutdown` resolves.
    pub async fn run<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", self.cache_dir.display()))?;

        let url = register_url(&self.server)?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        let (mut tx, mut rx) = ws.split();

        let request = serde_json::to_string(&RegisterRequest {
            name: self.name.clone(),
        })?;
        tx.send(Message::Text(request.into()))
            .await
            .context("failed to send registration request")?;

        let assigned = read_handshake(&mut rx).await?;
        if assigned != self.name {
            tracing::warn!(requested = %self.name, assigned = %assigned, "server assigned another name");
        }
        tracing::info!(name = %assigned, server = %self.server, "client registered");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                msg = rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(text.as_str()) {
                        Ok(envelope) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.handle(envelope).await });
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to decode message from server"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(reason = ?frame.map(|f| f.reason.as_str().to_string()), "server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("connection to server failed"),
                    None => break,
                },
                _ = &mut shutdown => {
                    tracing::info!("interrupt received, closing connection");
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client shutting down".into(),
                    }));
                    if let Err(e) = tx.send(close).await {
                        tracing::debug!(error = %e, "failed to send close frame");
                    }
                    let wait_close = async {
                        while let Some(Ok(msg)) = rx.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    };
                    let _ = tokio::time::timeout(CLOSE_WAIT, wait_close).await;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle(&self, envelope: Envelope) {
        let result = match envelope.kind {
            Kind::Error => {
                tracing::error!(message = %envelope.data, "server reported an error");
                Ok(())
            }
            Kind::Sound => self.play_sound(&envelope.data).await,
            Kind::Tts => self.say(&envelope.data).await,
        };
        if let Err(e) = result {
            tracing::error!(kind = %envelope.kind, error = %e, "failed to handle command");
        }
    }

    async fn play_sound(&self, name: &str) -> Result<()> {
        validate_name(name).map_err(anyhow::Error::msg)?;
        tracing::info!(sound = %name, "playing sound");
        let audio = self
            .http
            .get(format!("{}/api/v1/sounds/{}", self.server, name))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let path = self.cache_dir.join(format!("{}.mp3", name));
        store_replace(&path, &audio).await?;
        self.player.play(&path).await?;
        Ok(())
    }

    async fn say(&self, text: &str) -> Result<()> {
        tracing::info!(text = %text, "speaking");
        let audio = self
            .http
            .post(format!("{}/api/v1/tts/retrieve", self.server))
            .form(&[("text", text)])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let path = self.cache_dir.join(crate::tts::cache_key(text));
        store_replace(&path, &audio).await?;
        self.player.play(&path).await?;
        Ok(())
    }
}

/// Put `audio` at `path` via a uniquely named temp file, so a concurrent
/// download of the same clip never truncates a file that is being played.
async fn store_replace(path: &Path, audio: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    let written = match tokio::fs::write(&tmp, audio).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written.with_context(|| format!("failed to write {}", path.display()))
}

async fn read_handshake<R>(rx: &mut R) -> Result<String>
where
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match rx.next().await {
            Some(Ok(Message::Text(text))) => {
                let reply: HandshakeReply = serde_json::from_str(text.as_str())
                    .context("unexpected registration response")?;
                return match reply {
                    HandshakeReply::Registered(response) => Ok(response.name),
                    HandshakeReply::Rejected(err) => bail!("registration refused: {}", err.error),
                };
            }
            Some(Ok(Message::Close(_))) | None => bail!("server closed the connection during registration"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("registration failed"),
        }
    }
}
