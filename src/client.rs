//! HTTP client for a running bell server.
//!
//! Backs the CLI subcommands: player listing, play/say, sound management
//! and catalogue backup/restore.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use crate::api::ClientsList;
use crate::player::http_base;
use crate::sound::{validate_name, Sound};

/// File holding the sound list inside a backup directory.
pub const BACKUP_INDEX: &str = "sounds.json";
/// Directory holding the audio inside a backup directory.
pub const BACKUP_SOUNDS: &str = "sounds";

/// A client for one bell server.
#[derive(Debug, Clone)]
pub struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(server: &str) -> Self {
        Self {
            base: http_base(server),
            http: reqwest::Client::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    pub async fn clients(&self) -> Result<Vec<String>> {
        let url = self.url("/clients");
        let list: ClientsList = check(self.http.get(&url).send().await, &url)
            .await?
            .json()
            .await?;
        Ok(list.clients)
    }

    /// Play `sound` (or a random sound tagged `sound` when `tag` is set)
    /// on the server, or on `destination` when given.
    pub async fn play(&self, sound: &str, tag: bool, destination: Option<&str>) -> Result<()> {
        validate_name(sound).map_err(anyhow::Error::msg)?;
        let url = self.url(&format!("/play/{}", sound));
        let mut request = self.http.get(&url);
        if tag {
            request = request.query(&[("tag", "true")]);
        }
        if let Some(destination) = destination {
            request = request.query(&[("destination", destination)]);
        }
        check(request.send().await, &url).await?;
        Ok(())
    }

    pub async fn say(&self, text: &str, destination: Option<&str>) -> Result<()> {
        let url = self.url("/tts");
        let mut form = vec![("text", text)];
        if let Some(destination) = destination {
            form.push(("destination", destination));
        }
        check(self.http.post(&url).form(&form).send().await, &url).await?;
        Ok(())
    }

    pub async fn list_sounds(&self) -> Result<Vec<Sound>> {
        let url = self.url("/sounds");
        Ok(check(self.http.get(&url).send().await, &url)
            .await?
            .json()
            .await?)
    }

    pub async fn get_sound(&self, name: &str) -> Result<Bytes> {
        validate_name(name).map_err(anyhow::Error::msg)?;
        let url = self.url(&format!("/sounds/{}", name));
        Ok(check(self.http.get(&url).send().await, &url)
            .await?
            .bytes()
            .await?)
    }

    pub async fn add_sound(&self, name: &str, tags: &[String], audio: Vec<u8>) -> Result<Sound> {
        validate_name(name).map_err(anyhow::Error::msg)?;
        let url = self.url(&format!("/sounds/{}", name));
        let mut request = self.http.post(&url).body(audio);
        if !tags.is_empty() {
            request = request.query(&[("tags", tags.join(","))]);
        }
        Ok(check(request.send().await, &url).await?.json().await?)
    }

    pub async fn delete_sound(&self, name: &str) -> Result<()> {
        validate_name(name).map_err(anyhow::Error::msg)?;
        let url = self.url(&format!("/sounds/{}", name));
        check(self.http.delete(&url).send().await, &url).await?;
        Ok(())
    }

    /// Download the whole catalogue into `dir`, which must not exist yet:
    /// `sounds.json` plus one `sounds/<name>.mp3` per sound. Waits `pause`
    /// between downloads. Returns the number of sounds saved.
    pub async fn backup(&self, dir: &Path, pause: Duration) -> Result<usize> {
        let sounds = self.list_sounds().await?;

        tokio::fs::create_dir(dir)
            .await
            .with_context(|| format!("failed to create backup directory {}", dir.display()))?;
        let audio_dir = dir.join(BACKUP_SOUNDS);
        tokio::fs::create_dir(&audio_dir)
            .await
            .with_context(|| format!("failed to create {}", audio_dir.display()))?;

        let index = dir.join(BACKUP_INDEX);
        tokio::fs::write(&index, serde_json::to_vec_pretty(&sounds)?)
            .await
            .with_context(|| format!("failed to write {}", index.display()))?;

        for (i, sound) in sounds.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let audio = self.get_sound(&sound.name).await?;
            let path = audio_dir.join(format!("{}.mp3", sound.name));
            tokio::fs::write(&path, &audio)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(
                progress = %format!("{}%", (i + 1) * 100 / sounds.len()),
                sound = %sound.name,
                "sound saved"
            );
        }
        Ok(sounds.len())
    }

    /// Upload every sound of a backup made by [`backup`](Self::backup).
    /// A sound that fails is logged and skipped. Returns the number of
    /// sounds uploaded.
    pub async fn restore(&self, dir: &Path, pause: Duration) -> Result<usize> {
        let index = dir.join(BACKUP_INDEX);
        let raw = tokio::fs::read(&index)
            .await
            .with_context(|| format!("failed to read {}", index.display()))?;
        let sounds: Vec<Sound> = serde_json::from_slice(&raw)
            .with_context(|| format!("{} is not a sound list", index.display()))?;

        let mut restored = 0;
        for (i, sound) in sounds.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let path = dir.join(BACKUP_SOUNDS).join(format!("{}.mp3", sound.name));
            let uploaded = match tokio::fs::read(&path).await {
                Ok(audio) => self.add_sound(&sound.name, &sound.tags, audio).await.map(|_| ()),
                Err(e) => Err(anyhow::Error::new(e).context(format!("failed to read {}", path.display()))),
            };
            match uploaded {
                Ok(()) => {
                    restored += 1;
                    tracing::info!(
                        progress = %format!("{}%", (i + 1) * 100 / sounds.len()),
                        sound = %sound.name,
                        "sound uploaded"
                    );
                }
                Err(e) => tracing::warn!(sound = %sound.name, error = %e, "failed to restore sound"),
            }
        }
        Ok(restored)
    }
}

/// Delay between requests for a limit of `per_minute` requests per minute.
/// Zero means no limit.
pub fn pause_for_rate(per_minute: u32) -> Duration {
    if per_minute == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(60) / per_minute
    }
}

/// Distinct tags across `sounds`, sorted.
pub fn tags_of(sounds: &[Sound]) -> Vec<String> {
    sounds
        .iter()
        .flat_map(|s| s.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Bordered two-column table of sound names and their tags.
pub fn sound_table(sounds: &[Sound]) -> String {
    const NAME: &str = "Sound";
    const TAGS: &str = "Tags";

    let rows: Vec<(&str, String)> = sounds
        .iter()
        .map(|s| (s.name.as_str(), s.tags.join(",")))
        .collect();
    let name_width = rows.iter().map(|(n, _)| n.len()).max().unwrap_or(0).max(NAME.len());
    let tags_width = rows.iter().map(|(_, t)| t.len()).max().unwrap_or(0).max(TAGS.len());

    let rule = format!("+-{}-+-{}-+\n", "-".repeat(name_width), "-".repeat(tags_width));
    let line = |name: &str, tags: &str| format!("| {:<nw$} | {:<tw$} |\n", name, tags, nw = name_width, tw = tags_width);

    let mut out = String::new();
    out.push_str(&rule);
    out.push_str(&line(NAME, TAGS));
    out.push_str(&rule);
    for (name, tags) in &rows {
        out.push_str(&line(name, tags));
    }
    out.push_str(&rule);
    out
}

/// Pass a successful response through; turn an error response into an
/// error carrying the server's message.
async fn check(
    response: reqwest::Result<reqwest::Response>,
    url: &str,
) -> Result<reqwest::Response> {
    let response = response.with_context(|| format!("failed to reach {}", url))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    match body["error"]["message"].as_str() {
        Some(message) => bail!("{}", message),
        None => bail!("{} returned {}", url, status),
    }
}
