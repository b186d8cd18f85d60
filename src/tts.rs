//! Text-to-speech with an on-disk cache keyed by the text's SHA-256.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("text must not be empty")]
    EmptyText,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns text into an audio file.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Path of a WAV file speaking `text`.
    async fn synthesize(&self, text: &str) -> Result<PathBuf, TtsError>;
}

/// Cache file name for `text`.
pub fn cache_key(text: &str) -> String {
    format!("{:x}.wav", Sha256::digest(text.as_bytes()))
}

/// Runs `flite -t <text> -o <file> -voice <voice>`.
#[derive(Debug, Clone)]
pub struct FliteSynthesizer {
    program: String,
    voice: String,
    cache_dir: PathBuf,
}

impl FliteSynthesizer {
    pub fn new(program: impl Into<String>, voice: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            voice: voice.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[async_trait]
impl Synthesizer for FliteSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PathBuf, TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }

        let path = self.cache_dir.join(cache_key(text));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "tts cache hit");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|source| TtsError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;

        // flite writes incrementally; only a finished file may appear under
        // the cache name.
        let partial = self
            .cache_dir
            .join(format!(".{}.{}.wav", cache_key(text), uuid::Uuid::new_v4().simple()));

        tracing::debug!(program = %self.program, voice = %self.voice, "synthesizing speech");
        let output = tokio::process::Command::new(&self.program)
            .arg("-t")
            .arg(text)
            .arg("-o")
            .arg(&partial)
            .arg("-voice")
            .arg(&self.voice)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TtsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(TtsError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if let Err(source) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(TtsError::Io { path, source });
        }
        Ok(path)
    }
}
