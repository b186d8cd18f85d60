//! Sound catalogue: named clips on disk, described by a JSON store file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sound {
    pub name: String,
    /// Path relative to the catalogue's sound directory.
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SoundError {
    #[error("sound not found: {0}")]
    NotFound(String),
    #[error("no sound tagged {0:?}")]
    TagNotFound(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("sound store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sound names and tags: non-empty ASCII letters, digits and hyphens.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    if name.len() > 128 {
        return Err(format!("name exceeds 128 characters (got {})", name.len()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!(
            "'{}' contains invalid characters (only letters, digits and hyphens allowed)",
            name
        ));
    }
    Ok(())
}

/// Shared, persistent catalogue of sounds.
///
/// Cloning is cheap. The in-memory map is the source of truth; every
/// mutation rewrites the store file. Mutations are serialized by `writer`
/// so the file on disk always matches the last completed mutation.
#[derive(Clone)]
pub struct SoundCatalogue {
    sounds: Arc<RwLock<BTreeMap<String, Sound>>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    store_file: PathBuf,
    sound_dir: PathBuf,
}

impl SoundCatalogue {
    /// Load the catalogue from `store_file`. A missing file is an empty
    /// catalogue.
    pub fn open(store_file: impl Into<PathBuf>, sound_dir: impl Into<PathBuf>) -> Result<Self, SoundError> {
        let store_file = store_file.into();
        let sound_dir = sound_dir.into();

        let sounds = match std::fs::read(&store_file) {
            Ok(bytes) => {
                let list: Vec<Sound> =
                    serde_json::from_slice(&bytes).map_err(|source| SoundError::Store {
                        path: store_file.clone(),
                        source,
                    })?;
                list.into_iter().map(|s| (s.name.clone(), s)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %store_file.display(), "no sound store yet, starting empty");
                BTreeMap::new()
            }
            Err(source) => {
                return Err(SoundError::Io {
                    path: store_file,
                    source,
                })
            }
        };

        tracing::debug!(count = sounds.len(), "sound catalogue loaded");
        Ok(Self {
            sounds: Arc::new(RwLock::new(sounds)),
            writer: Arc::new(tokio::sync::Mutex::new(())),
            store_file,
            sound_dir,
        })
    }

    pub fn sound_dir(&self) -> &Path {
        &self.sound_dir
    }

    /// All sounds, sorted by name.
    pub fn list(&self) -> Vec<Sound> {
        self.sounds.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Sound> {
        self.sounds.read().get(name).cloned()
    }

    pub fn path_of(&self, sound: &Sound) -> PathBuf {
        self.sound_dir.join(&sound.file_name)
    }

    /// A random sound carrying `tag`.
    pub fn by_tag(&self, tag: &str) -> Result<Sound, SoundError> {
        let sounds = self.sounds.read();
        let tagged: Vec<&Sound> = sounds
            .values()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect();
        tagged
            .choose(&mut rand::thread_rng())
            .map(|s| (*s).clone())
            .ok_or_else(|| SoundError::TagNotFound(tag.to_string()))
    }

    /// Look `key` up as a sound name first, then as a tag.
    pub fn resolve(&self, key: &str) -> Result<Sound, SoundError> {
        if let Some(sound) = self.get(key) {
            return Ok(sound);
        }
        self.by_tag(key)
            .map_err(|_| SoundError::NotFound(key.to_string()))
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, SoundError> {
        let sound = self
            .get(name)
            .ok_or_else(|| SoundError::NotFound(name.to_string()))?;
        let path = self.path_of(&sound);
        tokio::fs::read(&path)
            .await
            .map_err(|source| SoundError::Io { path, source })
    }

    /// Store `audio` as `<name>.mp3` and add (or replace) the entry.
    pub async fn create(&self, name: &str, tags: Vec<String>, audio: &[u8]) -> Result<Sound, SoundError> {
        validate_name(name).map_err(SoundError::InvalidName)?;
        for tag in &tags {
            validate_name(tag).map_err(SoundError::InvalidName)?;
        }

        let _writer = self.writer.lock().await;
        tokio::fs::create_dir_all(&self.sound_dir)
            .await
            .map_err(|source| SoundError::Io {
                path: self.sound_dir.clone(),
                source,
            })?;

        let sound = Sound {
            name: name.to_string(),
            file_name: format!("{}.mp3", name),
            tags,
        };
        let path = self.path_of(&sound);
        write_replace(&path, audio).await?;

        let previous = self.sounds.write().insert(sound.name.clone(), sound.clone());
        if let Err(e) = self.persist().await {
            let mut sounds = self.sounds.write();
            match previous {
                Some(previous) => sounds.insert(previous.name.clone(), previous),
                None => sounds.remove(&sound.name),
            };
            return Err(e);
        }
        tracing::info!(sound = %sound.name, tags = ?sound.tags, "sound added");
        Ok(sound)
    }

    pub async fn delete(&self, name: &str) -> Result<Sound, SoundError> {
        let _writer = self.writer.lock().await;
        let removed = self
            .sounds
            .write()
            .remove(name)
            .ok_or_else(|| SoundError::NotFound(name.to_string()))?;
        if let Err(e) = self.persist().await {
            self.sounds.write().insert(removed.name.clone(), removed);
            return Err(e);
        }

        let path = self.path_of(&removed);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(SoundError::Io { path, source }),
        }
        tracing::info!(sound = %name, "sound deleted");
        Ok(removed)
    }

    /// Rewrite the store file from the in-memory map. Callers hold `writer`.
    async fn persist(&self) -> Result<(), SoundError> {
        let snapshot = self.list();
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|source| SoundError::Store {
            path: self.store_file.clone(),
            source,
        })?;

        if let Some(parent) = self.store_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SoundError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        write_replace(&self.store_file, &bytes).await
    }
}

/// Write `bytes` next to `path` under a unique name, then rename it over
/// `path`. Readers see either the old file or the new one, never a mix.
async fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), SoundError> {
    let tmp = temp_sibling(path);
    if let Err(source) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SoundError::Io { path: tmp, source });
    }
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SoundError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Hidden, unique file name in the same directory as `path`.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()))
}
