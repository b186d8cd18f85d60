use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::Keepalive;

/// Server configuration, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BellConfig {
    /// Address the HTTP server binds to.
    pub listen: SocketAddr,
    /// Root of everything the server stores.
    pub data_dir: PathBuf,
    /// Sound catalogue file, relative to `data_dir`.
    pub store_file: String,
    /// Seconds a client may stay silent before its session is dropped.
    pub pong_wait_secs: u64,
    /// Outbound messages buffered per client before sends fail.
    pub queue_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub player_command: String,
    pub player_args: Vec<String>,
    pub tts_command: String,
    pub tts_voice: String,
    /// Token expected from the chat slash command. Unset disables the check.
    pub mattermost_token: Option<String>,
    /// Extra origins allowed to open the registration WebSocket.
    pub allowed_origins: Vec<String>,
    pub disable_origin_check: bool,
}

impl Default for BellConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 10101)),
            data_dir: PathBuf::from("data"),
            store_file: "store.json".to_string(),
            pong_wait_secs: 5,
            queue_capacity: crate::registry::Registry::DEFAULT_QUEUE_CAPACITY,
            shutdown_grace_ms: 2000,
            player_command: "mpv".to_string(),
            player_args: vec![
                "--no-video".to_string(),
                "--really-quiet".to_string(),
                "--audio-normalize-downmix=yes".to_string(),
            ],
            tts_command: "flite".to_string(),
            tts_voice: "awb".to_string(),
            mattermost_token: None,
            allowed_origins: Vec::new(),
            disable_origin_check: false,
        }
    }
}

impl BellConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    /// [`load`](Self::load), falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "queue_capacity must be at least 1".into(),
            ));
        }
        // Below two seconds the ping period rounds down to zero whole seconds.
        if self.pong_wait_secs < 2 {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "pong_wait_secs must be at least 2".into(),
            ));
        }
        Ok(())
    }

    pub fn sound_dir(&self) -> PathBuf {
        self.data_dir.join("sounds")
    }

    pub fn tts_dir(&self) -> PathBuf {
        self.data_dir.join("tts")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }

    pub fn keepalive(&self) -> Keepalive {
        Keepalive::new(Duration::from_secs(self.pong_wait_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Default config location: `$XDG_CONFIG_HOME/bell/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bell").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(path, reason) => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Warn if the config file is world-readable; it may hold the chat token.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It may contain tokens -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

/// Name a remote player registers under when none is given.
pub fn resolve_hostname(name: Option<&str>) -> String {
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: BellConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen.port(), 10101);
        assert_eq!(config.store_path(), PathBuf::from("data/store.json"));
        assert_eq!(config.sound_dir(), PathBuf::from("data/sounds"));
        assert_eq!(config.tts_dir(), PathBuf::from("data/tts"));
        assert_eq!(config.keepalive().pong_wait, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.tts_voice, "awb");
        assert!(config.mattermost_token.is_none());
        assert!(!config.disable_origin_check);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            listen = "127.0.0.1:9000"
            data_dir = "/var/lib/bell"
            pong_wait_secs = 10
            queue_capacity = 8
            shutdown_grace_ms = 500
            player_command = "paplay"
            player_args = []
            mattermost_token = "slash-secret"
            allowed_origins = ["https://intranet.example"]
            disable_origin_check = true
        "#;
        let config: BellConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.sound_dir(), PathBuf::from("/var/lib/bell/sounds"));
        assert_eq!(config.keepalive().ping_period(), Duration::from_secs(9));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
        assert_eq!(config.player_command, "paplay");
        assert!(config.player_args.is_empty());
        assert_eq!(config.mattermost_token.as_deref(), Some("slash-secret"));
        assert_eq!(config.allowed_origins, vec!["https://intranet.example"]);
        assert!(config.disable_origin_check);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(BellConfig::load(&path).unwrap().is_none());
        assert_eq!(BellConfig::load_or_default(&path).unwrap().pong_wait_secs, 5);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "listen = 12").unwrap();
        let err = BellConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(..)));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn load_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.toml");
        std::fs::write(&path, "queue_capacity = 0").unwrap();
        assert!(matches!(
            BellConfig::load(&path).unwrap_err(),
            ConfigError::Invalid(..)
        ));
    }

    #[test]
    fn load_rejects_sub_two_second_pong_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast.toml");
        std::fs::write(&path, "pong_wait_secs = 1").unwrap();
        let err = BellConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("at least 2"));

        std::fs::write(&path, "pong_wait_secs = 2").unwrap();
        let config = BellConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.keepalive().ping_period().as_secs(), 1);
    }

    #[test]
    fn resolve_hostname_prefers_explicit_name() {
        assert_eq!(resolve_hostname(Some("kitchen")), "kitchen");
        assert!(!resolve_hostname(Some("")).is_empty());
        assert!(!resolve_hostname(None).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn is_world_readable_modes() {
        assert!(is_world_readable(0o644));
        assert!(is_world_readable(0o755));
        assert!(!is_world_readable(0o600));
        assert!(!is_world_readable(0o700));
    }
}
