use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};

use crate::spotify_rs::auth::SpotifyCredentials;
use crate::ytmusic_rs::client::YtMusicSettings;

const APP_DIR: &str = "playlist-sync";

const DEFAULT_CONFIG: &str = r#"# playlist-sync configuration

# Where the operation log, lookup cache and not-found list are kept.
# Defaults to the platform cache directory.
# cache_dir = "~/.cache/playlist-sync"

[spotify]
# Application credentials from https://developer.spotify.com/dashboard
# (or SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET).
client_id = ""
client_secret = ""
# A user refresh token enables library commands (SPOTIFY_REFRESH_TOKEN).
# refresh_token = ""

[ytmusic]
# OAuth bearer token for music.youtube.com (or YTMUSIC_ACCESS_TOKEN).
access_token = ""
requests_per_second = 5
language = "en"

[sync]
batch_size = 5
batch_delay = "2s"
settle_delay = "2s"
tolerance = 0.9
# Number of leading tracks compared for order; 0 compares all of them.
comparison_window = 10
max_playlist_tracks = 5000
interval = "60s"
"#;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    cache_dir: Option<String>,
    spotify: SpotifyConfig,
    ytmusic: YtMusicConfig,
    sync: SyncConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YtMusicConfig {
    pub access_token: String,
    pub requests_per_second: u32,
    pub language: String,
}

impl Default for YtMusicConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            requests_per_second: 5,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub batch_delay: String,
    pub settle_delay: String,
    pub tolerance: f64,
    pub comparison_window: usize,
    pub max_playlist_tracks: u32,
    pub interval: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: "2s".to_string(),
            settle_delay: "2s".to_string(),
            tolerance: 0.9,
            comparison_window: 10,
            max_playlist_tracks: 5000,
            interval: "60s".to_string(),
        }
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .wrap_err_with(|| format!("Invalid duration for `{key}`: {value:?}"))
}

/// Config value if set, otherwise the environment variable.
fn or_env(value: &str, var: &str) -> String {
    if value.is_empty() {
        std::env::var(var).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Default location of the config file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIR).join("config.toml"))
    }

    /// Load `path` (or the default location). A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path().ok_or_eyre("Could not determine config directory")?,
        };
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Write the commented default config unless a file already exists.
    /// Returns whether a file was written.
    pub fn create_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, DEFAULT_CONFIG)
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
        Ok(true)
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(expand_path(dir)),
            None => dirs::cache_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_eyre("Could not determine cache directory; set `cache_dir`"),
        }
    }

    pub fn operation_log_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("playlist_operations.json"))
    }

    pub fn lookup_cache_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("lookup.json"))
    }

    pub fn not_found_path(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("noresults_youtube.txt"))
    }

    pub fn spotify_credentials(&self) -> SpotifyCredentials {
        SpotifyCredentials {
            client_id: or_env(&self.spotify.client_id, "SPOTIFY_CLIENT_ID"),
            client_secret: or_env(&self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET"),
            refresh_token: self
                .spotify
                .refresh_token
                .clone()
                .filter(|token| !token.is_empty())
                .or_else(|| std::env::var("SPOTIFY_REFRESH_TOKEN").ok())
                .filter(|token| !token.is_empty()),
        }
    }

    pub fn ytmusic_settings(&self) -> YtMusicSettings {
        YtMusicSettings {
            access_token: or_env(&self.ytmusic.access_token, "YTMUSIC_ACCESS_TOKEN"),
            requests_per_second: self.ytmusic.requests_per_second,
            language: self.ytmusic.language.clone(),
        }
    }

    pub fn sync(&self) -> &SyncConfig {
        &self.sync
    }
}

impl SyncConfig {
    pub fn batch_delay(&self) -> Result<Duration> {
        parse_duration("batch_delay", &self.batch_delay)
    }

    pub fn settle_delay(&self) -> Result<Duration> {
        parse_duration("settle_delay", &self.settle_delay)
    }

    pub fn interval(&self) -> Result<Duration> {
        parse_duration("interval", &self.interval)
    }
}
