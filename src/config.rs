use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    TracksideError,
    scheduler::{TICK_INTERVAL_MS, Tick},
    transport::{
        Backoff,
        websocket::{DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_MIN_RECONNECT_DELAY_MS},
    },
};

const CONFIG_DIR_NAME: &str = "trackside";
const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8772/api/race-control";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server_url: String,
    /// Show speeds in mph instead of km/h.
    pub use_mph: bool,
    pub progress_interval_ms: u64,
    pub standings_interval_ms: u64,
    pub feeds_interval_ms: u64,
    pub min_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            use_mph: false,
            progress_interval_ms: TICK_INTERVAL_MS,
            standings_interval_ms: TICK_INTERVAL_MS,
            feeds_interval_ms: TICK_INTERVAL_MS,
            min_reconnect_delay_ms: DEFAULT_MIN_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, TracksideError> {
        Ok(dirs::config_dir()
            .ok_or(TracksideError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Loads the config from the user's config directory. `None` when nothing was saved yet.
    pub fn from_local_file() -> Result<Option<Self>, TracksideError> {
        Self::from_file(&Self::default_path()?)
    }

    pub fn from_file(config_path: &Path) -> Result<Option<Self>, TracksideError> {
        if !config_path.exists() {
            return Ok(None);
        }

        let file =
            File::open(config_path).map_err(|e| TracksideError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| TracksideError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), TracksideError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), TracksideError> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| TracksideError::ConfigIOError { source: e })?;
        }

        let file =
            File::create(config_path).map_err(|e| TracksideError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| TracksideError::ConfigSerializeError { source: e })
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.min_reconnect_delay_ms),
            Duration::from_millis(self.max_reconnect_delay_ms),
        )
    }

    /// Period of a scheduler tick. Zero is treated as the default period.
    pub fn tick_interval(&self, tick: Tick) -> Duration {
        let ms = match tick {
            Tick::Progress => self.progress_interval_ms,
            Tick::Standings => self.standings_interval_ms,
            Tick::Feeds => self.feeds_interval_ms,
        };
        Duration::from_millis(if ms == 0 { TICK_INTERVAL_MS } else { ms })
    }
}
