//! User configuration for the debug tooling, read from `config.toml`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "tizen-debug";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("writing config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialising config: {0}")]
    Serialise(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub devices: DevicesConfig,
    pub launch: LaunchConfig,
    pub hot_reload: HotReloadConfig,
    pub emulator: EmulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Explicit path to the `sdb` executable
    pub path: Option<PathBuf>,
    /// Per-command timeout; 0 waits indefinitely
    pub command_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            command_timeout_secs: 300,
        }
    }
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub poll_interval_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
        }
    }
}

impl DevicesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Root of the Tizen SDK installation (contains `tools/`, `on-demand/`)
    pub sdk_root: Option<PathBuf>,
    /// Ask the runtime to ignore native images when debugging
    pub disable_native_images: bool,
    /// Extra arguments passed to the application on launch
    pub app_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            sdk_root: None,
            disable_native_images: true,
            app_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub queue_capacity: usize,
    pub item_timeout_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            item_timeout_ms: 2000,
        }
    }
}

impl HotReloadConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Program and arguments used to boot an emulator when no device is attached
    pub command: Vec<String>,
}

impl Config {
    /// Default location, `<config dir>/tizen-debug/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                tracing::debug!("no config directory, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.expand_paths();
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn expand_paths(&mut self) {
        if let Some(path) = self.bridge.path.take() {
            self.bridge.path = Some(normalise_path(&path));
        }
        if let Some(path) = self.launch.sdk_root.take() {
            self.launch.sdk_root = Some(normalise_path(&path));
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn normalise_path(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
        tracing::warn!("cannot determine home directory, using path as-is");
    }
    path.to_path_buf()
}
