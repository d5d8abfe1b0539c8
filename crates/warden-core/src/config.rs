use crate::types::ServerTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("failed to serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),
	#[error("failed to write {path}: {source}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GlobalConfig {
	/// Directory holding the server executables; also their working directory.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub server_dir: Option<PathBuf>,
	/// Where exit logs are written.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub log_dir: Option<PathBuf>,
	#[serde(default)]
	pub supervisor: SupervisorSettings,
	#[serde(default)]
	pub logs: LogsConfig,
	/// Auto-restart flags keyed by server name. Missing entries are off.
	#[serde(default)]
	pub restart: BTreeMap<String, bool>,
	#[serde(default)]
	pub servers: ServerTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorSettings {
	#[serde(default = "default_grace_period")]
	pub grace_period_secs: u64,
	#[serde(default = "default_drain_timeout")]
	pub drain_timeout_ms: u64,
}

impl SupervisorSettings {
	pub fn grace_period(&self) -> Duration {
		Duration::from_secs(self.grace_period_secs)
	}

	pub fn drain_timeout(&self) -> Duration {
		Duration::from_millis(self.drain_timeout_ms)
	}
}

impl Default for SupervisorSettings {
	fn default() -> Self {
		Self {
			grace_period_secs: default_grace_period(),
			drain_timeout_ms: default_drain_timeout(),
		}
	}
}

fn default_grace_period() -> u64 {
	5
}
fn default_drain_timeout() -> u64 {
	2000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogsConfig {
	/// Exit logs kept per server; 0 keeps everything.
	#[serde(default = "default_max_files")]
	pub max_files: u32,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			max_files: default_max_files(),
		}
	}
}

fn default_max_files() -> u32 {
	20
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("warden")
	} else if let Some(home) = home_dir() {
		home.join(".config").join("warden")
	} else {
		PathBuf::from("/tmp/warden/config")
	}
}

pub fn config_path() -> PathBuf {
	config_dir().join(CONFIG_FILE)
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

/// Loads the config at the default location, warning and falling back to
/// defaults on any problem.
pub fn load_global_config() -> GlobalConfig {
	let path = config_path();
	match try_load_from(&path) {
		Ok(config) => config,
		Err(e) => {
			tracing::warn!("{}; using defaults", e);
			GlobalConfig::default()
		}
	}
}

/// A missing file is not an error; it yields the defaults.
pub fn try_load_from(path: &Path) -> Result<GlobalConfig, ConfigError> {
	if !path.exists() {
		return Ok(GlobalConfig::default());
	}
	let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	toml::from_str(&content).map_err(|source| ConfigError::Parse {
		path: path.to_path_buf(),
		source,
	})
}

impl GlobalConfig {
	pub fn to_toml(&self) -> Result<String, ConfigError> {
		Ok(toml::to_string_pretty(self)?)
	}

	pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
		let content = self.to_toml()?;
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
				path: parent.to_path_buf(),
				source,
			})?;
		}
		std::fs::write(path, content).map_err(|source| ConfigError::Write {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn save(&self) -> Result<(), ConfigError> {
		self.save_to(&config_path())
	}

	pub fn auto_restart(&self, server: &str) -> bool {
		self.restart.get(server).copied().unwrap_or(false)
	}
}
