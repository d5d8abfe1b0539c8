use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical server names shipped with the default table.
pub const WORLD_SERVER: &str = "World Server";
pub const SEARCH_SERVER: &str = "Search Server";
pub const MAP_SERVER: &str = "Map Server";
pub const CONNECT_SERVER: &str = "Connect Server";

/// One row of the executable map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerDescriptor<'a> {
	pub name: &'a str,
	pub executable: &'a str,
}

/// Fixed mapping from logical server name to executable filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerTable(BTreeMap<String, String>);

impl ServerTable {
	pub fn new<N, E>(entries: impl IntoIterator<Item = (N, E)>) -> Self
	where
		N: Into<String>,
		E: Into<String>,
	{
		Self(entries.into_iter().map(|(n, e)| (n.into(), e.into())).collect())
	}

	pub fn executable(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(|s| s.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(|s| s.as_str())
	}

	pub fn iter(&self) -> impl Iterator<Item = ServerDescriptor<'_>> {
		self.0.iter().map(|(name, executable)| ServerDescriptor { name, executable })
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Default for ServerTable {
	fn default() -> Self {
		let suffix = std::env::consts::EXE_SUFFIX;
		Self::new([
			(WORLD_SERVER, format!("xi_world{}", suffix)),
			(SEARCH_SERVER, format!("xi_search{}", suffix)),
			(MAP_SERVER, format!("xi_map{}", suffix)),
			(CONNECT_SERVER, format!("xi_connect{}", suffix)),
		])
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
	Stdout,
	Stderr,
}

impl StreamKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			StreamKind::Stdout => "stdout",
			StreamKind::Stderr => "stderr",
		}
	}
}

impl fmt::Display for StreamKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How a supervised process ended.
///
/// `Stopped` means the supervisor asked it to terminate. Anything else is a
/// crash, including a zero exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitKind {
	Stopped,
	Crashed,
}

impl ExitKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExitKind::Stopped => "stopped",
			ExitKind::Crashed => "crashed",
		}
	}
}

impl fmt::Display for ExitKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServerState {
	Idle,
	Running { pid: u32, started_at: DateTime<Local> },
}

impl ServerState {
	pub fn is_running(&self) -> bool {
		matches!(self, ServerState::Running { .. })
	}

	pub fn pid(&self) -> Option<u32> {
		match self {
			ServerState::Running { pid, .. } => Some(*pid),
			ServerState::Idle => None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
	pub name: String,
	pub executable: String,
	#[serde(flatten)]
	pub state: ServerState,
}
