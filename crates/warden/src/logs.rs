use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use warden_core::{ExitKind, ServerTable, StreamKind};

use crate::error::LogError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
	pub stdout: Vec<String>,
	pub stderr: Vec<String>,
}

impl LogBuffer {
	pub fn push(&mut self, stream: StreamKind, line: String) {
		match stream {
			StreamKind::Stdout => self.stdout.push(line),
			StreamKind::Stderr => self.stderr.push(line),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.stdout.is_empty() && self.stderr.is_empty()
	}

	pub fn clear(&mut self) {
		self.stdout.clear();
		self.stderr.clear();
	}
}

pub struct LogStore {
	dir: RwLock<Option<PathBuf>>,
	max_files: u32,
	buffers: HashMap<String, Mutex<LogBuffer>>,
}

impl LogStore {
	pub fn new(servers: &ServerTable, dir: Option<PathBuf>, max_files: u32) -> Self {
		let buffers = servers
			.names()
			.map(|name| (name.to_string(), Mutex::new(LogBuffer::default())))
			.collect();
		Self {
			dir: RwLock::new(dir),
			max_files,
			buffers,
		}
	}

	pub fn set_directory(&self, dir: impl Into<PathBuf>) {
		let dir = dir.into();
		tracing::info!("log output directory set to {}", dir.display());
		*self.dir.write() = Some(dir);
	}

	pub fn directory(&self) -> Option<PathBuf> {
		self.dir.read().clone()
	}

	pub async fn append(&self, server: &str, stream: StreamKind, line: String) {
		match self.buffers.get(server) {
			Some(buffer) => buffer.lock().await.push(stream, line),
			None => tracing::debug!("dropping line for unknown server {}", server),
		}
	}

	pub async fn snapshot(&self, server: &str) -> Option<LogBuffer> {
		let buffer = self.buffers.get(server)?;
		let snapshot = buffer.lock().await.clone();
		Some(snapshot)
	}

	pub async fn reset(&self, server: &str) {
		if let Some(buffer) = self.buffers.get(server) {
			let mut buffer = buffer.lock().await;
			if !buffer.is_empty() {
				tracing::warn!(
					"discarding {} unsaved lines from the previous run of {}",
					buffer.stdout.len() + buffer.stderr.len(),
					server
				);
			}
			buffer.clear();
		}
	}

	/// Buffers are left untouched when no directory is configured or the write
	/// fails.
	pub async fn flush(&self, server: &str, status: ExitKind) -> Result<PathBuf, LogError> {
		let buffer = self
			.buffers
			.get(server)
			.ok_or_else(|| LogError::UnknownServer(server.to_string()))?;
		let dir = self.directory().ok_or(LogError::NoDirectoryConfigured)?;

		let mut buffer = buffer.lock().await;
		let document = render_document(server, status, &buffer);

		let path = {
			let target = dir.clone();
			let server = server.to_string();
			tokio::task::spawn_blocking(move || write_log(&target, &server, status, &document))
				.await
				.map_err(|e| LogError::Io {
					path: dir.clone(),
					source: std::io::Error::other(e),
				})??
		};
		buffer.clear();
		drop(buffer);

		tracing::info!("log saved for {} at {}", server, path.display());
		if self.max_files > 0 {
			let server = server.to_string();
			let max_files = self.max_files;
			let expired = tokio::task::spawn_blocking(move || expire_server_logs(&dir, &server, max_files)).await;
			if let Err(e) = expired {
				tracing::warn!("log expiry failed: {}", e);
			}
		}
		Ok(path)
	}
}

fn write_log(dir: &Path, server: &str, status: ExitKind, document: &str) -> Result<PathBuf, LogError> {
	fs::create_dir_all(dir).map_err(|source| LogError::Io {
		path: dir.to_path_buf(),
		source,
	})?;
	let path = unique_log_path(dir, server, status, Local::now());
	fs::write(&path, document).map_err(|source| LogError::Io {
		path: path.clone(),
		source,
	})?;
	Ok(path)
}

pub fn render_document(server: &str, status: ExitKind, buffer: &LogBuffer) -> String {
	let mut doc = format!("Logs for {} ({}):\n\nSTDOUT:\n", server, status);
	for line in &buffer.stdout {
		doc.push_str(line);
		doc.push('\n');
	}
	doc.push_str("STDERR:\n");
	for line in &buffer.stderr {
		doc.push_str(line);
		doc.push('\n');
	}
	doc
}

pub fn log_file_name(server: &str, status: ExitKind, at: DateTime<Local>) -> String {
	format!("{}_{}_{}.log", server, status, at.format(TIMESTAMP_FORMAT))
}

fn unique_log_path(dir: &Path, server: &str, status: ExitKind, at: DateTime<Local>) -> PathBuf {
	let candidate = dir.join(log_file_name(server, status, at));
	if !candidate.exists() {
		return candidate;
	}
	let stem = format!("{}_{}_{}", server, status, at.format(TIMESTAMP_FORMAT));
	let mut n = 1;
	loop {
		let path = dir.join(format!("{}.{}.log", stem, n));
		if !path.exists() {
			return path;
		}
		n += 1;
	}
}

/// Parses `<server>_<status>_<timestamp>[.<n>].log` back into its parts.
pub fn parse_log_name(server: &str, filename: &str) -> Option<(ExitKind, NaiveDateTime, u32)> {
	let rest = filename.strip_prefix(server)?.strip_prefix('_')?;
	let rest = rest.strip_suffix(".log")?;
	let (status, rest) = rest.split_once('_')?;
	let status = match status {
		"stopped" => ExitKind::Stopped,
		"crashed" => ExitKind::Crashed,
		_ => return None,
	};
	let (stamp, seq) = match rest.split_once('.') {
		Some((stamp, seq)) => (stamp, seq.parse().ok()?),
		None => (rest, 0),
	};
	let at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
	Some((status, at, seq))
}

/// Deletes the oldest exit logs of `server` beyond `max_files`.
pub fn expire_server_logs(dir: &Path, server: &str, max_files: u32) {
	let entries = match fs::read_dir(dir) {
		Ok(e) => e,
		Err(_) => return,
	};

	let mut logs: Vec<(NaiveDateTime, u32, PathBuf)> = entries
		.flatten()
		.filter_map(|entry| {
			let name = entry.file_name().to_string_lossy().to_string();
			let (_, at, seq) = parse_log_name(server, &name)?;
			Some((at, seq, entry.path()))
		})
		.collect();

	if logs.len() <= max_files as usize {
		return;
	}
	logs.sort();
	let to_remove = logs.len() - max_files as usize;
	for (_, _, path) in logs.iter().take(to_remove) {
		if let Err(e) = fs::remove_file(path) {
			tracing::warn!("failed to remove old log {}: {}", path.display(), e);
		}
	}
}
