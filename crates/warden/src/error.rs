use std::path::PathBuf;
use thiserror::Error;
use warden_core::StreamKind;

#[derive(Debug, Error)]
pub enum StartError {
	#[error("unknown server: {0}")]
	UnknownServer(String),
	#[error("{0} is already running")]
	AlreadyRunning(String),
	#[error("server directory not set")]
	DirectoryNotSet,
	#[error("failed to start {server}: {reason}")]
	SpawnFailed { server: String, reason: String },
	#[error("restart of {0} cancelled by a newer start or stop")]
	RestartCancelled(String),
}

#[derive(Debug, Error)]
pub enum StopError {
	#[error("unknown server: {0}")]
	UnknownServer(String),
	#[error("{0} is not running")]
	NotRunning(String),
}

#[derive(Debug, Error)]
pub enum LogError {
	#[error("log output directory not set")]
	NoDirectoryConfigured,
	#[error("unknown server: {0}")]
	UnknownServer(String),
	#[error("failed to write log {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

#[derive(Debug, Error)]
pub enum CaptureError {
	#[error("error capturing {stream} for {server}: {source}")]
	StreamRead {
		server: String,
		stream: StreamKind,
		#[source]
		source: std::io::Error,
	},
}
