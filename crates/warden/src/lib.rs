//! # warden
//!
//! Supervisor for a fixed set of named game server processes.
//!
//! Spawn, capture stdout/stderr line by line, tell crashes from requested
//! stops, restart crashed servers when their flag is set, and persist a log
//! for every exit.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::{SharedRestartFlags, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let flags = SharedRestartFlags::default();
//! flags.set("World Server", true);
//!
//! let (sup, mut events) = Supervisor::new(SupervisorConfig::default(), Arc::new(flags));
//! sup.set_server_directory("/srv/xi");
//! sup.set_log_directory("/srv/xi/logs");
//!
//! sup.start("World Server").await.unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("[{}] {}", event.server, event.line);
//! }
//! # }
//! ```

pub mod error;
pub mod logs;
pub mod output;
pub mod process_table;
pub mod restart;
pub mod supervisor;

pub use error::{CaptureError, LogError, StartError, StopError};
pub use logs::{LogBuffer, LogStore};
pub use output::{EventReceiver, EventSender, OutputCapture, OutputEvent};
pub use process_table::{ProcessTable, SystemProcessTable};
pub use restart::{RestartFlags, RestartPolicy, SharedRestartFlags};
pub use supervisor::{ProcessHandle, Supervisor, SupervisorConfig};
pub use warden_core::{ExitKind, ServerState, ServerStatus, ServerTable, StreamKind};
