use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use warden_core::config::GlobalConfig;
use warden_core::{ExitKind, ServerState, ServerStatus, ServerTable, StreamKind};

use crate::error::{StartError, StopError};
use crate::logs::{LogBuffer, LogStore};
use crate::output::{EventReceiver, EventSender, OutputCapture, OutputEvent};
use crate::process_table::{ProcessTable, SystemProcessTable};
use crate::restart::{RestartFlags, RestartPolicy};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct SupervisorConfig {
	pub servers: ServerTable,
	pub server_dir: Option<PathBuf>,
	pub log_dir: Option<PathBuf>,
	pub grace_period: Duration,
	pub drain_timeout: Duration,
	pub max_log_files: u32,
}

impl SupervisorConfig {
	pub fn from_global(config: &GlobalConfig) -> Self {
		Self {
			servers: config.servers.clone(),
			server_dir: config.server_dir.clone(),
			log_dir: config.log_dir.clone(),
			grace_period: config.supervisor.grace_period(),
			drain_timeout: config.supervisor.drain_timeout(),
			max_log_files: config.logs.max_files,
		}
	}
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self::from_global(&GlobalConfig::default())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessHandle {
	pub name: String,
	pub pid: u32,
	pub started_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
	Running,
	// reaped and classified, output still draining
	Exited,
	Done,
}

struct LiveProcess {
	handle: ProcessHandle,
	generation: u64,
	exited: bool,
	stop_requested: Arc<AtomicBool>,
	kill: Arc<Notify>,
	phase: watch::Receiver<Phase>,
}

// `generation` moves on every start and every stop.
#[derive(Default)]
struct Slot {
	live: Option<LiveProcess>,
	generation: u64,
}

impl Slot {
	fn owned_by(&self, generation: u64) -> bool {
		self.live.as_ref().map(|l| l.generation) == Some(generation)
	}
}

struct MonitorJob {
	name: String,
	pid: u32,
	generation: u64,
	child: Child,
	captures: Vec<JoinHandle<()>>,
	stop_requested: Arc<AtomicBool>,
	kill: Arc<Notify>,
	phase: watch::Sender<Phase>,
}

pub struct Supervisor {
	servers: ServerTable,
	server_dir: RwLock<Option<PathBuf>>,
	grace_period: Duration,
	drain_timeout: Duration,
	slots: HashMap<String, Mutex<Slot>>,
	logs: Arc<LogStore>,
	restart: RestartPolicy,
	process_table: Arc<dyn ProcessTable>,
	events: EventSender,
}

type StartFuture = Pin<Box<dyn Future<Output = Result<ProcessHandle, StartError>> + Send>>;

impl Supervisor {
	pub fn new(config: SupervisorConfig, flags: Arc<dyn RestartFlags>) -> (Arc<Self>, EventReceiver) {
		Self::with_process_table(config, flags, Arc::new(SystemProcessTable))
	}

	pub fn with_process_table(
		config: SupervisorConfig,
		flags: Arc<dyn RestartFlags>,
		process_table: Arc<dyn ProcessTable>,
	) -> (Arc<Self>, EventReceiver) {
		let (events, receiver) = mpsc::unbounded_channel();
		let logs = Arc::new(LogStore::new(&config.servers, config.log_dir, config.max_log_files));
		let slots = config
			.servers
			.names()
			.map(|name| (name.to_string(), Mutex::new(Slot::default())))
			.collect();

		let supervisor = Arc::new(Self {
			servers: config.servers,
			server_dir: RwLock::new(config.server_dir),
			grace_period: config.grace_period,
			drain_timeout: config.drain_timeout,
			slots,
			logs,
			restart: RestartPolicy::new(flags),
			process_table,
			events,
		});
		(supervisor, receiver)
	}

	pub fn servers(&self) -> &ServerTable {
		&self.servers
	}

	pub fn set_server_directory(&self, dir: impl Into<PathBuf>) {
		let dir = dir.into();
		tracing::info!("server directory set to {}", dir.display());
		*self.server_dir.write() = Some(dir);
	}

	pub fn server_directory(&self) -> Option<PathBuf> {
		self.server_dir.read().clone()
	}

	pub fn set_log_directory(&self, dir: impl Into<PathBuf>) {
		self.logs.set_directory(dir);
	}

	pub fn log_directory(&self) -> Option<PathBuf> {
		self.logs.directory()
	}

	pub async fn start(self: &Arc<Self>, name: &str) -> Result<ProcessHandle, StartError> {
		let result = self.start_inner(name, None).await;
		if let Err(e) = &result {
			self.report(name, e);
		}
		result
	}

	pub async fn stop(self: &Arc<Self>, name: &str) -> Result<(), StopError> {
		let result = self.stop_inner(name).await;
		if let Err(e) = &result {
			self.report(name, e);
		}
		result
	}

	pub async fn stop_all(self: &Arc<Self>) {
		let mut stops = JoinSet::new();
		for name in self.servers.names() {
			if self.handle(name).await.is_none() {
				continue;
			}
			let supervisor = Arc::clone(self);
			let name = name.to_string();
			stops.spawn(async move {
				let _ = supervisor.stop(&name).await;
			});
		}
		while stops.join_next().await.is_some() {}
	}

	/// True only if the supervisor holds a live handle and the OS still
	/// reports that pid alive.
	pub async fn is_running(&self, name: &str) -> bool {
		match self.handle(name).await {
			Some(handle) => self.pid_alive(handle.pid).await,
			None => false,
		}
	}

	pub async fn handle(&self, name: &str) -> Option<ProcessHandle> {
		let slot = self.slots.get(name)?;
		let slot = slot.lock().await;
		slot.live.as_ref().filter(|l| !l.exited).map(|l| l.handle.clone())
	}

	pub async fn status(&self) -> Vec<ServerStatus> {
		let mut result = Vec::with_capacity(self.servers.len());
		for row in self.servers.iter() {
			let state = match self.handle(row.name).await {
				Some(h) => ServerState::Running {
					pid: h.pid,
					started_at: h.started_at,
				},
				None => ServerState::Idle,
			};
			result.push(ServerStatus {
				name: row.name.to_string(),
				executable: row.executable.to_string(),
				state,
			});
		}
		result
	}

	pub async fn snapshot(&self, name: &str) -> Option<LogBuffer> {
		self.logs.snapshot(name).await
	}

	async fn start_inner(
		self: &Arc<Self>,
		name: &str,
		expected_generation: Option<u64>,
	) -> Result<ProcessHandle, StartError> {
		let executable = self
			.servers
			.executable(name)
			.ok_or_else(|| StartError::UnknownServer(name.to_string()))?
			.to_string();
		let slot = self
			.slots
			.get(name)
			.ok_or_else(|| StartError::UnknownServer(name.to_string()))?;
		let server_dir = self.server_directory().ok_or(StartError::DirectoryNotSet)?;

		let mut slot = slot.lock().await;
		if let Some(expected) = expected_generation {
			if slot.generation != expected {
				return Err(StartError::RestartCancelled(name.to_string()));
			}
		}
		if slot.live.is_some() || self.image_running(&executable).await {
			return Err(StartError::AlreadyRunning(name.to_string()));
		}

		let mut child = spawn_server(&server_dir, &executable).map_err(|e| StartError::SpawnFailed {
			server: name.to_string(),
			reason: e.to_string(),
		})?;
		let pid = child_pid(name, &child)?;
		let handle = ProcessHandle {
			name: name.to_string(),
			pid,
			started_at: Local::now(),
		};
		tracing::info!("started {} using {} (pid {})", name, executable, pid);
		self.notice(name, format!("Started {} with PID: {}", name, pid));

		self.logs.reset(name).await;
		let mut captures = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			let capture = OutputCapture::new(name, StreamKind::Stdout, Arc::clone(&self.logs), self.events.clone());
			captures.push(capture.spawn(stdout));
		}
		if let Some(stderr) = child.stderr.take() {
			let capture = OutputCapture::new(name, StreamKind::Stderr, Arc::clone(&self.logs), self.events.clone());
			captures.push(capture.spawn(stderr));
		}

		slot.generation += 1;
		let generation = slot.generation;
		let stop_requested = Arc::new(AtomicBool::new(false));
		let kill = Arc::new(Notify::new());
		let (phase_tx, phase_rx) = watch::channel(Phase::Running);
		slot.live = Some(LiveProcess {
			handle: handle.clone(),
			generation,
			exited: false,
			stop_requested: Arc::clone(&stop_requested),
			kill: Arc::clone(&kill),
			phase: phase_rx,
		});

		let job = MonitorJob {
			name: name.to_string(),
			pid,
			generation,
			child,
			captures,
			stop_requested,
			kill,
			phase: phase_tx,
		};
		tokio::spawn(Arc::clone(self).monitor(job));

		Ok(handle)
	}

	fn restart_after_crash(self: &Arc<Self>, name: String, generation: u64) -> StartFuture {
		let supervisor = Arc::clone(self);
		Box::pin(async move { supervisor.start_inner(&name, Some(generation)).await })
	}

	async fn stop_inner(&self, name: &str) -> Result<(), StopError> {
		let slot = self
			.slots
			.get(name)
			.ok_or_else(|| StopError::UnknownServer(name.to_string()))?;

		let (pid, generation, kill, mut phase) = {
			let mut slot = slot.lock().await;
			// Moving the generation even when nothing is live cancels a
			// restart that the monitor has decided on but not yet issued.
			slot.generation += 1;
			let live = slot
				.live
				.as_ref()
				.filter(|l| !l.exited)
				.ok_or_else(|| StopError::NotRunning(name.to_string()))?;
			live.stop_requested.store(true, Ordering::SeqCst);
			(live.handle.pid, live.generation, Arc::clone(&live.kill), live.phase.clone())
		};

		tracing::info!("stopping {} with pid {}", name, pid);
		self.notice(name, format!("Stopping {} with PID {}", name, pid));
		terminate(pid, &kill);

		let mut exited = wait_phase(&mut phase, Phase::Exited, self.grace_period).await;
		if !exited {
			tracing::warn!("{} did not terminate in time, force killing", name);
			self.notice(name, format!("{} did not terminate in time, force killing", name));
			kill.notify_one();
			exited = wait_phase(&mut phase, Phase::Exited, self.grace_period).await;
		}
		if exited {
			// Drain is bounded by drain_timeout, so this returns once the log is written.
			let _ = phase.wait_for(|p| *p >= Phase::Done).await;
		} else {
			tracing::error!("force kill of {} (pid {}) was not confirmed", name, pid);
			self.notice(name, format!("Force kill of {} (pid {}) was not confirmed", name, pid));
		}

		self.release(name, generation).await;
		Ok(())
	}

	async fn monitor(self: Arc<Self>, job: MonitorJob) {
		let MonitorJob {
			name,
			pid,
			generation,
			mut child,
			captures,
			stop_requested,
			kill,
			phase,
		} = job;

		let exit = tokio::select! {
			status = child.wait() => status,
			_ = kill.notified() => {
				force_kill(&mut child, pid);
				child.wait().await
			}
		};

		let (kind, restart) = self.record_exit(&name, generation, &stop_requested).await;
		let _ = phase.send(Phase::Exited);

		let detail = describe_exit(&exit);
		tracing::info!("{} has {} ({})", name, kind, detail);
		self.notice(&name, format!("{} has {} ({})", name, kind, detail));

		self.drain(&name, captures).await;
		match self.logs.flush(&name, kind).await {
			Ok(path) => self.notice(&name, format!("Log saved for {} at {}", name, path.display())),
			Err(e) => self.report(&name, &e),
		}
		self.release(&name, generation).await;
		let _ = phase.send(Phase::Done);

		if restart {
			self.notice(&name, format!("Restarting {} due to crash...", name));
			if let Err(e) = self.restart_after_crash(name.clone(), generation).await {
				self.report(&name, &e);
			}
		}
	}

	// Runs as soon as the process is reaped, so a later stop() sees `exited`
	// and cannot turn a crash into a stop.
	async fn record_exit(&self, name: &str, generation: u64, stop_requested: &AtomicBool) -> (ExitKind, bool) {
		let Some(slot) = self.slots.get(name) else {
			return (ExitKind::Crashed, false);
		};
		let mut slot = slot.lock().await;
		let kind = if stop_requested.load(Ordering::SeqCst) {
			ExitKind::Stopped
		} else {
			ExitKind::Crashed
		};
		if let Some(live) = slot.live.as_mut().filter(|l| l.generation == generation) {
			live.exited = true;
		}
		let restart = slot.generation == generation && self.restart.should_restart(name, kind);
		(kind, restart)
	}

	async fn release(&self, name: &str, generation: u64) {
		if let Some(slot) = self.slots.get(name) {
			let mut slot = slot.lock().await;
			if slot.owned_by(generation) {
				slot.live = None;
			}
		}
	}

	async fn image_running(&self, executable: &str) -> bool {
		let table = Arc::clone(&self.process_table);
		let executable = executable.to_string();
		tokio::task::spawn_blocking(move || table.is_image_running(&executable))
			.await
			.unwrap_or_else(|e| {
				tracing::warn!("process table query failed: {}", e);
				false
			})
	}

	async fn pid_alive(&self, pid: u32) -> bool {
		let table = Arc::clone(&self.process_table);
		tokio::task::spawn_blocking(move || table.is_alive(pid))
			.await
			.unwrap_or_else(|e| {
				tracing::warn!("process table query failed: {}", e);
				false
			})
	}

	async fn drain(&self, name: &str, captures: Vec<JoinHandle<()>>) {
		let deadline = tokio::time::Instant::now() + self.drain_timeout;
		for mut task in captures {
			if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
				tracing::warn!("output capture for {} still open after exit, aborting", name);
				task.abort();
			}
		}
	}

	fn notice(&self, server: &str, line: String) {
		let _ = self.events.send(OutputEvent::notice(server, line));
	}

	fn report(&self, server: &str, error: &dyn std::error::Error) {
		tracing::warn!("{}: {}", server, error);
		self.notice(server, error.to_string());
	}
}

fn spawn_server(dir: &Path, executable: &str) -> std::io::Result<Child> {
	let mut cmd = Command::new(dir.join(executable));
	cmd.current_dir(dir)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);

	// Own process group so termination reaches anything the server forks.
	#[cfg(unix)]
	cmd.process_group(0);

	#[cfg(windows)]
	cmd.creation_flags(CREATE_NO_WINDOW);

	cmd.spawn()
}

fn child_pid(name: &str, child: &Child) -> Result<u32, StartError> {
	child.id().ok_or_else(|| StartError::SpawnFailed {
		server: name.to_string(),
		reason: "process exited before its pid could be read".to_string(),
	})
}

async fn wait_phase(phase: &mut watch::Receiver<Phase>, target: Phase, limit: Duration) -> bool {
	// A dropped sender means the monitor is gone, which also counts as reached.
	tokio::time::timeout(limit, phase.wait_for(|p| *p >= target))
		.await
		.is_ok()
}

#[cfg(unix)]
fn terminate(pid: u32, _kill: &Notify) {
	use nix::errno::Errno;
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;

	match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
		Ok(()) | Err(Errno::ESRCH) => {}
		Err(e) => tracing::warn!("failed to send SIGTERM to pid {}: {}", pid, e),
	}
}

#[cfg(not(unix))]
fn terminate(_pid: u32, kill: &Notify) {
	kill.notify_one();
}

fn force_kill(child: &mut Child, pid: u32) {
	#[cfg(unix)]
	{
		use nix::sys::signal::{killpg, Signal};
		use nix::unistd::Pid;
		let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
	}
	if let Err(e) = child.start_kill() {
		tracing::error!("failed to kill pid {}: {}", pid, e);
	}
}

fn describe_exit(exit: &std::io::Result<ExitStatus>) -> String {
	match exit {
		Ok(status) => match status.code() {
			Some(code) => format!("exit code {}", code),
			None => describe_signal(status),
		},
		Err(e) => format!("wait failed: {}", e),
	}
}

#[cfg(unix)]
fn describe_signal(status: &ExitStatus) -> String {
	use std::os::unix::process::ExitStatusExt;
	match status.signal() {
		Some(signal) => format!("signal {}", signal),
		None => "no exit code".to_string(),
	}
}

#[cfg(not(unix))]
fn describe_signal(_status: &ExitStatus) -> String {
	"no exit code".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[cfg(unix)]
	#[tokio::test]
	async fn reaped_child_is_a_spawn_failure() {
		let mut child = Command::new("true").spawn().unwrap();
		assert!(child_pid("World Server", &child).is_ok_and(|pid| pid > 0));
		child.wait().await.unwrap();

		let err = child_pid("World Server", &child).unwrap_err();
		assert!(matches!(err, StartError::SpawnFailed { ref server, .. } if server == "World Server"));
	}
}
