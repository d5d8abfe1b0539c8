use std::ffi::OsStr;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Linux truncates process names to this many bytes.
const COMM_LEN: usize = 15;

pub trait ProcessTable: Send + Sync {
	/// Whether any live process was launched from an executable named `executable`.
	fn is_image_running(&self, executable: &str) -> bool;

	/// Whether `pid` exists and is not a zombie.
	fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
	fn is_image_running(&self, executable: &str) -> bool {
		let mut system = System::new();
		system.refresh_processes_specifics(
			ProcessesToUpdate::All,
			true,
			ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
		);
		system
			.processes()
			.values()
			.any(|p| p.status() != ProcessStatus::Zombie && matches_executable(p, executable))
	}

	fn is_alive(&self, pid: u32) -> bool {
		let pid = Pid::from_u32(pid);
		let mut system = System::new();
		system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
		system
			.process(pid)
			.map(|p| p.status() != ProcessStatus::Zombie)
			.unwrap_or(false)
	}
}

fn matches_executable(process: &Process, executable: &str) -> bool {
	if name_matches(process.name(), executable) {
		return true;
	}
	process
		.exe()
		.and_then(|exe| exe.file_name())
		.map(|file| name_matches(file, executable))
		.unwrap_or(false)
}

fn name_matches(name: &OsStr, executable: &str) -> bool {
	let name = name.to_string_lossy();
	if cfg!(windows) {
		return name.eq_ignore_ascii_case(executable);
	}
	name == executable
		|| (name.len() == COMM_LEN && executable.len() > COMM_LEN && executable.starts_with(name.as_ref()))
}
