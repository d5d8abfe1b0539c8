use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use warden_core::ExitKind;

/// Read once per exit by the supervisor.
pub trait RestartFlags: Send + Sync {
	fn auto_restart(&self, server: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct SharedRestartFlags {
	flags: Arc<RwLock<BTreeMap<String, bool>>>,
}

impl SharedRestartFlags {
	pub fn new(initial: BTreeMap<String, bool>) -> Self {
		Self {
			flags: Arc::new(RwLock::new(initial)),
		}
	}

	pub fn set(&self, server: &str, enabled: bool) {
		self.flags.write().insert(server.to_string(), enabled);
	}

	pub fn get(&self, server: &str) -> bool {
		self.flags.read().get(server).copied().unwrap_or(false)
	}

	pub fn snapshot(&self) -> BTreeMap<String, bool> {
		self.flags.read().clone()
	}
}

impl RestartFlags for SharedRestartFlags {
	fn auto_restart(&self, server: &str) -> bool {
		self.get(server)
	}
}

#[derive(Clone)]
pub struct RestartPolicy {
	flags: Arc<dyn RestartFlags>,
}

impl RestartPolicy {
	pub fn new(flags: Arc<dyn RestartFlags>) -> Self {
		Self { flags }
	}

	/// Reads the flag for `server` exactly once and combines it with the
	/// exit classification. A stopped server never restarts.
	pub fn should_restart(&self, server: &str, kind: ExitKind) -> bool {
		match kind {
			ExitKind::Stopped => false,
			ExitKind::Crashed => self.flags.auto_restart(server),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingFlags {
		reads: AtomicUsize,
		value: bool,
	}

	impl RestartFlags for CountingFlags {
		fn auto_restart(&self, _server: &str) -> bool {
			self.reads.fetch_add(1, Ordering::SeqCst);
			self.value
		}
	}

	#[test]
	fn only_crashes_with_flag_restart() {
		let flags = SharedRestartFlags::default();
		flags.set("World Server", true);
		let policy = RestartPolicy::new(Arc::new(flags.clone()));

		assert!(policy.should_restart("World Server", ExitKind::Crashed));
		assert!(!policy.should_restart("World Server", ExitKind::Stopped));
		assert!(!policy.should_restart("Map Server", ExitKind::Crashed));

		flags.set("World Server", false);
		assert!(!policy.should_restart("World Server", ExitKind::Crashed));
	}

	#[test]
	fn stopped_exit_never_reads_flag() {
		let flags = Arc::new(CountingFlags {
			reads: AtomicUsize::new(0),
			value: true,
		});
		let policy = RestartPolicy::new(flags.clone());

		assert!(!policy.should_restart("World Server", ExitKind::Stopped));
		assert_eq!(flags.reads.load(Ordering::SeqCst), 0);
		assert!(policy.should_restart("World Server", ExitKind::Crashed));
		assert_eq!(flags.reads.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn shared_flags_default_off() {
		let flags = SharedRestartFlags::new(BTreeMap::from([("Map Server".to_string(), true)]));
		assert!(flags.get("Map Server"));
		assert!(!flags.get("World Server"));
		assert_eq!(flags.snapshot().len(), 1);
	}
}
