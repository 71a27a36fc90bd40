//! Test infrastructure for the synchronizer
//!
//! Deterministic stand-ins for the external collaborators: a scripted notification source,
//! a command runner that records git invocations instead of running them, and a helper
//! that lays out a home root, repository and targets file on disk.

use crate::error::{Result, SyncError};
use crate::events::{EventMask, RawEvent, WatchHandle};
use crate::source::NotificationSource;
use crate::vcs::{CommandRunner, Invocation};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ScriptState {
	next_handle: u64,
	live: HashMap<WatchHandle, PathBuf>,
	queue: VecDeque<RawEvent>,
}

/// In-memory notification source driven by the test.
///
/// Clones share state, so a test can keep one clone to push records while the registry
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
	state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSource {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, ScriptState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queue a record for the next drain
	pub fn push(&self, event: RawEvent) {
		self.lock().queue.push_back(event);
	}

	/// Simulate the kernel dropping a watch: the handle dies and an IGNORED record is queued
	pub fn invalidate(&self, handle: WatchHandle) {
		let mut state = self.lock();
		state.live.remove(&handle);
		state.queue.push_back(RawEvent::new(handle, EventMask::IGNORED));
	}

	/// Number of records waiting to be drained
	pub fn queued(&self) -> usize {
		self.lock().queue.len()
	}

	pub fn live_watch_count(&self) -> usize {
		self.lock().live.len()
	}

	pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
		self.lock()
			.live
			.iter()
			.find(|(_, watched)| watched.as_path() == path)
			.map(|(handle, _)| *handle)
	}
}

impl NotificationSource for ScriptedSource {
	fn add_watch(&mut self, path: &Path, _mask: EventMask) -> Result<WatchHandle> {
		if fs::symlink_metadata(path).is_err() {
			return Err(SyncError::WatchTargetMissing { path: path.to_path_buf() });
		}

		let mut state = self.lock();
		state.live.retain(|_, watched| watched.as_path() != path);
		state.next_handle += 1;
		let handle = WatchHandle::new(state.next_handle);
		state.live.insert(handle, path.to_path_buf());
		Ok(handle)
	}

	fn remove_watch(&mut self, handle: WatchHandle) {
		self.lock().live.remove(&handle);
	}

	fn drain_events(&mut self, max_events: usize) -> Vec<RawEvent> {
		let mut state = self.lock();
		let count = max_events.min(state.queue.len());
		state.queue.drain(..count).collect()
	}
}

#[derive(Debug, Default)]
struct RecorderState {
	invocations: Vec<Invocation>,
	responses: HashMap<String, String>,
	failing: HashSet<String>,
}

/// Command runner that records invocations and answers from a script.
///
/// Commands are keyed by their first argument (`add`, `commit`, `push`, `diff`).
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
	state: Arc<Mutex<RecorderState>>,
}

impl RecordingRunner {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, RecorderState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Answer `subcommand` with `output` on stdout
	pub fn respond_to(self, subcommand: &str, output: &str) -> Self {
		self.lock().responses.insert(subcommand.to_string(), output.to_string());
		self
	}

	/// Make `subcommand` exit with a failure status
	pub fn failing(self, subcommand: &str) -> Self {
		self.set_failing(subcommand, true);
		self
	}

	pub fn set_failing(&self, subcommand: &str, failing: bool) {
		let mut state = self.lock();
		if failing {
			state.failing.insert(subcommand.to_string());
		} else {
			state.failing.remove(subcommand);
		}
	}

	pub fn invocations(&self) -> Vec<Invocation> {
		self.lock().invocations.clone()
	}

	/// Number of recorded invocations of `subcommand`, failed ones included
	pub fn count(&self, subcommand: &str) -> usize {
		self.lock()
			.invocations
			.iter()
			.filter(|invocation| invocation.subcommand() == Some(subcommand))
			.count()
	}
}

#[async_trait]
impl CommandRunner for RecordingRunner {
	async fn run(&self, invocation: &Invocation) -> Result<String> {
		let mut state = self.lock();
		state.invocations.push(invocation.clone());

		let subcommand = invocation.subcommand().unwrap_or_default();
		if state.failing.contains(subcommand) {
			return Err(SyncError::CommandFailed {
				command: invocation.to_string(),
				status: "exit status: 1".to_string(),
				stderr: format!("scripted failure of {subcommand}"),
			});
		}

		Ok(state.responses.get(subcommand).cloned().unwrap_or_default())
	}
}

/// A home root, a repository and a targets file under one scratch directory
#[derive(Debug, Clone)]
pub struct HomeLayout {
	pub home: PathBuf,
	pub repository: PathBuf,
	pub config_path: PathBuf,
}

impl HomeLayout {
	/// Create `root/home` and `root/repo` with an empty targets file
	pub fn create(root: &Path) -> std::io::Result<Self> {
		let home = root.join("home");
		let repository = root.join("repo");
		let config_path = home.join(crate::config::DEFAULT_CONFIG_RELATIVE);

		fs::create_dir_all(&repository)?;
		if let Some(parent) = config_path.parent() {
			fs::create_dir_all(parent)?;
		}

		let layout = Self { home, repository, config_path };
		layout.write_targets(&[], &[])?;
		Ok(layout)
	}

	/// Overwrite the targets file
	pub fn write_targets(&self, directories: &[&str], files: &[&str]) -> std::io::Result<()> {
		let body = serde_json::json!({ "directories": directories, "files": files });
		fs::write(&self.config_path, body.to_string())
	}

	/// Write `content` to `relative` under the home root, creating parents
	pub fn write_file(&self, relative: &str, content: &str) -> std::io::Result<PathBuf> {
		let path = self.home.join(relative);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&path, content)?;
		Ok(path)
	}

	/// Backup location of `relative` in the default mirror root
	pub fn backup_of(&self, relative: &str) -> PathBuf {
		self.repository.join(crate::config::DEFAULT_MIRROR_DIR).join(relative)
	}
}
