//! Notification source backed by the `notify` crate
//!
//! `notify` reports path-based events and manages kernel watch descriptors internally. This
//! backend registers one non-recursive watch per path, hands out its own handles, and
//! translates each path event back into handle-based records at drain time:
//!
//! - an event whose path is itself watched is reported on that path's handle
//! - an event whose parent directory is watched is reported on the parent's handle, with
//!   the entry name attached
//!
//! Removal or rename of a watched path invalidates its handle, which is reported with the
//! `IGNORED` flag the way the kernel does after `DELETE_SELF`.

use crate::error::{Result, SyncError};
use crate::events::{EventMask, RawEvent, WatchHandle};
use crate::source::NotificationSource;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct NotifySource {
	watcher: RecommendedWatcher,
	receiver: mpsc::Receiver<notify::Result<Event>>,
	by_path: HashMap<PathBuf, WatchHandle>,
	by_handle: HashMap<WatchHandle, PathBuf>,
	next_handle: u64,
	backlog: VecDeque<RawEvent>,
}

impl NotifySource {
	pub fn new() -> Result<Self> {
		let (notify_tx, notify_rx) = mpsc::channel();

		let watcher = RecommendedWatcher::new(
			notify_tx,
			Config::default().with_poll_interval(Duration::from_millis(100)),
		)?;

		Ok(Self {
			watcher,
			receiver: notify_rx,
			by_path: HashMap::new(),
			by_handle: HashMap::new(),
			next_handle: 1,
			backlog: VecDeque::new(),
		})
	}

	/// Number of paths currently registered with `notify`
	pub fn watch_count(&self) -> usize {
		self.by_handle.len()
	}

	fn forget_path(&mut self, path: &Path) -> Option<WatchHandle> {
		let handle = self.by_path.remove(path)?;
		self.by_handle.remove(&handle);
		// The kernel may already have dropped the watch; notify then reports WatchNotFound
		let _ = self.watcher.unwatch(path);
		Some(handle)
	}

	fn self_event(&mut self, path: &Path, mask: EventMask) {
		if let Some(&handle) = self.by_path.get(path) {
			self.backlog.push_back(RawEvent::new(handle, mask));
		}
	}

	fn parent_event(&mut self, path: &Path, mask: EventMask) {
		let Some(parent) = path.parent() else {
			return;
		};
		if let Some(&handle) = self.by_path.get(parent) {
			let mut event = RawEvent::new(handle, mask);
			if let Some(name) = path.file_name() {
				event = event.with_name(name);
			}
			self.backlog.push_back(event);
		}
	}

	/// Report the watched path as gone and release its handle
	fn invalidate(&mut self, path: &Path, mask: EventMask) {
		if let Some(handle) = self.forget_path(path) {
			self.backlog
				.push_back(RawEvent::new(handle, mask | EventMask::IGNORED));
		}
	}

	fn translate(&mut self, event: Event) {
		debug!("Received notify event: {:?}", event);

		if event.need_rescan() {
			self.backlog.push_back(RawEvent::overflow());
			return;
		}

		match event.kind {
			EventKind::Create(kind) => {
				for path in &event.paths {
					let dir_flag = if matches!(kind, CreateKind::Folder) || path.is_dir() {
						EventMask::IS_DIR
					} else {
						EventMask::empty()
					};
					self.parent_event(path, EventMask::CREATE | dir_flag);
				}
			}
			EventKind::Modify(ModifyKind::Name(mode)) => {
				for path in &event.paths {
					let arrived = match mode {
						RenameMode::From => false,
						RenameMode::To => true,
						// Reported in addition to the separate From and To events
						RenameMode::Both => continue,
						_ => path.exists(),
					};
					if arrived {
						let dir_flag = if path.is_dir() {
							EventMask::IS_DIR
						} else {
							EventMask::empty()
						};
						self.parent_event(path, EventMask::MOVED_TO | dir_flag);
					} else {
						self.invalidate(path, EventMask::MOVED_FROM);
						self.parent_event(path, EventMask::MOVED_FROM);
					}
				}
			}
			EventKind::Modify(ModifyKind::Metadata(_)) => {}
			EventKind::Modify(_) => {
				for path in &event.paths {
					self.self_event(path, EventMask::MODIFY);
					self.parent_event(path, EventMask::MODIFY);
				}
			}
			EventKind::Remove(kind) => {
				for path in &event.paths {
					self.invalidate(path, EventMask::DELETE_SELF);
					let dir_flag = if matches!(kind, RemoveKind::Folder) {
						EventMask::IS_DIR
					} else {
						EventMask::empty()
					};
					self.parent_event(path, EventMask::DELETE | dir_flag);
				}
			}
			_ => {}
		}
	}
}

impl NotificationSource for NotifySource {
	// notify always subscribes to every kind, so the mask is not forwarded
	fn add_watch(&mut self, path: &Path, _mask: EventMask) -> Result<WatchHandle> {
		if !path.exists() {
			return Err(SyncError::WatchTargetMissing { path: path.to_path_buf() });
		}

		if let Some(previous) = self.forget_path(path) {
			debug!("Replacing watch {} for {}", previous, path.display());
		}

		self.watcher
			.watch(path, RecursiveMode::NonRecursive)
			.map_err(|e| {
				let missing = match &e.kind {
					notify::ErrorKind::PathNotFound => true,
					notify::ErrorKind::Io(io_err) => io_err.kind() == std::io::ErrorKind::NotFound,
					_ => false,
				};
				if missing {
					SyncError::WatchTargetMissing { path: path.to_path_buf() }
				} else {
					SyncError::Notify(e)
				}
			})?;

		let handle = WatchHandle::new(self.next_handle);
		self.next_handle += 1;
		self.by_path.insert(path.to_path_buf(), handle);
		self.by_handle.insert(handle, path.to_path_buf());
		Ok(handle)
	}

	fn remove_watch(&mut self, handle: WatchHandle) {
		if let Some(path) = self.by_handle.get(&handle).cloned() {
			self.forget_path(&path);
		}
	}

	fn drain_events(&mut self, max_events: usize) -> Vec<RawEvent> {
		while self.backlog.len() < max_events {
			match self.receiver.try_recv() {
				Ok(Ok(event)) => self.translate(event),
				Ok(Err(e)) => warn!("Notify error: {}", e),
				Err(mpsc::TryRecvError::Empty) => break,
				Err(mpsc::TryRecvError::Disconnected) => {
					warn!("Notify channel disconnected");
					break;
				}
			}
		}

		let count = max_events.min(self.backlog.len());
		self.backlog.drain(..count).collect()
	}
}
