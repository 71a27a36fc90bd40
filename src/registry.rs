//! Watch registry
//!
//! Owns every watch registered for the configured targets and the two indices that tie a
//! low-level handle back to the logical backup unit it belongs to:
//!
//! - handle → watched path (with a reverse path → handle lookup)
//! - base path → set of handles
//!
//! The indices are only touched through [`WatchRegistry::insert`] and
//! [`WatchRegistry::forget`], which always update both sides together.

use crate::config::{Target, TargetKind};
use crate::error::{Result, SyncError};
use crate::events::{EventMask, RawEvent, WatchHandle};
use crate::source::NotificationSource;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Top-level configured path grouping all watches beneath it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasePath(PathBuf);

impl BasePath {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self(path.into())
	}

	pub fn as_path(&self) -> &Path {
		&self.0
	}
}

impl AsRef<Path> for BasePath {
	fn as_ref(&self) -> &Path {
		&self.0
	}
}

impl fmt::Display for BasePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.display())
	}
}

/// Outcome of a registration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryBuildReport {
	/// Number of watches registered
	pub watched: usize,
	/// Paths that could not be watched
	pub skipped: Vec<PathBuf>,
}

impl RegistryBuildReport {
	pub fn merge(&mut self, other: RegistryBuildReport) {
		self.watched += other.watched;
		self.skipped.extend(other.skipped);
	}

	pub fn is_clean(&self) -> bool {
		self.skipped.is_empty()
	}
}

#[derive(Debug, Clone)]
struct WatchEntry {
	path: PathBuf,
	base: BasePath,
}

pub struct WatchRegistry<S: NotificationSource> {
	source: S,
	entries: HashMap<WatchHandle, WatchEntry>,
	by_path: HashMap<PathBuf, WatchHandle>,
	groups: BTreeMap<BasePath, BTreeSet<WatchHandle>>,
	/// Trees never watched, so writes to the backup do not feed back as changes
	excluded: Vec<PathBuf>,
}

impl<S: NotificationSource> WatchRegistry<S> {
	pub fn new(source: S) -> Self {
		Self {
			source,
			entries: HashMap::new(),
			by_path: HashMap::new(),
			groups: BTreeMap::new(),
			excluded: Vec::new(),
		}
	}

	/// Never watch `path` or anything below it. Applies from the next registration on.
	pub fn exclude(&mut self, path: impl Into<PathBuf>) {
		self.excluded.push(path.into());
	}

	fn is_excluded(&self, path: &Path) -> bool {
		self.excluded.iter().any(|excluded| path.starts_with(excluded))
	}

	/// Discard every watch and register the given targets from scratch.
	///
	/// Directory targets get one watch per directory in their subtree, root included. File
	/// targets get a single watch. Paths that vanish during the walk are skipped and reported.
	pub fn rebuild(&mut self, targets: &[Target]) -> RegistryBuildReport {
		let stale: Vec<WatchHandle> = self.entries.keys().copied().collect();
		for handle in stale {
			self.source.remove_watch(handle);
		}
		self.entries.clear();
		self.by_path.clear();
		self.groups.clear();

		let mut report = RegistryBuildReport::default();
		for target in targets {
			let base = BasePath::new(&target.path);
			self.groups.entry(base.clone()).or_default();

			let target_report = match target.kind {
				TargetKind::Directory if target.path.is_dir() => {
					self.register_tree(&target.path, &base)
				}
				TargetKind::Directory => {
					warn!(
						"Directory target {} is not a directory, watching the path itself",
						target.path.display()
					);
					self.register(&target.path, &base)
				}
				TargetKind::File => self.register(&target.path, &base),
			};

			debug!(
				"Target {}: {} watches, {} skipped",
				base,
				target_report.watched,
				target_report.skipped.len()
			);
			report.merge(target_report);
		}

		info!(
			"Watch registry rebuilt: {} targets, {} watches, {} skipped",
			targets.len(),
			report.watched,
			report.skipped.len()
		);
		report
	}

	/// Base path owning `handle`
	pub fn resolve_base_path(&self, handle: WatchHandle) -> Result<BasePath> {
		self.entries
			.get(&handle)
			.map(|entry| entry.base.clone())
			.ok_or(SyncError::UnknownHandle { handle })
	}

	/// Re-register the path of an invalidated handle under `base`.
	///
	/// The old handle is always released. A fresh watch is only registered when the path
	/// still exists; a vanished path is dropped. Calling this for a handle that is no longer
	/// tracked does nothing.
	pub fn retrack(&mut self, handle: WatchHandle, base: &BasePath) -> RegistryBuildReport {
		let Some(entry) = self.forget(handle) else {
			return RegistryBuildReport::default();
		};
		self.source.remove_watch(handle);

		if !entry.path.exists() {
			debug!("Dropping watch {} for vanished path {}", handle, entry.path.display());
			return RegistryBuildReport::default();
		}

		let report = if entry.path.is_dir() {
			self.register_tree(&entry.path, base)
		} else {
			self.register(&entry.path, base)
		};
		info!(
			"Re-established watch on {} under {} ({} watches)",
			entry.path.display(),
			base,
			report.watched
		);
		report
	}

	/// Cover a directory that appeared inside the directory watched by `handle`
	pub fn track_new_directory(
		&mut self, handle: WatchHandle, name: &OsStr,
	) -> Result<RegistryBuildReport> {
		let entry = self
			.entries
			.get(&handle)
			.cloned()
			.ok_or(SyncError::UnknownHandle { handle })?;
		let path = entry.path.join(name);

		if !path.is_dir() {
			return Ok(RegistryBuildReport::default());
		}

		let report = self.register_tree(&path, &entry.base);
		if report.watched > 0 {
			info!("Watching new directory {} under {}", path.display(), entry.base);
		}
		Ok(report)
	}

	/// Drain queued notifications from the underlying source without blocking
	pub fn drain(&mut self, max_events: usize) -> Vec<RawEvent> {
		self.source.drain_events(max_events)
	}

	pub fn watch_count(&self) -> usize {
		self.entries.len()
	}

	pub fn contains(&self, handle: WatchHandle) -> bool {
		self.entries.contains_key(&handle)
	}

	pub fn path_of(&self, handle: WatchHandle) -> Option<&Path> {
		self.entries.get(&handle).map(|entry| entry.path.as_path())
	}

	pub fn handle_for(&self, path: &Path) -> Option<WatchHandle> {
		self.by_path.get(path).copied()
	}

	pub fn base_paths(&self) -> impl Iterator<Item = &BasePath> {
		self.groups.keys()
	}

	pub fn handles_for(&self, base: &BasePath) -> Option<&BTreeSet<WatchHandle>> {
		self.groups.get(base)
	}

	pub fn source(&self) -> &S {
		&self.source
	}

	pub fn source_mut(&mut self) -> &mut S {
		&mut self.source
	}

	fn register_tree(&mut self, root: &Path, base: &BasePath) -> RegistryBuildReport {
		let mut report = RegistryBuildReport::default();

		let excluded = self.excluded.clone();
		let walker = WalkDir::new(root)
			.follow_links(false)
			.into_iter()
			.filter_entry(|entry| !excluded.iter().any(|path| entry.path().starts_with(path)));
		for entry in walker {
			match entry {
				Ok(entry) if entry.file_type().is_dir() => {
					report.merge(self.register(entry.path(), base));
				}
				Ok(_) => {}
				Err(e) => {
					debug!("Skipping unreadable entry during walk: {}", e);
					if let Some(path) = e.path() {
						report.skipped.push(path.to_path_buf());
					}
				}
			}
		}

		report
	}

	fn register(&mut self, path: &Path, base: &BasePath) -> RegistryBuildReport {
		let mut report = RegistryBuildReport::default();

		// Nested targets: the first base path to claim a directory keeps it
		if self.by_path.contains_key(path) {
			return report;
		}

		if self.is_excluded(path) {
			warn!("Not watching {}, it lies inside the backup repository", path.display());
			report.skipped.push(path.to_path_buf());
			return report;
		}

		match self.source.add_watch(path, EventMask::WATCH) {
			Ok(handle) => {
				debug!("Watch {} added for {} under {}", handle, path.display(), base);
				self.insert(handle, path.to_path_buf(), base.clone());
				report.watched += 1;
			}
			Err(SyncError::WatchTargetMissing { path }) => {
				debug!("Path vanished before it could be watched: {}", path.display());
				report.skipped.push(path);
			}
			Err(e) => {
				warn!("Failed to watch {}: {}", path.display(), e);
				report.skipped.push(path.to_path_buf());
			}
		}

		report
	}

	fn insert(&mut self, handle: WatchHandle, path: PathBuf, base: BasePath) {
		self.by_path.insert(path.clone(), handle);
		self.groups.entry(base.clone()).or_default().insert(handle);
		self.entries.insert(handle, WatchEntry { path, base });
	}

	fn forget(&mut self, handle: WatchHandle) -> Option<WatchEntry> {
		let entry = self.entries.remove(&handle)?;
		if self.by_path.get(&entry.path) == Some(&handle) {
			self.by_path.remove(&entry.path);
		}
		if let Some(group) = self.groups.get_mut(&entry.base) {
			group.remove(&handle);
		}
		Some(entry)
	}
}
