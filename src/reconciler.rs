//! Targets file reconciliation
//!
//! The targets file is watched through its own [`NotificationSource`]. Any record on that
//! watch triggers a reload; a successful parse replaces the target list and rebuilds the
//! registry, a failed one keeps the previous state untouched.
//!
//! Editors usually save by writing a temporary file and renaming it over the original,
//! which kills the watch. The watch is re-established on every tick until the file exists
//! again.

use crate::config::{load_targets, Target};
use crate::error::Result;
use crate::events::{EventMask, WatchHandle};
use crate::registry::{RegistryBuildReport, WatchRegistry};
use crate::source::NotificationSource;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Commit message body used after a reload
pub const TARGETS_CHANGED_MESSAGE: &str = "synchronization targets changed";

/// Records drained from the targets file watch per tick
const MAX_CONFIG_EVENTS: usize = 64;

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reload {
	pub targets: Vec<Target>,
	pub report: RegistryBuildReport,
}

pub struct ConfigReconciler<S: NotificationSource> {
	source: S,
	config_path: PathBuf,
	home: PathBuf,
	handle: Option<WatchHandle>,
	targets: Vec<Target>,
}

impl<S: NotificationSource> ConfigReconciler<S> {
	pub fn new(source: S, config_path: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
		Self {
			source,
			config_path: config_path.into(),
			home: home.into(),
			handle: None,
			targets: Vec::new(),
		}
	}

	/// Parse the targets file and start watching it. Errors here are fatal to startup.
	pub fn load_initial(&mut self) -> Result<Vec<Target>> {
		self.targets = load_targets(&self.config_path, &self.home)?;
		info!(
			"Loaded {} synchronization targets from {}",
			self.targets.len(),
			self.config_path.display()
		);
		self.watch_config();
		Ok(self.targets.clone())
	}

	pub fn targets(&self) -> &[Target] {
		&self.targets
	}

	pub fn config_path(&self) -> &Path {
		&self.config_path
	}

	pub fn is_watching(&self) -> bool {
		self.handle.is_some()
	}

	/// Check the targets file watch and reload when it reported anything.
	///
	/// Returns the new target list once the registry has been rebuilt for it.
	pub fn poll<R: NotificationSource>(&mut self, registry: &mut WatchRegistry<R>) -> Option<Reload> {
		let events = self.source.drain_events(MAX_CONFIG_EVENTS);
		let mut triggered = !events.is_empty();

		if events.iter().any(|event| event.classify().is_ignored) {
			if let Some(handle) = self.handle.take() {
				self.source.remove_watch(handle);
			}
			debug!("Watch on {} was dropped", self.config_path.display());
		}

		if self.handle.is_none() {
			self.watch_config();
			// The file came back, possibly with new content
			triggered |= self.handle.is_some();
		}

		if !triggered {
			return None;
		}
		self.reload(registry)
	}

	fn reload<R: NotificationSource>(&mut self, registry: &mut WatchRegistry<R>) -> Option<Reload> {
		match load_targets(&self.config_path, &self.home) {
			Ok(targets) => {
				info!("Synchronization targets changed, {} targets", targets.len());
				let report = registry.rebuild(&targets);
				self.targets = targets.clone();
				Some(Reload { targets, report })
			}
			Err(e) => {
				error!("Keeping previous synchronization targets: {}", e);
				None
			}
		}
	}

	fn watch_config(&mut self) {
		match self.source.add_watch(&self.config_path, EventMask::WATCH) {
			Ok(handle) => {
				debug!("Watching {} as {}", self.config_path.display(), handle);
				self.handle = Some(handle);
			}
			Err(e) => {
				debug!("Cannot watch {} yet: {}", self.config_path.display(), e);
				self.handle = None;
			}
		}
	}
}
