//! Daemon settings and the synchronization targets file

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Location of the targets file relative to the home root
pub const DEFAULT_CONFIG_RELATIVE: &str = ".config/synchronization_targets.json";

/// Name of the directory inside the repository that stands in for the home root
pub const DEFAULT_MIRROR_DIR: &str = "home";

/// Runtime settings for the synchronizer service
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Home root that every target must live under
	pub home: PathBuf,
	/// Targets file, watched for changes
	pub config_path: PathBuf,
	/// Git working tree receiving the backup
	pub repository: PathBuf,
	/// Directory inside the repository mirroring the home root
	pub mirror_root: PathBuf,
	/// Sleep between two ticks of the service loop
	pub poll_interval: Duration,
	/// Minimum time between the first unpushed commit and the push
	pub push_interval: Duration,
	/// Upper bound on records drained per tick
	pub max_events_per_tick: usize,
	/// Log filesystem and git operations instead of executing them
	pub dry_run: bool,
	/// Back up every target and commit once at startup
	pub initial_backup: bool,
}

impl SyncConfig {
	/// Settings with defaults derived from the home root and repository
	pub fn new(home: PathBuf, repository: PathBuf) -> Self {
		Self {
			config_path: home.join(DEFAULT_CONFIG_RELATIVE),
			mirror_root: repository.join(DEFAULT_MIRROR_DIR),
			home,
			repository,
			poll_interval: Duration::from_millis(500),
			push_interval: Duration::from_secs(30),
			max_events_per_tick: 1024,
			dry_run: false,
			initial_backup: true,
		}
	}

	/// Read the home root from the `HOME` environment variable
	pub fn home_from_env() -> Result<PathBuf> {
		match std::env::var_os("HOME") {
			Some(home) if !home.is_empty() => Ok(PathBuf::from(home)),
			_ => Err(SyncError::MissingHome),
		}
	}

	/// Trees that are never watched nor copied, so the backup cannot feed on itself.
	///
	/// The mirror root always, plus the whole repository unless the home root lies inside
	/// it, in which case only its `.git` directory.
	pub fn backup_exclusions(&self) -> Vec<PathBuf> {
		let repository_scope = if self.home.starts_with(&self.repository) {
			self.repository.join(".git")
		} else {
			self.repository.clone()
		};
		vec![self.mirror_root.clone(), repository_scope]
	}

	/// Validate the configuration and return errors if invalid
	pub fn validate(&self) -> Result<()> {
		if !self.home.is_absolute() {
			return Err(SyncError::configuration_error(
				"home",
				"must be an absolute path",
				"absolute path",
				&self.home.display().to_string(),
			));
		}

		if self.poll_interval.is_zero() {
			return Err(SyncError::configuration_error(
				"poll_interval",
				"must be greater than 0",
				"> 0",
				&format!("{:?}", self.poll_interval),
			));
		}

		if self.max_events_per_tick == 0 {
			return Err(SyncError::configuration_error(
				"max_events_per_tick",
				"must be greater than 0",
				"> 0",
				"0",
			));
		}

		if self.home.starts_with(&self.mirror_root) {
			return Err(SyncError::configuration_error(
				"mirror_root",
				"must not contain the home root",
				"directory outside the home root's ancestry",
				&self.mirror_root.display().to_string(),
			));
		}

		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
	File,
	Directory,
}

/// A configured path to back up
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
	pub path: PathBuf,
	pub kind: TargetKind,
}

impl Target {
	pub fn file(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), kind: TargetKind::File }
	}

	pub fn directory(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), kind: TargetKind::Directory }
	}
}

/// On-disk shape of the targets file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetsFile {
	#[serde(default)]
	pub directories: Vec<String>,
	#[serde(default)]
	pub files: Vec<String>,
}

impl TargetsFile {
	pub fn parse(text: &str) -> Result<Self> {
		Ok(serde_json::from_str(text)?)
	}

	/// Expand every entry against `home`, directories first. Duplicates are dropped.
	pub fn into_targets(self, home: &Path) -> Vec<Target> {
		let mut targets: Vec<Target> = Vec::new();
		let entries = self
			.directories
			.iter()
			.map(|raw| Target::directory(expand_home(raw, home)))
			.chain(self.files.iter().map(|raw| Target::file(expand_home(raw, home))));

		for target in entries {
			if !targets.iter().any(|existing| existing.path == target.path) {
				targets.push(target);
			}
		}
		targets
	}
}

/// Read and expand the targets file at `path`
pub fn load_targets(path: &Path, home: &Path) -> Result<Vec<Target>> {
	let text = std::fs::read_to_string(path).map_err(|e| SyncError::config_load(path, e))?;
	let file = TargetsFile::parse(&text).map_err(|e| SyncError::config_load(path, e))?;
	Ok(file.into_targets(home))
}

/// Expand `~` shorthand and resolve relative entries against the home root
pub fn expand_home(raw: &str, home: &Path) -> PathBuf {
	let path = if raw == "~" {
		home.to_path_buf()
	} else if let Some(rest) = raw.strip_prefix("~/") {
		home.join(rest)
	} else if Path::new(raw).is_absolute() {
		PathBuf::from(raw)
	} else {
		home.join(raw)
	};
	normalize(&path)
}

/// Lexically remove `.` and `..` components and trailing separators
fn normalize(path: &Path) -> PathBuf {
	let mut normalized = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				normalized.pop();
			}
			other => normalized.push(other.as_os_str()),
		}
	}
	normalized
}
