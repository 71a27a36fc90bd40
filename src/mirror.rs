//! Backup mirror writer
//!
//! Realizes backup actions against the destination tree. Every source path must live under
//! the home root; its backup lives at the same relative location under the mirror root.

use crate::batcher::PendingAction;
use crate::config::Target;
use crate::error::{Result, SyncError};
use crate::registry::BasePath;
use std::collections::BTreeSet;
use std::fs;
use std::hash::Hasher;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use twox_hash::XxHash64;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAction {
	MirrorFile,
	MirrorDirectory,
	Delete,
}

impl MirrorAction {
	/// Action matching the current state of `source` on disk
	pub fn for_source(source: &Path) -> io::Result<Self> {
		match fs::symlink_metadata(source) {
			Ok(metadata) if metadata.is_dir() => Ok(MirrorAction::MirrorDirectory),
			Ok(_) => Ok(MirrorAction::MirrorFile),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MirrorAction::Delete),
			Err(e) => Err(e),
		}
	}
}

/// What happened while applying one batch of actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
	pub mirrored: Vec<PathBuf>,
	pub removed: Vec<PathBuf>,
	pub failed: Vec<(PathBuf, String)>,
}

impl MirrorReport {
	/// At least one action reached the destination tree
	pub fn succeeded(&self) -> bool {
		!self.mirrored.is_empty() || !self.removed.is_empty()
	}

	fn record(&mut self, source: &Path, action: MirrorAction, result: Result<()>) {
		match result {
			Ok(()) if action == MirrorAction::Delete => self.removed.push(source.to_path_buf()),
			Ok(()) => self.mirrored.push(source.to_path_buf()),
			Err(e) => {
				warn!("Backup of {} failed ({}): {}", source.display(), e.category(), e);
				self.failed.push((source.to_path_buf(), e.to_string()));
			}
		}
	}
}

#[derive(Debug, Clone)]
pub struct BackupMirror {
	home: PathBuf,
	mirror_root: PathBuf,
	/// Trees never copied from, the mirror root included
	excluded: Vec<PathBuf>,
	dry_run: bool,
}

impl BackupMirror {
	pub fn new(home: impl Into<PathBuf>, mirror_root: impl Into<PathBuf>, dry_run: bool) -> Self {
		let mirror_root = mirror_root.into();
		Self {
			home: home.into(),
			excluded: vec![mirror_root.clone()],
			mirror_root,
			dry_run,
		}
	}

	/// Never back up anything under `path`, e.g. the repository holding the mirror root
	pub fn with_excluded(mut self, path: impl Into<PathBuf>) -> Self {
		self.excluded.push(path.into());
		self
	}

	fn is_excluded(&self, path: &Path) -> bool {
		self.excluded.iter().any(|excluded| path.starts_with(excluded))
	}

	pub fn mirror_root(&self) -> &Path {
		&self.mirror_root
	}

	/// Destination of `source` inside the mirror root
	pub fn to_backup_path(&self, source: &Path) -> Result<PathBuf> {
		if self.is_excluded(source) {
			return Err(SyncError::configuration_error(
				"target",
				"lies inside the backup repository",
				"path outside the backup tree",
				&source.display().to_string(),
			));
		}

		let relative = source.strip_prefix(&self.home).map_err(|_| SyncError::OutsideHome {
			path: source.to_path_buf(),
			home: self.home.clone(),
		})?;
		Ok(self.mirror_root.join(relative))
	}

	/// Apply one batch: removals first, then fresh copies.
	///
	/// Deleted and force-rewritten base paths lose their backup before anything is copied,
	/// so a rewritten directory never keeps entries from before the deletion. A deleted base
	/// path whose source exists again (replace-in-place saves) is mirrored anew.
	pub fn apply(&self, action: &PendingAction) -> MirrorReport {
		let mut report = MirrorReport::default();

		let reappeared: BTreeSet<&BasePath> = action
			.deleted
			.iter()
			.filter(|base| !action.changed.contains(*base) && base.as_path().exists())
			.collect();

		for base in action.deleted.union(&action.force_rewrite) {
			let result = self.perform(base.as_path(), MirrorAction::Delete);
			let recreated = action.changed.contains(base) || reappeared.contains(&base);
			match result {
				Ok(()) if recreated => {}
				result => report.record(base.as_path(), MirrorAction::Delete, result),
			}
		}

		for base in action.changed.iter().chain(reappeared.iter().copied()) {
			self.mirror_current(base, &mut report);
		}

		report
	}

	/// Mirror every target in its current state
	pub fn backup_all(&self, targets: &[Target]) -> MirrorReport {
		let mut report = MirrorReport::default();
		for target in targets {
			self.mirror_current(&BasePath::new(&target.path), &mut report);
		}
		report
	}

	fn mirror_current(&self, base: &BasePath, report: &mut MirrorReport) {
		match MirrorAction::for_source(base.as_path()) {
			Ok(mirror_action) => {
				let result = self.perform(base.as_path(), mirror_action);
				report.record(base.as_path(), mirror_action, result);
			}
			Err(e) => report.record(base.as_path(), MirrorAction::MirrorFile, Err(e.into())),
		}
	}

	pub fn perform(&self, source: &Path, action: MirrorAction) -> Result<()> {
		let destination = self.to_backup_path(source)?;

		if self.dry_run {
			info!(
				"[dry-run] would {:?} {} -> {}",
				action,
				source.display(),
				destination.display()
			);
			return Ok(());
		}

		match action {
			MirrorAction::MirrorFile => {
				info!("Backing up file {}", source.display());
				ensure_parent(&destination)?;
				copy_entry(source, &destination)
			}
			MirrorAction::MirrorDirectory => {
				info!("Backing up directory {}", source.display());
				self.copy_tree(source, &destination)
			}
			MirrorAction::Delete => {
				info!("Removing backup of {}", source.display());
				remove_path(&destination)
			}
		}
	}

	fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
		if fs::symlink_metadata(destination).is_ok_and(|m| !m.is_dir()) {
			remove_path(destination)?;
		}
		fs::create_dir_all(destination)?;

		let mut failures = 0usize;
		let walker = WalkDir::new(source)
			.follow_links(false)
			.min_depth(1)
			.into_iter()
			.filter_entry(|entry| {
				let excluded = self.is_excluded(entry.path());
				if excluded {
					debug!("Not descending into backup tree {}", entry.path().display());
				}
				!excluded
			});
		for entry in walker {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) => {
					// Entries may vanish between the event and the walk
					debug!("Skipping entry during backup: {}", e);
					failures += 1;
					continue;
				}
			};

			let Ok(relative) = entry.path().strip_prefix(source) else {
				continue;
			};
			let target = destination.join(relative);

			let result = if entry.file_type().is_dir() {
				fs::create_dir_all(&target).map_err(SyncError::from)
			} else {
				copy_entry(entry.path(), &target)
			};

			if let Err(e) = result {
				debug!("Failed to back up {}: {}", entry.path().display(), e);
				failures += 1;
			}
		}

		if failures > 0 {
			warn!("{} entries of {} could not be backed up", failures, source.display());
		}
		Ok(())
	}
}

fn ensure_parent(path: &Path) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	Ok(())
}

/// Copy a file or recreate a symlink at `destination`
fn copy_entry(source: &Path, destination: &Path) -> Result<()> {
	let metadata = fs::symlink_metadata(source)?;

	if metadata.file_type().is_symlink() {
		remove_path(destination)?;
		return copy_symlink(source, destination);
	}

	if is_up_to_date(source, &metadata, destination) {
		return Ok(());
	}

	if fs::symlink_metadata(destination).is_ok_and(|m| m.is_dir()) {
		remove_path(destination)?;
	}
	fs::copy(source, destination)?;
	Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
	let link = fs::read_link(source)?;
	std::os::unix::fs::symlink(link, destination)?;
	Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, _destination: &Path) -> Result<()> {
	warn!("Skipping symlink {}", source.display());
	Ok(())
}

/// Backup copy holds the same bytes as the source
fn is_up_to_date(source: &Path, source_metadata: &fs::Metadata, destination: &Path) -> bool {
	let Ok(existing) = fs::symlink_metadata(destination) else {
		return false;
	};
	if !existing.is_file() || existing.len() != source_metadata.len() {
		return false;
	}
	match (content_hash(source), content_hash(destination)) {
		(Ok(source_hash), Ok(backup_hash)) => source_hash == backup_hash,
		_ => false,
	}
}

/// Streaming xxHash64 of a file's contents
fn content_hash(path: &Path) -> io::Result<u64> {
	let mut file = fs::File::open(path)?;
	let mut hasher = XxHash64::default();
	let mut buffer = vec![0u8; 64 * 1024];
	loop {
		let bytes_read = file.read(&mut buffer)?;
		if bytes_read == 0 {
			break;
		}
		hasher.write(&buffer[..bytes_read]);
	}
	Ok(hasher.finish())
}

fn remove_path(path: &Path) -> Result<()> {
	match fs::symlink_metadata(path) {
		Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)?,
		Ok(_) => fs::remove_file(path)?,
		Err(e) if e.kind() == io::ErrorKind::NotFound => {}
		Err(e) => return Err(e.into()),
	}
	Ok(())
}
