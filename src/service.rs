//! The synchronizer service loop
//!
//! One tick runs, in order: targets file reconciliation, change batching, mirroring,
//! commit, push scheduling. Nothing inside a tick is fatal; failures are logged and the
//! next tick starts from whatever state survived.

use crate::batcher::{ChangeBatcher, PendingAction};
use crate::config::{SyncConfig, Target};
use crate::error::Result;
use crate::message::{CommitMessageSource, CommitSummary};
use crate::mirror::{BackupMirror, MirrorReport};
use crate::reconciler::{ConfigReconciler, TARGETS_CHANGED_MESSAGE};
use crate::registry::WatchRegistry;
use crate::scheduler::{CommitScheduler, PushOutcome};
use crate::source::NotificationSource;
use crate::vcs::{CommandRunner, GitRepository};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Commit message body for the startup backup
pub const INITIAL_BACKUP_MESSAGE: &str = "initial synchronization";

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
	pub reloaded: bool,
	pub action: Option<PendingAction>,
	pub committed: bool,
	pub pushed: bool,
}

pub struct SynchronizerService<S: NotificationSource> {
	config: SyncConfig,
	reconciler: ConfigReconciler<S>,
	registry: WatchRegistry<S>,
	batcher: ChangeBatcher,
	mirror: BackupMirror,
	scheduler: CommitScheduler,
}

impl<S: NotificationSource> SynchronizerService<S> {
	/// Load the targets file, register watches and optionally run the startup backup.
	///
	/// `config_source` watches the targets file, `target_source` everything it lists.
	pub async fn start(
		config: SyncConfig, config_source: S, target_source: S, runner: Arc<dyn CommandRunner>,
		messages: Box<dyn CommitMessageSource>,
	) -> Result<Self> {
		config.validate()?;

		let mut reconciler =
			ConfigReconciler::new(config_source, &config.config_path, &config.home);
		let targets = reconciler.load_initial()?;

		let mut registry = WatchRegistry::new(target_source);
		let exclusions = config.backup_exclusions();
		for path in &exclusions {
			registry.exclude(path);
		}
		let report = registry.rebuild(&targets);
		if !report.is_clean() {
			warn!("{} targets could not be watched: {:?}", report.skipped.len(), report.skipped);
		}

		let repo = GitRepository::new(&config.repository, runner);
		let scheduler = CommitScheduler::new(repo, messages, config.push_interval);
		let mirror = exclusions.into_iter().fold(
			BackupMirror::new(&config.home, &config.mirror_root, config.dry_run),
			|mirror, path| mirror.with_excluded(path),
		);
		let batcher = ChangeBatcher::new(config.max_events_per_tick);

		let mut service = Self { config, reconciler, registry, batcher, mirror, scheduler };

		if service.config.initial_backup {
			service.backup_targets(&targets, INITIAL_BACKUP_MESSAGE).await;
		}

		Ok(service)
	}

	pub fn config(&self) -> &SyncConfig {
		&self.config
	}

	pub fn registry(&self) -> &WatchRegistry<S> {
		&self.registry
	}

	pub fn reconciler(&self) -> &ConfigReconciler<S> {
		&self.reconciler
	}

	pub fn scheduler(&self) -> &CommitScheduler {
		&self.scheduler
	}

	/// Run one iteration of the service loop
	pub async fn tick(&mut self) -> TickReport {
		let mut tick = TickReport::default();

		if let Some(reload) = self.reconciler.poll(&mut self.registry) {
			tick.reloaded = true;
			tick.committed |= self.backup_targets(&reload.targets, TARGETS_CHANGED_MESSAGE).await;
		}

		if let Some(action) = self.batcher.collect(&mut self.registry) {
			let report = self.mirror.apply(&action);
			let summary = CommitSummary::from_action(&action, &self.config.home);
			tick.committed |= self.commit_mirrored(&report, &summary).await;
			tick.action = Some(action);
		}

		tick.pushed = self.scheduler.poll_push().await == PushOutcome::Pushed;
		tick
	}

	/// Tick every `poll_interval` until `shutdown` resolves
	pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) {
		info!(
			"Synchronizing {} targets into {}",
			self.reconciler.targets().len(),
			self.mirror.mirror_root().display()
		);

		tokio::pin!(shutdown);
		loop {
			self.tick().await;
			tokio::select! {
				_ = &mut shutdown => break,
				_ = tokio::time::sleep(self.config.poll_interval) => {}
			}
		}

		if self.scheduler.state().is_pending() {
			warn!("Shutting down with unpushed commits");
		}
		info!("Synchronizer stopped");
	}

	async fn backup_targets(&mut self, targets: &[Target], message: &str) -> bool {
		let report = self.mirror.backup_all(targets);
		self.commit_mirrored(&report, &CommitSummary::note(message)).await
	}

	async fn commit_mirrored(&mut self, report: &MirrorReport, summary: &CommitSummary) -> bool {
		if !report.failed.is_empty() {
			warn!("{} backup operations failed", report.failed.len());
		}
		if !report.succeeded() {
			debug!("Nothing reached the backup tree, skipping commit");
			return false;
		}

		match self.scheduler.commit(summary).await {
			Ok(()) => true,
			Err(e) => {
				warn!("Commit failed ({}): {}", e.category(), e);
				false
			}
		}
	}
}
