//! Change batching
//!
//! Once per tick the batcher drains every queued notification, resolves each record to its
//! base path and folds the result into a single [`PendingAction`]. Aggregation happens in
//! ordered sets, so the outcome does not depend on the order records arrive in.

use crate::events::RawEvent;
use crate::registry::{BasePath, WatchRegistry};
use crate::source::NotificationSource;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Backup work collected during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingAction {
	pub changed: BTreeSet<BasePath>,
	pub deleted: BTreeSet<BasePath>,
	/// Changed base paths whose backup must be recreated from scratch
	pub force_rewrite: BTreeSet<BasePath>,
}

impl PendingAction {
	pub fn is_empty(&self) -> bool {
		self.changed.is_empty() && self.deleted.is_empty() && self.force_rewrite.is_empty()
	}

	/// Fold a single record into the action
	pub fn record(&mut self, base: BasePath, event: &RawEvent) {
		let class = event.classify();
		if class.is_self_deleted {
			self.deleted.insert(base);
		} else if class.is_child_deleted {
			self.force_rewrite.insert(base.clone());
			self.changed.insert(base);
		} else if class.is_modification {
			self.changed.insert(base);
		}
	}

	fn mark_all<'a>(&mut self, bases: impl Iterator<Item = &'a BasePath>) {
		for base in bases {
			self.changed.insert(base.clone());
			self.force_rewrite.insert(base.clone());
		}
	}
}

/// Turns raw notifications into one [`PendingAction`] per tick
#[derive(Debug, Clone)]
pub struct ChangeBatcher {
	max_events: usize,
}

impl ChangeBatcher {
	pub fn new(max_events: usize) -> Self {
		Self { max_events }
	}

	/// Drain and classify every queued notification.
	///
	/// Returns `None` when nothing relevant happened, which is the common case.
	pub fn collect<S: NotificationSource>(
		&self, registry: &mut WatchRegistry<S>,
	) -> Option<PendingAction> {
		let events = registry.drain(self.max_events);
		if events.is_empty() {
			return None;
		}

		if events.len() == self.max_events {
			debug!("Drained a full batch of {} records, remaining records wait a tick", events.len());
		}

		let mut action = PendingAction::default();
		for event in &events {
			self.apply(registry, &mut action, event);
		}

		if action.is_empty() {
			return None;
		}

		info!(
			"Change detected: {} changed, {} deleted, {} to rewrite",
			action.changed.len(),
			action.deleted.len(),
			action.force_rewrite.len()
		);
		Some(action)
	}

	fn apply<S: NotificationSource>(
		&self, registry: &mut WatchRegistry<S>, action: &mut PendingAction, event: &RawEvent,
	) {
		let class = event.classify();
		debug!(
			"Event on {}: {:?} {:?}",
			event.handle,
			event.mask.names(),
			event.name
		);

		if class.is_overflow {
			warn!("Notification queue overflowed, rewriting every target");
			action.mark_all(registry.base_paths());
			return;
		}

		let base = match registry.resolve_base_path(event.handle) {
			Ok(base) => base,
			Err(e) => {
				error!("Dropping event {:?}: {}", event.mask.names(), e);
				return;
			}
		};

		action.record(base.clone(), event);

		if class.directory_appeared {
			if let Some(name) = &event.name {
				if let Err(e) = registry.track_new_directory(event.handle, name) {
					warn!("Failed to track new directory {:?}: {}", name, e);
				}
			}
		}

		if class.is_ignored {
			let report = registry.retrack(event.handle, &base);
			if !report.is_clean() {
				debug!("Retrack of {} skipped {:?}", event.handle, report.skipped);
			}
		}
	}
}
