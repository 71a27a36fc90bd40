//! Notification sources
//!
//! The synchronizer consumes file change notifications through the [`NotificationSource`]
//! trait: register interest in a path, get back an opaque [`WatchHandle`], and drain queued
//! [`RawEvent`]s without blocking.
//!
//! - [`notify_backend`] - production backend over the `notify` crate
//! - [`crate::test_infrastructure::ScriptedSource`] - scripted in-memory backend for tests

pub mod notify_backend;

pub use notify_backend::NotifySource;

use crate::error::Result;
use crate::events::{EventMask, RawEvent, WatchHandle};
use std::path::Path;

pub trait NotificationSource {
	/// Register a non-recursive watch on `path`.
	///
	/// Fails with [`SyncError::WatchTargetMissing`](crate::SyncError::WatchTargetMissing) when
	/// the path does not exist at registration time.
	fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle>;

	/// Stop delivering events for `handle`. Unknown handles are ignored.
	fn remove_watch(&mut self, handle: WatchHandle);

	/// Return up to `max_events` queued records without blocking.
	fn drain_events(&mut self, max_events: usize) -> Vec<RawEvent>;
}
