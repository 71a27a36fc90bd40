// Integration tests for the notify-backed notification source
// Uses the real filesystem, so event timing varies by platform

use home_synchronizer::events::{EventMask, RawEvent, WatchHandle};
use home_synchronizer::{NotificationSource, NotifySource, SyncError};
use std::ffi::OsStr;
use std::time::{Duration, Instant};

mod common;

/// Drain until `predicate` matches a record or the timeout elapses
async fn wait_for(
	source: &mut NotifySource, predicate: impl Fn(&RawEvent) -> bool,
) -> Vec<RawEvent> {
	let mut seen = Vec::new();
	let start_time = Instant::now();
	while start_time.elapsed() < Duration::from_secs(3) {
		seen.extend(source.drain_events(256));
		if seen.iter().any(&predicate) {
			break;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	seen
}

#[tokio::test]
async fn test_missing_path_is_rejected() {
	let temp_dir = common::setup_temp_dir();
	let mut source = NotifySource::new().unwrap();

	let err = source
		.add_watch(&temp_dir.path().join("missing"), EventMask::WATCH)
		.unwrap_err();
	assert!(matches!(err, SyncError::WatchTargetMissing { .. }));
	assert_eq!(source.watch_count(), 0);
}

#[tokio::test]
async fn test_handles_are_distinct_and_removable() {
	let temp_dir = common::setup_temp_dir();
	std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
	let mut source = NotifySource::new().unwrap();

	let root = source.add_watch(temp_dir.path(), EventMask::WATCH).unwrap();
	let sub = source.add_watch(&temp_dir.path().join("sub"), EventMask::WATCH).unwrap();
	assert_ne!(root, sub);
	assert_eq!(source.watch_count(), 2);

	source.remove_watch(sub);
	source.remove_watch(WatchHandle::new(999));
	assert_eq!(source.watch_count(), 1);
}

#[tokio::test]
async fn test_created_file_is_reported_on_parent() {
	let temp_dir = common::setup_temp_dir();
	let mut source = NotifySource::new().unwrap();
	let root = source.add_watch(temp_dir.path(), EventMask::WATCH).unwrap();

	common::wait_for_events().await;
	std::fs::write(temp_dir.path().join("created.txt"), "content").unwrap();

	let events = wait_for(&mut source, |event| {
		event.handle == root && event.name.as_deref() == Some(OsStr::new("created.txt"))
	})
	.await;

	assert!(
		events.iter().any(|event| event.handle == root && event.classify().is_modification),
		"Expected a modification record on the parent, got: {events:?}"
	);
}

#[tokio::test]
async fn test_removed_file_invalidates_its_handle() {
	let temp_dir = common::setup_temp_dir();
	let file = temp_dir.path().join("watched.txt");
	std::fs::write(&file, "content").unwrap();
	let mut source = NotifySource::new().unwrap();
	let handle = source.add_watch(&file, EventMask::WATCH).unwrap();

	common::wait_for_events().await;
	std::fs::remove_file(&file).unwrap();

	let events = wait_for(&mut source, |event| {
		event.handle == handle && event.classify().is_ignored
	})
	.await;

	let record = events
		.iter()
		.find(|event| event.handle == handle && event.classify().is_ignored)
		.expect("Expected an IGNORED record for the removed file");
	assert!(record.classify().is_self_deleted);
	assert_eq!(source.watch_count(), 0);
}

#[tokio::test]
async fn test_service_mirrors_real_changes() {
	use home_synchronizer::test_infrastructure::RecordingRunner;
	use home_synchronizer::{SynchronizerService, TemplateMessages};
	use std::sync::Arc;

	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file("notes/todo.md", "v1").unwrap();
	layout.write_targets(&["notes"], &[]).unwrap();

	let runner = RecordingRunner::new();
	let mut service = SynchronizerService::start(
		workspace.config(),
		NotifySource::new().unwrap(),
		NotifySource::new().unwrap(),
		Arc::new(runner.clone()),
		Box::new(TemplateMessages),
	)
	.await
	.unwrap();

	common::wait_for_events().await;
	layout.write_file("notes/todo.md", "v2").unwrap();

	let start_time = Instant::now();
	while start_time.elapsed() < Duration::from_secs(3) && runner.count("commit") == 0 {
		service.tick().await;
		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	assert_eq!(runner.count("commit"), 1);
	assert_eq!(
		std::fs::read_to_string(layout.backup_of("notes/todo.md")).unwrap(),
		"v2"
	);
}
