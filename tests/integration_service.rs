// Integration tests for the synchronizer service loop
// Drives the public API with scripted notifications and a recording git runner

use home_synchronizer::events::{EventMask, RawEvent};
use home_synchronizer::scheduler::PushState;
use home_synchronizer::test_infrastructure::{RecordingRunner, ScriptedSource};
use std::fs;

mod common;

#[tokio::test(start_paused = true)]
async fn test_single_file_change_is_copied_committed_and_pushed_once() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file(".gitconfig", "[user]\n\tname = a").unwrap();
	layout.write_targets(&[], &["~/.gitconfig"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let config = workspace.config();
	let push_interval = config.push_interval;
	let mut service =
		common::start_scripted(config, &config_source, &target_source, &runner).await;

	let path = layout.write_file(".gitconfig", "[user]\n\tname = b").unwrap();
	let handle = target_source.handle_for(&path).unwrap();
	target_source.push(RawEvent::new(handle, EventMask::MODIFY));
	target_source.push(RawEvent::new(handle, EventMask::MODIFY));

	service.tick().await;
	tokio::time::advance(push_interval / 2).await;
	service.tick().await;
	tokio::time::advance(push_interval / 2).await;
	service.tick().await;
	service.tick().await;

	assert_eq!(
		fs::read_to_string(layout.backup_of(".gitconfig")).unwrap(),
		"[user]\n\tname = b"
	);
	assert_eq!(runner.count("add"), 1);
	assert_eq!(runner.count("commit"), 1);
	assert_eq!(runner.count("push"), 1);
	assert_eq!(service.scheduler().state(), PushState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_commits_within_window_share_one_push() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file("a.txt", "a").unwrap();
	layout.write_file("b.txt", "b").unwrap();
	layout.write_targets(&[], &["a.txt", "b.txt"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let config = workspace.config();
	let push_interval = config.push_interval;
	let mut service =
		common::start_scripted(config, &config_source, &target_source, &runner).await;

	for (name, step) in [("a.txt", 0), ("b.txt", 1)] {
		let path = layout.write_file(name, &format!("edit {step}")).unwrap();
		target_source.push(RawEvent::new(target_source.handle_for(&path).unwrap(), EventMask::MODIFY));
		service.tick().await;
		tokio::time::advance(push_interval / 3).await;
	}

	tokio::time::advance(push_interval / 3).await;
	service.tick().await;

	assert_eq!(runner.count("commit"), 2);
	assert_eq!(runner.count("push"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_directory_child_deletion_leaves_no_orphans() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file("projects/keep.txt", "keep").unwrap();
	layout.write_file("projects/old/stale.txt", "stale").unwrap();
	layout.write_targets(&["projects"], &[]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let mut config = workspace.config();
	config.initial_backup = true;
	let mut service =
		common::start_scripted(config, &config_source, &target_source, &runner).await;
	assert!(layout.backup_of("projects/old/stale.txt").exists());

	let old = layout.home.join("projects/old");
	let old_handle = target_source.handle_for(&old).unwrap();
	let root_handle = target_source.handle_for(&layout.home.join("projects")).unwrap();
	fs::remove_dir_all(&old).unwrap();
	target_source.push(RawEvent::new(old_handle, EventMask::DELETE).with_name("stale.txt"));
	target_source.push(RawEvent::new(old_handle, EventMask::DELETE_SELF | EventMask::IGNORED));
	target_source.push(RawEvent::new(root_handle, EventMask::DELETE | EventMask::IS_DIR).with_name("old"));

	let tick = service.tick().await;

	assert!(tick.committed);
	assert!(layout.backup_of("projects/keep.txt").exists());
	assert!(!layout.backup_of("projects/old").exists());
	assert_eq!(service.registry().watch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_subdirectory_is_watched_and_mirrored() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	fs::create_dir_all(layout.home.join("music")).unwrap();
	layout.write_targets(&["music"], &[]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let mut service =
		common::start_scripted(workspace.config(), &config_source, &target_source, &runner).await;

	layout.write_file("music/album/track.flac", "....").unwrap();
	let root = target_source.handle_for(&layout.home.join("music")).unwrap();
	target_source.push(RawEvent::new(root, EventMask::CREATE | EventMask::IS_DIR).with_name("album"));

	service.tick().await;

	assert!(layout.backup_of("music/album/track.flac").exists());
	assert!(target_source.handle_for(&layout.home.join("music/album")).is_some());
	assert_eq!(service.registry().watch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_queue_overflow_rewrites_every_target() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file(".profile", "v1").unwrap();
	layout.write_file("docs/a.md", "a").unwrap();
	layout.write_targets(&["docs"], &[".profile"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let mut service =
		common::start_scripted(workspace.config(), &config_source, &target_source, &runner).await;

	layout.write_file(".profile", "v2").unwrap();
	target_source.push(RawEvent::overflow());

	let tick = service.tick().await;

	let action = tick.action.unwrap();
	assert_eq!(action.changed.len(), 2);
	assert_eq!(action.force_rewrite.len(), 2);
	assert_eq!(fs::read_to_string(layout.backup_of(".profile")).unwrap(), "v2");
	assert!(layout.backup_of("docs/a.md").exists());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_targets_file_keeps_watching_old_targets() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file(".bashrc", "v1").unwrap();
	layout.write_targets(&[], &[".bashrc"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let mut service =
		common::start_scripted(workspace.config(), &config_source, &target_source, &runner).await;

	fs::write(&layout.config_path, "{\"files\": [\".bashrc\",").unwrap();
	let config_handle = config_source.handle_for(&layout.config_path).unwrap();
	config_source.push(RawEvent::new(config_handle, EventMask::MODIFY));

	let tick = service.tick().await;
	assert!(!tick.reloaded);
	assert!(!tick.committed);
	assert_eq!(service.reconciler().targets().len(), 1);

	let bashrc = layout.write_file(".bashrc", "v2").unwrap();
	target_source.push(RawEvent::new(target_source.handle_for(&bashrc).unwrap(), EventMask::MODIFY));

	assert!(service.tick().await.committed);
	assert_eq!(fs::read_to_string(layout.backup_of(".bashrc")).unwrap(), "v2");
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_writes_nothing() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file(".bashrc", "v1").unwrap();
	layout.write_targets(&[], &[".bashrc"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new();
	let mut config = workspace.config();
	config.dry_run = true;
	config.initial_backup = true;
	common::start_scripted(config, &config_source, &target_source, &runner).await;

	assert!(!layout.backup_of(".bashrc").exists());
}

#[tokio::test(start_paused = true)]
async fn test_failed_commit_does_not_schedule_push() {
	let workspace = common::Workspace::new();
	let layout = &workspace.layout;
	layout.write_file(".bashrc", "v1").unwrap();
	layout.write_targets(&[], &[".bashrc"]).unwrap();

	let (config_source, target_source) = (ScriptedSource::new(), ScriptedSource::new());
	let runner = RecordingRunner::new().failing("commit");
	let mut config = workspace.config();
	config.initial_backup = true;
	let push_interval = config.push_interval;
	let mut service = common::start_scripted(config, &config_source, &target_source, &runner).await;

	assert_eq!(service.scheduler().state(), PushState::Idle);
	tokio::time::advance(push_interval * 2).await;
	service.tick().await;
	assert_eq!(runner.count("push"), 0);
}
