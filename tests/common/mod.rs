//! Common test utilities for the home synchronizer

#![allow(unused_imports, dead_code)]

use home_synchronizer::test_infrastructure::{HomeLayout, RecordingRunner, ScriptedSource};
use home_synchronizer::{SyncConfig, SynchronizerService, TemplateMessages};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn setup_temp_dir() -> TempDir {
	TempDir::new().expect("Failed to create temp directory")
}

/// A scratch home root with a repository and a targets file
pub struct Workspace {
	pub temp_dir: TempDir,
	pub layout: HomeLayout,
}

impl Workspace {
	pub fn new() -> Self {
		let temp_dir = setup_temp_dir();
		let layout = HomeLayout::create(temp_dir.path()).expect("Failed to lay out home root");
		Self { temp_dir, layout }
	}

	pub fn config(&self) -> SyncConfig {
		let mut config =
			SyncConfig::new(self.layout.home.clone(), self.layout.repository.clone());
		config.initial_backup = false;
		config
	}
}

/// Start a service over scripted sources and a recording runner
pub async fn start_scripted(
	config: SyncConfig, config_source: &ScriptedSource, target_source: &ScriptedSource,
	runner: &RecordingRunner,
) -> SynchronizerService<ScriptedSource> {
	SynchronizerService::start(
		config,
		config_source.clone(),
		target_source.clone(),
		Arc::new(runner.clone()),
		Box::new(TemplateMessages),
	)
	.await
	.expect("Service should start")
}

/// Wait for a short duration to allow file system events to propagate
pub async fn wait_for_events() {
	tokio::time::sleep(Duration::from_millis(300)).await;
}
