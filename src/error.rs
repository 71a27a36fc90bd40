use std::path::PathBuf;
use thiserror::Error;

use crate::events::WatchHandle;

/// Synchronizer error types
///
/// Startup-only failures (missing home root, unreadable configuration) are fatal to the
/// binary. Everything else is logged by the service loop and the daemon keeps running.
#[derive(Error, Debug)]
pub enum SyncError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Notify error: {0}")]
	Notify(#[from] notify::Error),

	#[error("JSON serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("HOME environment variable is not set")]
	MissingHome,

	#[error("Failed to load configuration {path}: {reason}")]
	ConfigLoad { path: PathBuf, reason: String },

	#[error(
		"Configuration error: {parameter} - {reason} (expected: {expected}, actual: {actual})"
	)]
	ConfigurationError {
		parameter: String,
		reason: String,
		expected: String,
		actual: String,
	},

	#[error("Watch target does not exist: {path}")]
	WatchTargetMissing { path: PathBuf },

	#[error("Unknown watch handle {handle}")]
	UnknownHandle { handle: WatchHandle },

	#[error("Path {path} is outside the home root {home}")]
	OutsideHome { path: PathBuf, home: PathBuf },

	#[error("Command `{command}` failed with status {status}: {stderr}")]
	CommandFailed {
		command: String,
		status: String,
		stderr: String,
	},

	#[error("Commit message generation failed: {reason}")]
	MessageGeneration { reason: String },
}

impl SyncError {
	/// Check if this error is related to configuration issues
	pub fn is_configuration_error(&self) -> bool {
		matches!(
			self,
			SyncError::MissingHome
				| SyncError::ConfigLoad { .. }
				| SyncError::ConfigurationError { .. }
				| SyncError::OutsideHome { .. }
		)
	}

	/// Get error category for logging
	pub fn category(&self) -> &'static str {
		match self {
			SyncError::Io(_) => "io",
			SyncError::Notify(_) => "notify",
			SyncError::Json(_) => "serialization",
			SyncError::Http(_) => "network",
			SyncError::MissingHome => "environment",
			SyncError::ConfigLoad { .. } => "configuration",
			SyncError::ConfigurationError { .. } => "configuration",
			SyncError::WatchTargetMissing { .. } => "watch",
			SyncError::UnknownHandle { .. } => "invariant",
			SyncError::OutsideHome { .. } => "configuration",
			SyncError::CommandFailed { .. } => "command",
			SyncError::MessageGeneration { .. } => "message_generation",
		}
	}

	/// Create a configuration error
	pub fn configuration_error(
		parameter: &str, reason: &str, expected: &str, actual: &str,
	) -> Self {
		SyncError::ConfigurationError {
			parameter: parameter.to_string(),
			reason: reason.to_string(),
			expected: expected.to_string(),
			actual: actual.to_string(),
		}
	}

	/// Create a configuration load error for a path
	pub fn config_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
		SyncError::ConfigLoad { path: path.into(), reason: reason.to_string() }
	}

	/// Create a message generation error
	pub fn message_generation(reason: impl ToString) -> Self {
		SyncError::MessageGeneration { reason: reason.to_string() }
	}
}

pub type Result<T> = std::result::Result<T, SyncError>;
