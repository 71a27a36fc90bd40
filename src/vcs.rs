//! Version control collaborator
//!
//! Git is driven as an external process through the [`CommandRunner`] capability, so the
//! same [`GitRepository`] can execute for real, log would-be invocations in dry-run mode,
//! or record them in tests.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One external command with its working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
	pub program: String,
	pub args: Vec<String>,
	pub cwd: PathBuf,
}

impl Invocation {
	pub fn new<I, A>(program: &str, args: I, cwd: &Path) -> Self
	where
		I: IntoIterator<Item = A>,
		A: Into<String>,
	{
		Self {
			program: program.to_string(),
			args: args.into_iter().map(Into::into).collect(),
			cwd: cwd.to_path_buf(),
		}
	}

	/// First argument, e.g. the git subcommand
	pub fn subcommand(&self) -> Option<&str> {
		self.args.first().map(String::as_str)
	}
}

impl fmt::Display for Invocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.program)?;
		for arg in &self.args {
			if arg.is_empty() || arg.contains(char::is_whitespace) {
				write!(f, " {:?}", arg)?;
			} else {
				write!(f, " {}", arg)?;
			}
		}
		Ok(())
	}
}

/// Capability to execute an external command and capture its standard output
#[async_trait]
pub trait CommandRunner: Send + Sync {
	async fn run(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
	async fn run(&self, invocation: &Invocation) -> Result<String> {
		debug!("Running `{}` in {}", invocation, invocation.cwd.display());

		let output = tokio::process::Command::new(&invocation.program)
			.args(&invocation.args)
			.current_dir(&invocation.cwd)
			.kill_on_drop(true)
			.output()
			.await?;

		if !output.status.success() {
			return Err(SyncError::CommandFailed {
				command: invocation.to_string(),
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

/// Prints the would-be invocation instead of executing it
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
	async fn run(&self, invocation: &Invocation) -> Result<String> {
		info!("[dry-run] {}", invocation);
		Ok(String::new())
	}
}

/// Git working tree receiving the backup
#[derive(Clone)]
pub struct GitRepository {
	working_tree: PathBuf,
	runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for GitRepository {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GitRepository")
			.field("working_tree", &self.working_tree)
			.finish()
	}
}

impl GitRepository {
	pub fn new(working_tree: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
		Self { working_tree: working_tree.into(), runner }
	}

	pub fn working_tree(&self) -> &Path {
		&self.working_tree
	}

	async fn git<const N: usize>(&self, args: [&str; N]) -> Result<String> {
		let invocation = Invocation::new("git", args, &self.working_tree);
		self.runner.run(&invocation).await
	}

	/// Stage every change in the working tree
	pub async fn add(&self) -> Result<()> {
		self.git(["add", "."]).await.map(|_| ())
	}

	pub async fn commit(&self, message: &str) -> Result<()> {
		self.git(["commit", "-m", message]).await.map(|_| ())
	}

	pub async fn push(&self) -> Result<()> {
		self.git(["push"]).await.map(|_| ())
	}

	/// Diff of everything staged for the next commit
	pub async fn staged_diff(&self) -> Result<String> {
		self.git(["diff", "--cached"]).await
	}
}
