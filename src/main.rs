use clap::Parser;
use home_synchronizer::{
	CommandRunner, CommitMessageSource, DryRunRunner, GeneratedMessages, NotifySource,
	OpenAiGenerator, ProcessRunner, SyncConfig, SyncError, SynchronizerService, TemplateMessages,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "synchronizer")]
#[command(about = "Mirrors selected home directory files into a git repository and pushes them")]
struct Cli {
	/// Targets file (default: ~/.config/synchronization_targets.json)
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Git working tree receiving the backup (default: current directory)
	#[arg(short, long)]
	repository: Option<PathBuf>,

	/// Directory inside the repository mirroring the home root (default: <repository>/home)
	#[arg(long)]
	mirror_root: Option<PathBuf>,

	/// Seconds between the first unpushed commit and the push
	#[arg(long, default_value_t = 30)]
	push_interval_secs: u64,

	/// Milliseconds between two ticks of the service loop
	#[arg(long, default_value_t = 500)]
	poll_interval_ms: u64,

	/// Maximum notifications handled per tick
	#[arg(long, default_value_t = 1024)]
	max_events: usize,

	/// Log filesystem and git operations instead of executing them
	#[arg(long)]
	dry_run: bool,

	/// Generate commit titles from the staged diff (reads OPENAI_KEY)
	#[arg(long)]
	generate_messages: bool,

	/// Model used with --generate-messages
	#[arg(long, default_value = OpenAiGenerator::DEFAULT_MODEL)]
	model: String,

	/// Do not back up and commit every target at startup
	#[arg(long)]
	skip_initial_backup: bool,

	/// Enable verbose logging
	#[arg(short, long)]
	verbose: bool,
}

impl Cli {
	fn into_config(self, home: PathBuf) -> anyhow::Result<SyncConfig> {
		let repository = match self.repository {
			Some(path) => path,
			None => std::env::current_dir()?,
		};

		let mut config = SyncConfig::new(home, repository);
		if let Some(path) = self.config {
			config.config_path = path;
		}
		if let Some(path) = self.mirror_root {
			config.mirror_root = path;
		}
		config.push_interval = Duration::from_secs(self.push_interval_secs);
		config.poll_interval = Duration::from_millis(self.poll_interval_ms);
		config.max_events_per_tick = self.max_events;
		config.dry_run = self.dry_run;
		config.initial_backup = !self.skip_initial_backup;
		Ok(config)
	}
}

fn message_source(enabled: bool, model: &str) -> Box<dyn CommitMessageSource> {
	if !enabled {
		return Box::new(TemplateMessages);
	}
	match OpenAiGenerator::from_env(model) {
		Ok(generator) => {
			info!("Generating commit messages with {}", generator.model());
			Box::new(GeneratedMessages::new(generator))
		}
		Err(e) => {
			warn!("Commit message generation disabled: {}", e);
			Box::new(TemplateMessages)
		}
	}
}

async fn run(cli: Cli) -> anyhow::Result<()> {
	let home = SyncConfig::home_from_env()?;
	let messages = message_source(cli.generate_messages, &cli.model);
	let config = cli.into_config(home)?;

	let runner: Arc<dyn CommandRunner> = if config.dry_run {
		info!("Dry run: no files or commits will be written");
		Arc::new(DryRunRunner)
	} else {
		Arc::new(ProcessRunner)
	};

	let service = SynchronizerService::start(
		config,
		NotifySource::new()?,
		NotifySource::new()?,
		runner,
		messages,
	)
	.await?;

	service
		.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				error!("Failed to listen for ctrl-c: {}", e);
				std::future::pending::<()>().await;
			}
			info!("Shutting down synchronizer...");
		})
		.await;

	Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	// Initialize tracing
	let level = if cli.verbose {
		Level::DEBUG
	} else {
		Level::INFO
	};
	tracing_subscriber::fmt().with_max_level(level).init();

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			if let Some(SyncError::MissingHome) = e.downcast_ref::<SyncError>() {
				error!("Cannot locate the home directory: {}", e);
			} else {
				error!("Synchronizer failed: {:#}", e);
			}
			ExitCode::from(1)
		}
	}
}
