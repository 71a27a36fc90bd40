//! Commit message composition
//!
//! Every backup commit is titled `Automated Backup: <body>`. The body comes from a
//! [`CommitMessageSource`]: either the built-in template listing changed and deleted
//! targets, or a language model summarizing the staged diff, falling back to the
//! template whenever generation fails.

use crate::batcher::PendingAction;
use crate::error::{Result, SyncError};
use crate::vcs::GitRepository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix of every commit the synchronizer creates
pub const COMMIT_PREFIX: &str = "Automated Backup: ";

/// Longest generated title accepted, in characters
pub const MAX_TITLE_CHARS: usize = 72;

/// What a commit is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitSummary {
	/// Mirrored changes, as paths relative to the home root where possible
	Changes { changed: Vec<String>, deleted: Vec<String> },
	/// A fixed description, used for startup and target reloads
	Note(String),
}

impl CommitSummary {
	pub fn from_action(action: &PendingAction, home: &Path) -> Self {
		let display = |path: &Path| match path.strip_prefix(home) {
			Ok(relative) if !relative.as_os_str().is_empty() => relative.display().to_string(),
			_ => path.display().to_string(),
		};
		Self::Changes {
			changed: action.changed.iter().map(|b| display(b.as_path())).collect(),
			deleted: action
				.deleted
				.iter()
				.filter(|b| !action.changed.contains(*b))
				.map(|b| display(b.as_path()))
				.collect(),
		}
	}

	pub fn note(text: impl Into<String>) -> Self {
		Self::Note(text.into())
	}

	/// Template body, e.g. `changed: .bashrc, .config/nvim; deleted: .zshrc`.
	///
	/// Falls back to the local time when there is nothing to list.
	pub fn template(&self) -> String {
		match self {
			Self::Note(text) => text.clone(),
			Self::Changes { changed, deleted } => {
				let mut sections = Vec::new();
				if !changed.is_empty() {
					sections.push(format!("changed: {}", changed.join(", ")));
				}
				if !deleted.is_empty() {
					sections.push(format!("deleted: {}", deleted.join(", ")));
				}
				if sections.is_empty() {
					chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
				} else {
					sections.join("; ")
				}
			}
		}
	}
}

/// Strategy producing the body of a commit message
#[async_trait]
pub trait CommitMessageSource: Send + Sync {
	/// Called after staging, so implementations may inspect the staged diff
	async fn compose(&self, summary: &CommitSummary, repo: &GitRepository) -> String;
}

/// Always uses [`CommitSummary::template`]
#[derive(Debug, Clone, Default)]
pub struct TemplateMessages;

#[async_trait]
impl CommitMessageSource for TemplateMessages {
	async fn compose(&self, summary: &CommitSummary, _repo: &GitRepository) -> String {
		summary.template()
	}
}

/// Turns a diff into a one-line commit title
#[async_trait]
pub trait MessageGenerator: Send + Sync {
	async fn generate(&self, diff: &str) -> Result<String>;
}

/// Summarizes the staged diff with a [`MessageGenerator`]
pub struct GeneratedMessages<G> {
	generator: G,
}

impl<G: MessageGenerator> GeneratedMessages<G> {
	pub fn new(generator: G) -> Self {
		Self { generator }
	}
}

#[async_trait]
impl<G: MessageGenerator> CommitMessageSource for GeneratedMessages<G> {
	async fn compose(&self, summary: &CommitSummary, repo: &GitRepository) -> String {
		if let CommitSummary::Note(_) = summary {
			return summary.template();
		}

		let generated = match repo.staged_diff().await {
			Ok(diff) if diff.trim().is_empty() => {
				Err(SyncError::message_generation("nothing staged"))
			}
			Ok(diff) => self.generator.generate(&diff).await,
			Err(e) => Err(e),
		};

		match generated {
			Ok(title) => title,
			Err(e) => {
				warn!("Commit message generation failed, using template: {}", e);
				summary.template()
			}
		}
	}
}

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Diffs are cut to this many characters before being sent
const MAX_DIFF_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are to act as the author of a commit message in git. \
Your mission is to create a clean and comprehensive commit message title. \
Convert the git diff given to you into a single-line commit title in the present tense. \
Reply with the title only, no body and no quotes. \
The title must not exceed 72 characters.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
	model: &'a str,
	messages: Vec<ChatMessage<'a>>,
	temperature: f32,
	max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
	role: &'a str,
	content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
	choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
	message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
	content: Option<String>,
}

/// OpenAI chat-completions client
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
	client: reqwest::Client,
	api_key: String,
	model: String,
	endpoint: String,
}

impl OpenAiGenerator {
	pub const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";

	pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(30))
			.build()?;
		Ok(Self {
			client,
			api_key: api_key.into(),
			model: model.into(),
			endpoint: OPENAI_ENDPOINT.to_string(),
		})
	}

	/// Build a client from the `OPENAI_KEY` environment variable
	pub fn from_env(model: impl Into<String>) -> Result<Self> {
		match std::env::var("OPENAI_KEY") {
			Ok(key) if !key.trim().is_empty() => Self::new(key.trim(), model),
			_ => Err(SyncError::configuration_error(
				"OPENAI_KEY",
				"environment variable is not set",
				"API key",
				"unset",
			)),
		}
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	fn request<'a>(&'a self, diff: &'a str) -> ChatRequest<'a> {
		ChatRequest {
			model: &self.model,
			messages: vec![
				ChatMessage { role: "system", content: SYSTEM_PROMPT },
				ChatMessage { role: "user", content: truncate_chars(diff, MAX_DIFF_CHARS) },
			],
			temperature: 1.0,
			max_tokens: 256,
		}
	}
}

#[async_trait]
impl MessageGenerator for OpenAiGenerator {
	async fn generate(&self, diff: &str) -> Result<String> {
		debug!("Requesting commit title for {} bytes of diff", diff.len());

		let response: ChatResponse = self
			.client
			.post(&self.endpoint)
			.bearer_auth(&self.api_key)
			.json(&self.request(diff))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		let content = response
			.choices
			.into_iter()
			.next()
			.and_then(|choice| choice.message.content)
			.ok_or_else(|| SyncError::message_generation("response contained no choices"))?;

		tidy_title(&content)
			.ok_or_else(|| SyncError::message_generation("model returned an empty title"))
	}
}

/// First line, trimmed and unquoted, first letter capitalized, cut to [`MAX_TITLE_CHARS`]
pub fn tidy_title(raw: &str) -> Option<String> {
	let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
	let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();

	let mut chars = line.chars();
	let first = chars.next()?;
	let title: String = first.to_uppercase().chain(chars).collect();
	Some(truncate_chars(&title, MAX_TITLE_CHARS).trim_end().to_string())
}

fn truncate_chars(text: &str, max: usize) -> &str {
	match text.char_indices().nth(max) {
		Some((index, _)) => &text[..index],
		None => text,
	}
}
