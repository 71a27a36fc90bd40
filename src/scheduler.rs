//! Commit and push scheduling
//!
//! Commits happen as soon as a batch has been mirrored. Pushes are debounced: the first
//! unpushed commit starts a window of `push_interval`, later commits join it, and the push
//! runs once the window has elapsed. A failed push keeps the window open and is retried
//! after a backoff delay.

use crate::error::Result;
use crate::message::{CommitMessageSource, CommitSummary, COMMIT_PREFIX};
use crate::retry::BackoffPolicy;
use crate::vcs::GitRepository;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Push debounce state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushState {
	/// Everything committed has been pushed
	#[default]
	Idle,
	/// Commits exist that have not been pushed yet
	PendingPush {
		first_pending_at: Instant,
		failed_attempts: u32,
		retry_at: Option<Instant>,
	},
}

impl PushState {
	pub fn is_pending(&self) -> bool {
		matches!(self, Self::PendingPush { .. })
	}

	/// A commit landed. Only the first unpushed commit opens the window.
	pub fn note_commit(&mut self, now: Instant) {
		if let Self::Idle = self {
			*self = Self::PendingPush { first_pending_at: now, failed_attempts: 0, retry_at: None };
		}
	}

	pub fn push_due(&self, now: Instant, interval: Duration) -> bool {
		match self {
			Self::Idle => false,
			Self::PendingPush { first_pending_at, retry_at, .. } => {
				now.saturating_duration_since(*first_pending_at) >= interval
					&& retry_at.map_or(true, |at| now >= at)
			}
		}
	}

	pub fn note_push_succeeded(&mut self) {
		*self = Self::Idle;
	}

	pub fn note_push_failed(&mut self, now: Instant, backoff: &BackoffPolicy) {
		if let Self::PendingPush { failed_attempts, retry_at, .. } = self {
			let delay = backoff.delay_for_attempt(*failed_attempts);
			*failed_attempts += 1;
			*retry_at = Some(now + delay);
		}
	}
}

/// Outcome of [`CommitScheduler::poll_push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
	NotDue,
	Pushed,
	Failed,
}

/// Stages, commits and pushes the backup tree
pub struct CommitScheduler {
	repo: GitRepository,
	messages: Box<dyn CommitMessageSource>,
	state: PushState,
	push_interval: Duration,
	backoff: BackoffPolicy,
}

impl CommitScheduler {
	pub fn new(
		repo: GitRepository, messages: Box<dyn CommitMessageSource>, push_interval: Duration,
	) -> Self {
		let backoff = BackoffPolicy::builder().max_delay(push_interval).build();
		Self { repo, messages, state: PushState::Idle, push_interval, backoff }
	}

	pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
		self.backoff = backoff;
		self
	}

	pub fn state(&self) -> PushState {
		self.state
	}

	pub fn repository(&self) -> &GitRepository {
		&self.repo
	}

	/// Stage everything and commit it.
	///
	/// On failure the push state is left untouched, so nothing is pushed on its behalf.
	pub async fn commit(&mut self, summary: &CommitSummary) -> Result<()> {
		self.repo.add().await?;
		let body = self.messages.compose(summary, &self.repo).await;
		let message = format!("{COMMIT_PREFIX}{body}");
		self.repo.commit(&message).await?;

		info!("Committed: {}", message);
		self.state.note_commit(Instant::now());
		Ok(())
	}

	/// Push if the debounce window has elapsed
	pub async fn poll_push(&mut self) -> PushOutcome {
		let now = Instant::now();
		if !self.state.push_due(now, self.push_interval) {
			return PushOutcome::NotDue;
		}

		match self.repo.push().await {
			Ok(()) => {
				info!("Pushed backup");
				self.state.note_push_succeeded();
				PushOutcome::Pushed
			}
			Err(e) => {
				self.state.note_push_failed(now, &self.backoff);
				warn!("Push failed, will retry: {}", e);
				if let PushState::PendingPush { retry_at: Some(at), .. } = self.state {
					debug!("Next push attempt in {:?}", at.saturating_duration_since(now));
				}
				PushOutcome::Failed
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::TemplateMessages;
	use crate::test_infrastructure::RecordingRunner;
	use std::sync::Arc;

	const INTERVAL: Duration = Duration::from_secs(30);

	fn scheduler(runner: &RecordingRunner) -> CommitScheduler {
		let repo = GitRepository::new("/srv/repo", Arc::new(runner.clone()));
		CommitScheduler::new(repo, Box::new(TemplateMessages), INTERVAL)
	}

	#[test]
	fn test_push_state_transitions() {
		let start = Instant::now();
		let mut state = PushState::default();
		assert!(!state.push_due(start + INTERVAL, INTERVAL));

		state.note_commit(start);
		state.note_commit(start + Duration::from_secs(10));
		assert!(!state.push_due(start + Duration::from_secs(29), INTERVAL));
		assert!(state.push_due(start + INTERVAL, INTERVAL));

		state.note_push_succeeded();
		assert_eq!(state, PushState::Idle);
	}

	#[test]
	fn test_failed_push_backs_off() {
		let start = Instant::now();
		let backoff = BackoffPolicy::builder()
			.initial_delay(Duration::from_secs(1))
			.max_delay(INTERVAL)
			.build();
		let mut state = PushState::Idle;
		state.note_commit(start);

		let first_failure = start + INTERVAL;
		state.note_push_failed(first_failure, &backoff);
		assert!(state.is_pending());
		assert!(!state.push_due(first_failure, INTERVAL));
		assert!(state.push_due(first_failure + Duration::from_secs(1), INTERVAL));

		let second_failure = first_failure + Duration::from_secs(1);
		state.note_push_failed(second_failure, &backoff);
		assert!(!state.push_due(second_failure + Duration::from_secs(1), INTERVAL));
		assert!(state.push_due(second_failure + Duration::from_secs(2), INTERVAL));
	}

	#[tokio::test(start_paused = true)]
	async fn test_commit_then_push_after_interval() {
		let runner = RecordingRunner::new();
		let mut scheduler = scheduler(&runner);

		scheduler.commit(&CommitSummary::note("startup")).await.unwrap();
		assert!(scheduler.state().is_pending());
		assert_eq!(scheduler.poll_push().await, PushOutcome::NotDue);

		tokio::time::advance(Duration::from_secs(10)).await;
		scheduler.commit(&CommitSummary::note("second")).await.unwrap();

		tokio::time::advance(Duration::from_secs(21)).await;
		assert_eq!(scheduler.poll_push().await, PushOutcome::Pushed);
		assert_eq!(scheduler.state(), PushState::Idle);

		assert_eq!(runner.count("commit"), 2);
		assert_eq!(runner.count("push"), 1);
		assert_eq!(
			runner.invocations()[1].args,
			vec!["commit", "-m", "Automated Backup: startup"]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failed_commit_leaves_state_idle() {
		let runner = RecordingRunner::new().failing("commit");
		let mut scheduler = scheduler(&runner);

		assert!(scheduler.commit(&CommitSummary::note("nothing")).await.is_err());
		assert_eq!(scheduler.state(), PushState::Idle);

		tokio::time::advance(INTERVAL * 2).await;
		assert_eq!(scheduler.poll_push().await, PushOutcome::NotDue);
		assert_eq!(runner.count("push"), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failed_push_is_retried() {
		let runner = RecordingRunner::new().failing("push");
		let mut scheduler = scheduler(&runner);

		scheduler.commit(&CommitSummary::note("change")).await.unwrap();
		tokio::time::advance(INTERVAL).await;

		assert_eq!(scheduler.poll_push().await, PushOutcome::Failed);
		assert!(scheduler.state().is_pending());
		assert_eq!(scheduler.poll_push().await, PushOutcome::NotDue);

		runner.set_failing("push", false);
		tokio::time::advance(Duration::from_millis(100)).await;
		assert_eq!(scheduler.poll_push().await, PushOutcome::Pushed);
		assert_eq!(runner.count("push"), 2);
	}
}
