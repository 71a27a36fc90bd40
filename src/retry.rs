//! Backoff policy for retrying failed pushes
//!
//! A push that fails (remote unreachable, authentication prompt, rejected ref) keeps the
//! scheduler in its pending state. Instead of retrying on every tick, the next attempt is
//! delayed by an exponentially growing amount, capped at the push interval.

use std::time::Duration;

/// Retry delay configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
	/// Delay after the first failure
	pub initial_delay: Duration,
	/// Maximum delay (for exponential backoff)
	pub max_delay: Duration,
	/// Exponential backoff multiplier
	pub backoff_multiplier: f64,
	/// Whether to enable exponential backoff
	pub exponential_backoff: bool,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(30),
			backoff_multiplier: 2.0,
			exponential_backoff: true,
		}
	}
}

impl BackoffPolicy {
	pub fn builder() -> BackoffPolicyBuilder {
		BackoffPolicyBuilder::new()
	}

	/// Calculate the delay for a given retry attempt
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		if !self.exponential_backoff {
			return self.initial_delay.min(self.max_delay);
		}

		let delay_ms =
			self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

		let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);
		std::cmp::min(delay, self.max_delay)
	}
}

/// A builder for creating backoff policies
#[derive(Debug)]
pub struct BackoffPolicyBuilder {
	policy: BackoffPolicy,
}

impl BackoffPolicyBuilder {
	/// Create a new builder with default configuration
	pub fn new() -> Self {
		Self { policy: BackoffPolicy::default() }
	}

	/// Set the initial retry delay
	pub fn initial_delay(mut self, delay: Duration) -> Self {
		self.policy.initial_delay = delay;
		self
	}

	/// Set the maximum retry delay
	pub fn max_delay(mut self, delay: Duration) -> Self {
		self.policy.max_delay = delay;
		self
	}

	/// Set the backoff multiplier
	pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
		self.policy.backoff_multiplier = multiplier;
		self
	}

	/// Enable or disable exponential backoff
	pub fn exponential_backoff(mut self, enabled: bool) -> Self {
		self.policy.exponential_backoff = enabled;
		self
	}

	pub fn build(self) -> BackoffPolicy {
		self.policy
	}
}

impl Default for BackoffPolicyBuilder {
	fn default() -> Self {
		Self::new()
	}
}
