use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Cancellation and deadline shared by every network call of one terminal invocation.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
	token: CancellationToken,
	deadline: Option<Instant>,
}
impl ExecutionContext {
	pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
		Self { token, deadline }
	}

	pub fn with_timeout(token: CancellationToken, timeout: Option<Duration>) -> Self {
		Self { token, deadline: timeout.map(|timeout| Instant::now() + timeout) }
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	pub fn check(&self, stage: &str) -> Result<()> {
		if self.token.is_cancelled() {
			return Err(Error::Cancelled { stage: stage.to_string() });
		}
		if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			return Err(Error::DeadlineExceeded { stage: stage.to_string() });
		}

		Ok(())
	}

	pub async fn run<T, F>(&self, stage: &str, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		self.check(stage)?;

		let bounded = async {
			match self.deadline {
				Some(deadline) => tokio::time::timeout_at(deadline, fut)
					.await
					.map_err(|_| Error::DeadlineExceeded { stage: stage.to_string() })?,
				None => fut.await,
			}
		};

		tokio::select! {
			biased;
			_ = self.token.cancelled() => Err(Error::Cancelled { stage: stage.to_string() }),
			result = bounded => result,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn cancelled_token_short_circuits() {
		let token = CancellationToken::new();
		let ctx = ExecutionContext::new(token.clone(), None);

		token.cancel();

		let err = ctx.run("semantic", async { Ok(1) }).await.expect_err("Expected cancellation.");

		assert!(matches!(err, Error::Cancelled { .. }));
	}

	#[tokio::test]
	async fn deadline_bounds_slow_calls() {
		let ctx = ExecutionContext::with_timeout(
			CancellationToken::new(),
			Some(Duration::from_millis(10)),
		);
		let err = ctx
			.run("fetch", async {
				tokio::time::sleep(Duration::from_secs(5)).await;

				Ok(())
			})
			.await
			.expect_err("Expected deadline expiry.");

		assert!(matches!(err, Error::DeadlineExceeded { ref stage } if stage == "fetch"));
	}

	#[tokio::test]
	async fn completed_calls_pass_through() {
		let ctx = ExecutionContext::default();

		assert_eq!(ctx.run("llm", async { Ok(7) }).await.expect("Call must succeed."), 7);
	}
}
