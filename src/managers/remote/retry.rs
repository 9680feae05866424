use super::{command_failure, CommandResult, CommandSpec, RemoteExecutor, RemoteSession};
use crate::constants::retry as retry_constants;
use crate::errors::AirgapError;
use std::time::Duration;

/// Caller-requested retry budget for commands that exit nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub retries: u32,
    pub interval: Duration,
}

impl RetryBudget {
    pub fn none() -> Self {
        Self::retries(0)
    }

    pub fn retries(retries: u32) -> Self {
        Self {
            retries,
            interval: Duration::from_secs(retry_constants::COMMAND_RETRY_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl RemoteExecutor {
    /// Runs `spec`, retrying nonzero exits up to `budget.retries` times.
    ///
    /// Connection errors are returned immediately. A `warn_only` spec never
    /// fails on exit status: the last result is returned once the budget is
    /// spent.
    pub async fn execute_with_retries(
        &self,
        session: &RemoteSession,
        spec: &CommandSpec,
        budget: RetryBudget,
    ) -> Result<CommandResult, AirgapError> {
        let attempt_spec = CommandSpec {
            warn_only: true,
            ..spec.clone()
        };
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let result = self.execute(session, &attempt_spec).await?;
            if result.succeeded() {
                return Ok(result);
            }
            if attempts > budget.retries {
                if spec.warn_only {
                    return Ok(result);
                }
                return Err(command_failure(spec, &result, attempts));
            }
            self.logger.warn(
                &format!(
                    "Command failed, retrying in {} secs",
                    budget.interval.as_secs()
                ),
                Some(&serde_json::json!({
                    "command": spec.label(),
                    "exit_status": result.exit_status,
                    "attempt": attempts,
                    "retries_left": budget.retries.saturating_sub(attempts - 1),
                })),
            );
            tokio::time::sleep(budget.interval).await;
        }
    }
}
