use crate::constants::readiness as readiness_constants;
use crate::errors::AirgapError;
use crate::managers::remote::{CommandSpec, RemoteExecutor, RemoteSession};
use crate::services::logger::Logger;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub probe_command: String,
    /// Probes after the first one; `max_retries = N` allows N + 1 probes.
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            probe_command: readiness_constants::PROBE_COMMAND.to_string(),
            max_retries: readiness_constants::MAX_RETRIES,
            interval: Duration::from_secs(readiness_constants::INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadyReport {
    pub attempts: u32,
}

/// Waits for a freshly booted machine to accept SSH logins.
#[derive(Clone)]
pub struct ReadinessPoller {
    logger: Logger,
    executor: Arc<RemoteExecutor>,
}

impl ReadinessPoller {
    pub fn new(logger: Logger, executor: Arc<RemoteExecutor>) -> Self {
        Self {
            logger: logger.child("readiness"),
            executor,
        }
    }

    /// Probes `session` until it answers. Only `ConnectionNotReady` failures
    /// are retried; a probe that connects but fails is returned as is. On
    /// exhaustion the last connection error is returned.
    pub async fn wait_until_ready(
        &self,
        session: &RemoteSession,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyReport, AirgapError> {
        self.logger.info(
            "Waiting for ssh key to register on the vm...",
            Some(&serde_json::json!({"target": session.label()})),
        );
        let probe = CommandSpec::new(policy.probe_command.clone());
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            match self.executor.execute(session, &probe).await {
                Ok(_) => {
                    self.logger.info(
                        "Machine is ready to be logged in...",
                        Some(&serde_json::json!({"attempts": attempts})),
                    );
                    return Ok(ReadyReport { attempts });
                }
                Err(err) if !err.is_connection_not_ready() => return Err(err),
                Err(err) if attempts > policy.max_retries => {
                    self.logger.error(
                        "Machine did not become ready",
                        Some(&serde_json::json!({
                            "target": session.label(),
                            "attempts": attempts,
                            "error": err.message,
                        })),
                    );
                    return Err(err.with_hint(format!(
                        "{} did not accept SSH logins after {} attempts.",
                        session.label(),
                        attempts
                    )));
                }
                Err(err) => {
                    self.logger.info(
                        &format!(
                            "Machine is not yet ready, waiting for {} secs and trying again",
                            policy.interval.as_secs()
                        ),
                        Some(&serde_json::json!({"attempt": attempts, "error": err.message})),
                    );
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
}
