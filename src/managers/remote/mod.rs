use crate::constants::limits;
use crate::errors::AirgapError;
use crate::services::logger::Logger;
use crate::utils::redact::{loggable_command, redact_output};
use crate::utils::shell::elevate;
use std::sync::Arc;

mod retry;
mod session;
mod ssh;
mod transport;

pub use retry::RetryBudget;
pub use session::{Credentials, RemoteSession};
pub use ssh::SshTransport;
pub use transport::{CommandResult, ExecRequest, RemoteTransport};

/// Per-call options for [`RemoteExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub elevate: bool,
    pub pty: bool,
    pub warn_only: bool,
    /// Keeps the command text out of logs and error messages.
    pub sensitive: bool,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            elevate: false,
            pty: true,
            warn_only: false,
            sensitive: false,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn without_pty(mut self) -> Self {
        self.pty = false;
        self
    }

    pub fn warn_only(mut self) -> Self {
        self.warn_only = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn label(&self) -> &str {
        loggable_command(&self.command, self.sensitive)
    }
}

/// Runs single commands on remote hosts and classifies the outcome.
///
/// A command that exits nonzero fails with a `CommandExecution` error unless
/// the spec is `warn_only`. Connection problems come back from the transport
/// as `ConnectionNotReady`. Nothing here retries; see [`RetryBudget`] and
/// [`crate::managers::readiness::ReadinessPoller`].
#[derive(Clone)]
pub struct RemoteExecutor {
    logger: Logger,
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteExecutor {
    pub fn new(logger: Logger, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            logger: logger.child("remote"),
            transport,
        }
    }

    pub fn transport(&self) -> Arc<dyn RemoteTransport> {
        self.transport.clone()
    }

    pub async fn execute(
        &self,
        session: &RemoteSession,
        spec: &CommandSpec,
    ) -> Result<CommandResult, AirgapError> {
        self.logger.info(
            &format!("Executing command: {}", spec.label()),
            Some(&serde_json::json!({"target": session.label()})),
        );
        let request = build_request(session, spec);
        let result = self.transport.exec(session, &request).await?;
        self.log_result(&result);
        if !result.succeeded() && !spec.warn_only {
            return Err(command_failure(spec, &result, 1));
        }
        Ok(result)
    }

    pub async fn read_file(
        &self,
        session: &RemoteSession,
        path: &str,
    ) -> Result<Vec<u8>, AirgapError> {
        self.logger.info(
            &format!("Retrieving remote file {}", path),
            Some(&serde_json::json!({"target": session.label()})),
        );
        self.transport.read_file(session, path).await
    }

    pub async fn write_file(
        &self,
        session: &RemoteSession,
        path: &str,
        content: &[u8],
    ) -> Result<(), AirgapError> {
        self.logger.info(
            &format!("Writing remote file {}", path),
            Some(&serde_json::json!({"target": session.label(), "bytes": content.len()})),
        );
        self.transport.write_file(session, path, content).await
    }

    fn log_result(&self, result: &CommandResult) {
        let max = limits::MAX_LOGGED_OUTPUT_BYTES;
        self.logger.info(
            &format!(
                "Command execution result:\n    Status code: {}\n    STDOUT:\n    {}\n    STDERR:\n    {}",
                result.exit_status,
                redact_output(&result.stdout, max),
                redact_output(&result.stderr, max)
            ),
            None,
        );
    }
}

fn build_request(session: &RemoteSession, spec: &CommandSpec) -> ExecRequest {
    let elevated = spec.elevate || session.elevate;
    let command = if elevated {
        elevate(&spec.command)
    } else {
        spec.command.clone()
    };
    let stdin = if elevated {
        session
            .credentials
            .password()
            .map(|password| format!("{}\n", password).into_bytes())
    } else {
        None
    };
    ExecRequest {
        command,
        pty: spec.pty,
        stdin,
    }
}

pub(crate) fn command_failure(
    spec: &CommandSpec,
    result: &CommandResult,
    attempts: u32,
) -> AirgapError {
    let max = limits::MAX_LOGGED_OUTPUT_BYTES;
    AirgapError::command_execution(format!(
        "Command: {} exited with code: {}. Tried {} times.",
        spec.label(),
        result.exit_status,
        attempts
    ))
    .with_details(serde_json::json!({
        "exit_status": result.exit_status,
        "stdout": redact_output(&result.stdout, max),
        "stderr": redact_output(&result.stderr, max),
        "attempts": attempts,
    }))
}
