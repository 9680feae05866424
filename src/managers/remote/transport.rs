use super::RemoteSession;
use crate::errors::AirgapError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub pty: bool,
    pub stdin: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout followed by stderr, the way a terminal would show both.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Remote shell access to one machine at a time.
///
/// Implementations must report failures to establish or authenticate the
/// session as [`AirgapError::connection_not_ready`] and return a
/// [`CommandResult`] (not an error) when the command ran and exited nonzero.
#[async_trait::async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn exec(
        &self,
        session: &RemoteSession,
        request: &ExecRequest,
    ) -> Result<CommandResult, AirgapError>;

    async fn read_file(&self, session: &RemoteSession, path: &str)
        -> Result<Vec<u8>, AirgapError>;

    async fn write_file(
        &self,
        session: &RemoteSession,
        path: &str,
        content: &[u8],
    ) -> Result<(), AirgapError>;
}
