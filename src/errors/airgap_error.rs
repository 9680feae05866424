use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirgapErrorKind {
    /// The host refused or timed out the connection; it may still be booting.
    ConnectionNotReady,
    /// The remote command ran and exited nonzero.
    CommandExecution,
    Download,
    Provisioning,
    InvalidParams,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AirgapError {
    pub kind: AirgapErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl AirgapError {
    pub fn new(
        kind: AirgapErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(
                kind,
                AirgapErrorKind::ConnectionNotReady | AirgapErrorKind::Timeout
            ),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn connection_not_ready(message: impl Into<String>) -> Self {
        Self::new(
            AirgapErrorKind::ConnectionNotReady,
            "CONNECTION_NOT_READY",
            message,
        )
    }

    pub fn command_execution(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::CommandExecution, "COMMAND_FAILED", message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::Download, "DOWNLOAD_FAILED", message)
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::Provisioning, "PROVISIONING_FAILED", message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AirgapErrorKind::Internal, "INTERNAL", message)
    }

    pub fn is_connection_not_ready(&self) -> bool {
        self.kind == AirgapErrorKind::ConnectionNotReady
    }

    pub fn is_command_failure(&self) -> bool {
        self.kind == AirgapErrorKind::CommandExecution
    }
}

impl fmt::Display for AirgapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for AirgapError {}

impl From<std::io::Error> for AirgapError {
    fn from(err: std::io::Error) -> Self {
        AirgapError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for AirgapError {
    fn from(err: serde_json::Error) -> Self {
        AirgapError::invalid_params(format!("Invalid JSON document: {}", err))
    }
}

impl From<serde_yaml::Error> for AirgapError {
    fn from(err: serde_yaml::Error) -> Self {
        AirgapError::invalid_params(format!("Invalid YAML document: {}", err))
    }
}
