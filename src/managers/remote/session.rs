use crate::constants::network as network_constants;
use crate::utils::user_paths::expand_home_path;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    KeyFile {
        #[serde(deserialize_with = "deserialize_key_path")]
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    Password {
        password: String,
    },
    Agent,
}

impl Credentials {
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credentials::KeyFile {
            path: expand_home_path(path.into()),
            passphrase: None,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            Credentials::Password { password } => Some(password),
            _ => None,
        }
    }
}

fn deserialize_key_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    PathBuf::deserialize(deserializer).map(expand_home_path)
}

/// How to reach one machine. Built per logical operation and passed by
/// reference; nothing caches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    pub credentials: Credentials,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connection_attempts")]
    pub connection_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub elevate: bool,
}

fn default_port() -> u16 {
    network_constants::SSH_DEFAULT_PORT
}

fn default_user() -> String {
    network_constants::SSH_DEFAULT_USER.to_string()
}

fn default_timeout_secs() -> u64 {
    network_constants::TIMEOUT_SSH_CONNECT_SECS
}

fn default_connection_attempts() -> u32 {
    network_constants::SSH_CONNECTION_ATTEMPTS
}

impl RemoteSession {
    pub fn new(host: impl Into<String>, user: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            credentials,
            timeout_secs: default_timeout_secs(),
            connection_attempts: default_connection_attempts(),
            command_timeout_secs: None,
            elevate: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_connection_attempts(mut self, attempts: u32) -> Self {
        self.connection_attempts = attempts.max(1);
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.user, self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::{Credentials, RemoteSession};

    #[test]
    fn deserialize_applies_connection_defaults() {
        let session: RemoteSession = serde_json::from_value(serde_json::json!({
            "host": "10.0.0.5",
            "credentials": {"type": "key_file", "path": "/keys/fs.pem"}
        }))
        .expect("session");
        assert_eq!(session.port, 22);
        assert_eq!(session.user, "centos");
        assert_eq!(session.timeout_secs, 30);
        assert_eq!(session.connection_attempts, 10);
        assert!(!session.elevate);
        assert_eq!(session.label(), "centos@10.0.0.5:22");
    }

    #[test]
    fn only_password_credentials_expose_a_password() {
        let creds = Credentials::Password {
            password: "pw".to_string(),
        };
        assert_eq!(creds.password(), Some("pw"));
        assert_eq!(Credentials::Agent.password(), None);
    }
}
