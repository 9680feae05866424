use crate::constants::{
    file_server as file_server_constants, network as network_constants,
    readiness as readiness_constants, retry as retry_constants,
};
use crate::errors::AirgapError;
use crate::managers::file_server::{default_server_command, FileServerSettings};
use crate::managers::mirror::MirrorPolicy;
use crate::managers::provision::Deployment;
use crate::managers::readiness::ReadinessPolicy;
use crate::managers::remote::RemoteSession;
use crate::utils::user_paths::expand_home_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const KEY_PAIR_INPUT: &str = "key_pair_path";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AirgapConfig {
    pub file_server: FileServerSection,
    pub readiness: ReadinessSection,
    pub mirror: MirrorSection,
    pub provisioner: ProvisionerSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_host: Option<ControlHostSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileServerSection {
    pub deployment_name: String,
    pub blueprint: PathBuf,
    /// Passed to the provisioner as the deployment inputs.
    pub inputs: Value,
    /// Falls back to the `key_pair_path` input.
    pub key_path: Option<PathBuf>,
    pub ssh_user: String,
    pub ssh_timeout_secs: u64,
    pub connection_attempts: u32,
    pub port: u16,
    pub staging_dir: String,
    pub server_command: Option<String>,
    pub prerequisite_command: Option<String>,
    pub prerequisite_retries: u32,
    pub command_retry_interval_secs: u64,
    pub task_retries: u32,
    pub task_retry_interval_secs: u64,
    pub address_output: String,
}

impl Default for FileServerSection {
    fn default() -> Self {
        Self {
            deployment_name: file_server_constants::DEPLOYMENT_NAME.to_string(),
            blueprint: PathBuf::from(file_server_constants::BLUEPRINT),
            inputs: Value::Object(serde_json::Map::new()),
            key_path: None,
            ssh_user: network_constants::SSH_DEFAULT_USER.to_string(),
            ssh_timeout_secs: network_constants::TIMEOUT_SSH_CONNECT_SECS,
            connection_attempts: network_constants::SSH_CONNECTION_ATTEMPTS,
            port: file_server_constants::PORT,
            staging_dir: file_server_constants::STAGING_DIR.to_string(),
            server_command: None,
            prerequisite_command: Some(file_server_constants::PREREQUISITE_COMMAND.to_string()),
            prerequisite_retries: retry_constants::PREREQUISITE_RETRIES,
            command_retry_interval_secs: retry_constants::COMMAND_RETRY_INTERVAL_SECS,
            task_retries: file_server_constants::TASK_RETRIES,
            task_retry_interval_secs: file_server_constants::TASK_RETRY_INTERVAL_SECS,
            address_output: file_server_constants::ADDRESS_OUTPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSection {
    pub probe_command: String,
    pub max_retries: u32,
    pub interval_secs: u64,
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            probe_command: readiness_constants::PROBE_COMMAND.to_string(),
            max_retries: readiness_constants::MAX_RETRIES,
            interval_secs: readiness_constants::INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSection {
    pub download_retries: u32,
    pub retry_interval_secs: u64,
    /// Per-request timeout of the local HTTP downloader.
    pub http_timeout_secs: u64,
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            download_retries: retry_constants::DOWNLOAD_RETRIES,
            retry_interval_secs: retry_constants::COMMAND_RETRY_INTERVAL_SECS,
            http_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerSection {
    pub program: String,
    /// Parent directory of the per-deployment local environments.
    pub workdir: PathBuf,
}

impl Default for ProvisionerSection {
    fn default() -> Self {
        Self {
            program: "cfy".to_string(),
            workdir: PathBuf::from(".airgap"),
        }
    }
}

/// The machine the offline install runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlHostSection {
    pub session: RemoteSession,
    pub inputs_path: String,
    pub blueprint_path: String,
    #[serde(default = "default_check_host")]
    pub check_host: String,
    /// Endpoint whose address is pinned in `/etc/hosts` once DNS is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iaas_url: Option<String>,
    #[serde(default = "default_true")]
    pub assert_offline: bool,
}

fn default_check_host() -> String {
    network_constants::OFFLINE_CHECK_HOST.to_string()
}

fn default_true() -> bool {
    true
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}

impl AirgapConfig {
    /// Reads a JSON or YAML file (by extension, YAML otherwise) and applies
    /// the `AIRGAP_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, AirgapError> {
        let path = expand_home_path(path);
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            AirgapError::invalid_params(format!(
                "Failed to read config {}: {}",
                path.display(),
                err
            ))
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_yaml_str(&raw)?
        };
        Ok(config.with_env_overrides())
    }

    pub fn from_json_str(raw: &str) -> Result<Self, AirgapError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, AirgapError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_parse("AIRGAP_READINESS_RETRIES") {
            self.readiness.max_retries = value;
        }
        if let Some(value) = env_parse("AIRGAP_READINESS_INTERVAL_SECS") {
            self.readiness.interval_secs = value;
        }
        if let Some(value) = env_parse("AIRGAP_FILE_SERVER_PORT") {
            self.file_server.port = value;
        }
        if let Some(value) = env_parse("AIRGAP_DOWNLOAD_RETRIES") {
            self.mirror.download_retries = value;
        }
        self
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            probe_command: self.readiness.probe_command.clone(),
            max_retries: self.readiness.max_retries,
            interval: Duration::from_secs(self.readiness.interval_secs),
        }
    }

    pub fn mirror_policy(&self) -> MirrorPolicy {
        MirrorPolicy {
            download_retries: self.mirror.download_retries,
            retry_interval: Duration::from_secs(self.mirror.retry_interval_secs),
        }
    }

    pub fn deployment(&self) -> Deployment {
        let section = &self.file_server;
        let mut deployment = Deployment::new(
            section.deployment_name.clone(),
            expand_home_path(&section.blueprint),
            section.inputs.clone(),
        );
        deployment.task_retries = section.task_retries;
        deployment.task_retry_interval = Duration::from_secs(section.task_retry_interval_secs);
        deployment.address_output = section.address_output.clone();
        deployment
    }

    fn key_path(&self) -> Result<PathBuf, AirgapError> {
        if let Some(path) = self.file_server.key_path.as_ref() {
            return Ok(path.clone());
        }
        self.file_server
            .inputs
            .get(KEY_PAIR_INPUT)
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                AirgapError::invalid_params("file_server.key_path is required")
                    .with_hint("Set file_server.key_path or the key_pair_path input.")
            })
    }

    pub fn file_server_settings(&self) -> Result<FileServerSettings, AirgapError> {
        let section = &self.file_server;
        let mut settings = FileServerSettings::new(self.deployment(), self.key_path()?);
        settings.port = section.port;
        settings.ssh_user = section.ssh_user.clone();
        settings.ssh_timeout = Duration::from_secs(section.ssh_timeout_secs);
        settings.connection_attempts = section.connection_attempts;
        settings.staging_dir = section.staging_dir.clone();
        settings.server_command = section
            .server_command
            .clone()
            .unwrap_or_else(|| default_server_command(section.port));
        settings.prerequisite_command = section
            .prerequisite_command
            .clone()
            .filter(|cmd| !cmd.trim().is_empty());
        settings.prerequisite_retries = section.prerequisite_retries;
        settings.command_retry_interval = Duration::from_secs(section.command_retry_interval_secs);
        settings.readiness = self.readiness_policy();
        settings.mirror = self.mirror_policy();
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::AirgapConfig;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = AirgapConfig::from_yaml_str("").expect("config");
        assert_eq!(config.readiness.max_retries, 10);
        assert_eq!(config.readiness.interval_secs, 30);
        assert_eq!(config.file_server.port, 8080);
        assert_eq!(config.mirror.download_retries, 2);
        assert!(config.control_host.is_none());
    }

    #[test]
    fn key_path_falls_back_to_inputs() {
        let config = AirgapConfig::from_yaml_str(
            "file_server:\n  inputs:\n    key_pair_path: /tmp/fs.pem\n  port: 9000\n",
        )
        .expect("config");
        let settings = config.file_server_settings().expect("settings");
        assert_eq!(settings.key_path.to_str(), Some("/tmp/fs.pem"));
        assert_eq!(settings.server_command, "python -m SimpleHTTPServer 9000");
        assert_eq!(settings.deployment.task_retries, 40);
    }

    #[test]
    fn missing_key_path_is_rejected() {
        let config = AirgapConfig::default();
        let err = config.file_server_settings().expect_err("no key");
        assert_eq!(err.code, "INVALID_PARAMS");
    }
}
