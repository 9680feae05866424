use crate::constants::file_server as file_server_constants;
use crate::errors::AirgapError;
use crate::services::logger::Logger;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A blueprint plus its inputs, installed and uninstalled as one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deployment {
    pub name: String,
    pub blueprint_path: PathBuf,
    pub inputs: Value,
    pub task_retries: u32,
    pub task_retry_interval: Duration,
    /// Output holding the address of the machine the deployment created.
    pub address_output: String,
}

impl Deployment {
    pub fn new(name: impl Into<String>, blueprint_path: impl Into<PathBuf>, inputs: Value) -> Self {
        Self {
            name: name.into(),
            blueprint_path: blueprint_path.into(),
            inputs,
            task_retries: file_server_constants::TASK_RETRIES,
            task_retry_interval: Duration::from_secs(
                file_server_constants::TASK_RETRY_INTERVAL_SECS,
            ),
            address_output: file_server_constants::ADDRESS_OUTPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionedVm {
    pub address: String,
    pub outputs: Value,
}

/// Brings deployments up and down. `uninstall` must be safe to call after a
/// partially failed `install`.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    async fn install(&self, deployment: &Deployment) -> Result<ProvisionedVm, AirgapError>;
    async fn uninstall(&self, deployment: &Deployment) -> Result<(), AirgapError>;
}

pub fn address_from_outputs(outputs: &Value, key: &str) -> Result<String, AirgapError> {
    outputs
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AirgapError::provisioning(format!("Deployment outputs are missing '{}'", key))
                .with_details(outputs.clone())
        })
}

/// Drives a local-workflow CLI (`<program> local init|execute|outputs`).
/// Each deployment gets its own working directory so their local state
/// never mixes.
#[derive(Clone)]
pub struct CliProvisioner {
    logger: Logger,
    program: String,
    workdir: PathBuf,
}

impl CliProvisioner {
    pub fn new(logger: Logger, program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            logger: logger.child("provision"),
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    /// The CLI runs inside the deployment dir, so every path handed to it is
    /// resolved against the caller's working directory first.
    fn deployment_dir(&self, deployment: &Deployment) -> Result<PathBuf, AirgapError> {
        absolute_path(&self.workdir.join(&deployment.name))
    }

    /// Bare names are left to `PATH` lookup; anything with a separator is
    /// anchored like the other paths.
    fn program(&self) -> Result<PathBuf, AirgapError> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            absolute_path(program)
        } else {
            Ok(program.to_path_buf())
        }
    }

    async fn run(&self, cwd: &Path, args: &[String]) -> Result<String, AirgapError> {
        self.logger.info(
            &format!("Running {} {}", self.program, args.join(" ")),
            Some(&serde_json::json!({"cwd": cwd.display().to_string()})),
        );
        let output = tokio::process::Command::new(self.program()?)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|err| {
                AirgapError::provisioning(format!("Failed to run {}: {}", self.program, err))
                    .with_hint("Check provisioner.program in the configuration.")
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(AirgapError::provisioning(format!(
                "{} {} exited with {}",
                self.program,
                args.first().map(String::as_str).unwrap_or(""),
                output.status
            ))
            .with_details(serde_json::json!({"stdout": stdout, "stderr": stderr})));
        }
        Ok(stdout)
    }

    fn workflow_args(deployment: &Deployment, workflow: &str) -> Vec<String> {
        vec![
            "local".to_string(),
            "execute".to_string(),
            "-w".to_string(),
            workflow.to_string(),
            "--task-retries".to_string(),
            deployment.task_retries.to_string(),
            "--task-retry-interval".to_string(),
            deployment.task_retry_interval.as_secs().to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Provisioner for CliProvisioner {
    async fn install(&self, deployment: &Deployment) -> Result<ProvisionedVm, AirgapError> {
        let dir = self.deployment_dir(deployment)?;
        let blueprint_path = absolute_path(&deployment.blueprint_path)?;
        tokio::fs::create_dir_all(&dir).await?;
        let inputs_path = dir.join("inputs.json");
        tokio::fs::write(&inputs_path, serde_json::to_vec_pretty(&deployment.inputs)?).await?;

        self.logger.info(
            "Initializing deployment env",
            Some(&serde_json::json!({"deployment": deployment.name})),
        );
        self.run(
            &dir,
            &[
                "local".to_string(),
                "init".to_string(),
                "-p".to_string(),
                blueprint_path.display().to_string(),
                "-i".to_string(),
                inputs_path.display().to_string(),
            ],
        )
        .await?;
        self.run(&dir, &Self::workflow_args(deployment, "install"))
            .await?;

        let raw = self
            .run(&dir, &["local".to_string(), "outputs".to_string()])
            .await?;
        let outputs = parse_outputs(&raw)?;
        let address = address_from_outputs(&outputs, &deployment.address_output)?;
        Ok(ProvisionedVm { address, outputs })
    }

    async fn uninstall(&self, deployment: &Deployment) -> Result<(), AirgapError> {
        let dir = self.deployment_dir(deployment)?;
        if !dir.exists() {
            self.logger.warn(
                "Deployment was never initialized, nothing to uninstall",
                Some(&serde_json::json!({"deployment": deployment.name})),
            );
            return Ok(());
        }
        self.run(&dir, &Self::workflow_args(deployment, "uninstall"))
            .await?;
        Ok(())
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf, AirgapError> {
    std::path::absolute(path).map_err(|err| {
        AirgapError::provisioning(format!(
            "Failed to resolve {} against the working directory: {}",
            path.display(),
            err
        ))
    })
}

/// The CLI may print log lines around the JSON outputs document.
fn parse_outputs(raw: &str) -> Result<Value, AirgapError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(AirgapError::provisioning("Deployment outputs are not JSON")
            .with_details(serde_json::json!({"stdout": raw})));
    };
    if end < start {
        return Err(AirgapError::provisioning("Deployment outputs are not JSON"));
    }
    serde_json::from_str(&raw[start..=end]).map_err(|err| {
        AirgapError::provisioning(format!("Deployment outputs are not JSON: {}", err))
    })
}
