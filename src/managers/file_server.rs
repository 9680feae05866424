use crate::constants::{file_server as file_server_constants, network as network_constants};
use crate::constants::retry as retry_constants;
use crate::errors::AirgapError;
use crate::managers::mirror::{
    MirrorPolicy, MirroredResource, RemoteCurlDownloader, ResourceMirror, ResourceTree,
};
use crate::managers::provision::{Deployment, ProvisionedVm, Provisioner};
use crate::managers::readiness::{ReadinessPoller, ReadinessPolicy, ReadyReport};
use crate::managers::remote::{
    CommandSpec, Credentials, RemoteExecutor, RemoteSession, RetryBudget,
};
use crate::services::logger::Logger;
use crate::utils::shell::quote;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileServerState {
    Created,
    Booted,
    Ready,
    Serving,
    Stopped,
    TornDown,
}

#[derive(Debug, Clone)]
pub struct FileServerSettings {
    pub deployment: Deployment,
    pub port: u16,
    pub ssh_user: String,
    pub key_path: PathBuf,
    pub ssh_timeout: Duration,
    pub connection_attempts: u32,
    /// Directory on the VM that resources are staged in and served from.
    pub staging_dir: String,
    pub server_command: String,
    pub prerequisite_command: Option<String>,
    pub prerequisite_retries: u32,
    pub command_retry_interval: Duration,
    pub confirm_retries: u32,
    pub confirm_interval: Duration,
    pub readiness: ReadinessPolicy,
    pub mirror: MirrorPolicy,
}

impl FileServerSettings {
    pub fn new(deployment: Deployment, key_path: impl Into<PathBuf>) -> Self {
        let port = file_server_constants::PORT;
        Self {
            deployment,
            port,
            ssh_user: network_constants::SSH_DEFAULT_USER.to_string(),
            key_path: key_path.into(),
            ssh_timeout: Duration::from_secs(network_constants::TIMEOUT_SSH_CONNECT_SECS),
            connection_attempts: network_constants::SSH_CONNECTION_ATTEMPTS,
            staging_dir: file_server_constants::STAGING_DIR.to_string(),
            server_command: default_server_command(port),
            prerequisite_command: Some(file_server_constants::PREREQUISITE_COMMAND.to_string()),
            prerequisite_retries: retry_constants::PREREQUISITE_RETRIES,
            command_retry_interval: Duration::from_secs(
                retry_constants::COMMAND_RETRY_INTERVAL_SECS,
            ),
            confirm_retries: retry_constants::SERVER_CONFIRM_RETRIES,
            confirm_interval: Duration::from_secs(retry_constants::SERVER_CONFIRM_INTERVAL_SECS),
            readiness: ReadinessPolicy::default(),
            mirror: MirrorPolicy::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        if self.server_command == default_server_command(self.port) {
            self.server_command = default_server_command(port);
        }
        self.port = port;
        self
    }
}

pub fn default_server_command(port: u16) -> String {
    format!("python -m SimpleHTTPServer {}", port)
}

/// A `pgrep`/`pkill -f` pattern for `command` that does not match the shell
/// running the lookup, whose own command line contains the pattern text.
pub fn process_pattern(command: &str) -> String {
    let mut chars = command.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            format!("[{}]{}", first, chars.as_str())
        }
        _ => command.to_string(),
    }
}

/// What the file server exposes once it is serving.
#[derive(Debug, Clone, Serialize)]
pub struct ServedResources {
    pub publish_authority: String,
    pub inputs: ResourceTree,
    pub resources: Vec<MirroredResource>,
}

impl ServedResources {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.publish_authority)
    }
}

/// Lifecycle of the helper VM that serves mirrored resources.
///
/// `boot -> await_ready -> mirror_resources -> stop -> teardown`. Once `boot`
/// has been called, `teardown` runs exactly once: explicitly, through
/// [`FileServer::scoped`], or from `Drop` on a background task when the
/// owner is dropped (for example a cancelled future).
pub struct FileServer {
    logger: Logger,
    settings: FileServerSettings,
    provisioner: Arc<dyn Provisioner>,
    executor: Arc<RemoteExecutor>,
    state: FileServerState,
    vm: Option<ProvisionedVm>,
    session: Option<RemoteSession>,
    served: Option<ServedResources>,
    needs_teardown: bool,
}

impl FileServer {
    pub fn new(
        logger: Logger,
        settings: FileServerSettings,
        provisioner: Arc<dyn Provisioner>,
        executor: Arc<RemoteExecutor>,
    ) -> Self {
        Self {
            logger: logger.child("file_server"),
            settings,
            provisioner,
            executor,
            state: FileServerState::Created,
            vm: None,
            session: None,
            served: None,
            needs_teardown: false,
        }
    }

    pub fn state(&self) -> FileServerState {
        self.state
    }

    pub fn served(&self) -> Option<&ServedResources> {
        self.served.as_ref()
    }

    pub fn session(&self) -> Option<&RemoteSession> {
        self.session.as_ref()
    }

    fn expect_state(&self, expected: FileServerState, operation: &str) -> Result<(), AirgapError> {
        if self.state == expected {
            return Ok(());
        }
        Err(AirgapError::internal(format!(
            "Cannot {} while the file server is {:?} (expected {:?})",
            operation, self.state, expected
        )))
    }

    fn require_session(&self) -> Result<&RemoteSession, AirgapError> {
        self.session
            .as_ref()
            .ok_or_else(|| AirgapError::internal("File server has no session; boot it first"))
    }

    fn publish_authority(&self) -> Result<String, AirgapError> {
        let vm = self
            .vm
            .as_ref()
            .ok_or_else(|| AirgapError::internal("File server has no address; boot it first"))?;
        Ok(format!("{}:{}", vm.address, self.settings.port))
    }

    pub async fn boot(&mut self) -> Result<(), AirgapError> {
        self.expect_state(FileServerState::Created, "boot")?;
        self.needs_teardown = true;
        self.logger.info(
            "Starting up a file server vm",
            Some(&serde_json::json!({"deployment": self.settings.deployment.name})),
        );
        let vm = self.provisioner.install(&self.settings.deployment).await?;
        let session = RemoteSession::new(
            vm.address.clone(),
            self.settings.ssh_user.clone(),
            Credentials::key_file(self.settings.key_path.clone()),
        )
        .with_timeout(self.settings.ssh_timeout)
        .with_connection_attempts(self.settings.connection_attempts);
        self.logger.info(
            "File server vm is up",
            Some(&serde_json::json!({"address": vm.address})),
        );
        self.session = Some(session);
        self.vm = Some(vm);
        self.state = FileServerState::Booted;
        Ok(())
    }

    pub async fn await_ready(&mut self) -> Result<ReadyReport, AirgapError> {
        self.expect_state(FileServerState::Booted, "await readiness")?;
        let poller = ReadinessPoller::new(self.logger.clone(), self.executor.clone());
        let report = poller
            .wait_until_ready(self.require_session()?, &self.settings.readiness)
            .await?;
        self.state = FileServerState::Ready;
        Ok(report)
    }

    /// Mirrors `tree` onto the VM and starts serving it.
    pub async fn mirror_resources(
        &mut self,
        tree: &ResourceTree,
    ) -> Result<&ServedResources, AirgapError> {
        self.expect_state(FileServerState::Ready, "mirror resources")?;
        let session = self.require_session()?.clone();
        let authority = self.publish_authority()?;
        let downloader = RemoteCurlDownloader::new(self.executor.clone(), session.clone());
        let mirror = ResourceMirror::new(
            self.logger.clone(),
            Arc::new(downloader),
            self.settings.mirror,
        );
        let outcome = mirror
            .mirror(tree, Path::new(&self.settings.staging_dir), &authority)
            .await?;
        self.run(&session).await?;
        self.state = FileServerState::Serving;
        Ok(self.served.insert(ServedResources {
            publish_authority: authority,
            inputs: outcome.tree,
            resources: outcome.resources,
        }))
    }

    async fn run(&self, session: &RemoteSession) -> Result<(), AirgapError> {
        let retry_interval = self.settings.command_retry_interval;
        if let Some(prerequisite) = self.settings.prerequisite_command.as_deref() {
            self.executor
                .execute_with_retries(
                    session,
                    &CommandSpec::new(prerequisite).elevated(),
                    RetryBudget::retries(self.settings.prerequisite_retries)
                        .with_interval(retry_interval),
                )
                .await?;
        }

        self.logger.info(
            &format!("Starting up the file server on port {}", self.settings.port),
            None,
        );
        let staging = quote(&self.settings.staging_dir);
        self.executor
            .execute(
                session,
                &CommandSpec::new(format!(
                    "mkdir -p {dir} && cd {dir} && screen -dm {cmd}",
                    dir = staging,
                    cmd = self.settings.server_command
                ))
                .without_pty(),
            )
            .await?;

        let confirm = CommandSpec::new(format!(
            "pgrep -f {}",
            quote(&process_pattern(&self.settings.server_command))
        ));
        self.executor
            .execute_with_retries(
                session,
                &confirm,
                RetryBudget::retries(self.settings.confirm_retries)
                    .with_interval(self.settings.confirm_interval),
            )
            .await
            .map_err(|err| {
                err.with_hint("The file server process did not come up on the vm.")
            })?;
        Ok(())
    }

    /// Kills the server process. Failures are logged and ignored.
    pub async fn stop(&mut self) {
        if self.state != FileServerState::Serving {
            self.logger.debug(
                "stop skipped",
                Some(&serde_json::json!({"state": self.state})),
            );
            return;
        }
        self.logger.info("Shutting down the file server", None);
        let stop = CommandSpec::new(format!(
            "pkill -9 -f {}",
            quote(&process_pattern(&self.settings.server_command))
        ))
        .warn_only();
        let outcome = match self.session.as_ref() {
            Some(session) => self.executor.execute(session, &stop).await,
            None => Err(AirgapError::internal("File server has no session")),
        };
        match outcome {
            Ok(result) if !result.succeeded() => self.logger.warn(
                "Stopping the file server reported a failure",
                Some(&serde_json::json!({"exit_status": result.exit_status})),
            ),
            Ok(_) => {}
            Err(err) => self.logger.warn(
                "Failed to stop the file server",
                Some(&serde_json::json!({"error": err})),
            ),
        }
        self.state = FileServerState::Stopped;
    }

    /// Deprovisions the VM. Runs at most once per boot; later calls and calls
    /// before `boot` do nothing.
    pub async fn teardown(&mut self) -> Result<(), AirgapError> {
        if !self.needs_teardown {
            return Ok(());
        }
        self.needs_teardown = false;
        self.state = FileServerState::TornDown;
        self.logger.info(
            "Tearing down file server vm",
            Some(&serde_json::json!({"deployment": self.settings.deployment.name})),
        );
        self.provisioner.uninstall(&self.settings.deployment).await
    }

    /// Runs the whole lifecycle around `body`.
    ///
    /// On success the server is stopped before teardown. On any error the VM
    /// is torn down straight away and the first error is returned.
    pub async fn scoped<F, Fut, T>(
        mut self,
        tree: &ResourceTree,
        body: F,
    ) -> Result<T, AirgapError>
    where
        F: FnOnce(ServedResources) -> Fut,
        Fut: Future<Output = Result<T, AirgapError>>,
    {
        let outcome = self.serve_then(tree, body).await;
        match outcome {
            Ok(value) => {
                self.stop().await;
                self.teardown().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(teardown_err) = self.teardown().await {
                    self.logger.error(
                        "Teardown after a failure also failed",
                        Some(&serde_json::json!({
                            "error": err.message,
                            "teardown_error": teardown_err,
                        })),
                    );
                }
                Err(err)
            }
        }
    }

    async fn serve_then<F, Fut, T>(&mut self, tree: &ResourceTree, body: F) -> Result<T, AirgapError>
    where
        F: FnOnce(ServedResources) -> Fut,
        Fut: Future<Output = Result<T, AirgapError>>,
    {
        self.boot().await?;
        self.await_ready().await?;
        let served = self.mirror_resources(tree).await?.clone();
        body(served).await
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if !self.needs_teardown {
            return;
        }
        self.needs_teardown = false;
        let provisioner = self.provisioner.clone();
        let deployment = self.settings.deployment.clone();
        let logger = self.logger.clone();
        logger.warn(
            "File server dropped before teardown; tearing down in the background",
            Some(&serde_json::json!({"deployment": deployment.name, "state": self.state})),
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = provisioner.uninstall(&deployment).await {
                        logger.error(
                            "Background teardown failed",
                            Some(&serde_json::json!({"error": err})),
                        );
                    }
                });
            }
            Err(_) => logger.error(
                "No async runtime available; file server vm was not torn down",
                Some(&serde_json::json!({"deployment": deployment.name})),
            ),
        }
    }
}
