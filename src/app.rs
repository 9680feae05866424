use crate::errors::AirgapError;
use crate::managers::file_server::{FileServer, ServedResources};
use crate::managers::mirror::{HttpDownloader, MirrorOutcome, ResourceMirror, ResourceTree};
use crate::managers::offline::{hosts_entry_for, OfflineDriver};
use crate::managers::provision::{CliProvisioner, Provisioner};
use crate::managers::readiness::ReadinessPoller;
use crate::managers::remote::{RemoteExecutor, RemoteTransport, SshTransport};
use crate::services::config::AirgapConfig;
use crate::services::logger::Logger;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    pub logger: Logger,
    pub config: AirgapConfig,
    pub executor: Arc<RemoteExecutor>,
    pub provisioner: Arc<dyn Provisioner>,
}

/// Result of an offline install run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ServeReport {
    pub served: ServedResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts_entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_inputs: Option<ResourceTree>,
}

impl App {
    pub fn new(config: AirgapConfig) -> Self {
        let logger = Logger::new("airgap");
        let transport: Arc<dyn RemoteTransport> = Arc::new(SshTransport::new(logger.clone()));
        let provisioner: Arc<dyn Provisioner> = Arc::new(CliProvisioner::new(
            logger.clone(),
            config.provisioner.program.clone(),
            config.provisioner.workdir.clone(),
        ));
        Self::with_parts(logger, config, transport, provisioner)
    }

    pub fn with_parts(
        logger: Logger,
        config: AirgapConfig,
        transport: Arc<dyn RemoteTransport>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let executor = Arc::new(RemoteExecutor::new(logger.clone(), transport));
        Self {
            logger,
            config,
            executor,
            provisioner,
        }
    }

    pub fn readiness(&self) -> ReadinessPoller {
        ReadinessPoller::new(self.logger.clone(), self.executor.clone())
    }

    pub fn offline(&self) -> OfflineDriver {
        OfflineDriver::new(self.logger.clone(), self.executor.clone()).with_retry_interval(
            Duration::from_secs(self.config.file_server.command_retry_interval_secs),
        )
    }

    pub fn file_server(&self) -> Result<FileServer, AirgapError> {
        Ok(FileServer::new(
            self.logger.clone(),
            self.config.file_server_settings()?,
            self.provisioner.clone(),
            self.executor.clone(),
        ))
    }

    /// Mirrors `tree` into a local directory over HTTP.
    pub async fn mirror_local(
        &self,
        tree: &ResourceTree,
        staging_root: &Path,
        publish_authority: &str,
    ) -> Result<MirrorOutcome, AirgapError> {
        let downloader = HttpDownloader::new(Duration::from_secs(
            self.config.mirror.http_timeout_secs,
        ))?;
        let mirror = ResourceMirror::new(
            self.logger.clone(),
            Arc::new(downloader),
            self.config.mirror_policy(),
        );
        mirror.mirror(tree, staging_root, publish_authority).await
    }

    /// Full offline install around the file server: prepares the control
    /// host (when configured), serves `resources`, and points the control
    /// host's inputs at the mirror. With `hold` the server keeps running
    /// until Ctrl-C.
    pub async fn serve(
        &self,
        resources: Option<ResourceTree>,
        hold: bool,
    ) -> Result<ServeReport, AirgapError> {
        let control = self.config.control_host.clone();
        let offline = self.offline();

        let mut hosts_entry = None;
        if let Some(control) = control.as_ref() {
            self.readiness()
                .wait_until_ready(&control.session, &self.config.readiness_policy())
                .await?;
            if let Some(url) = control.iaas_url.as_deref() {
                hosts_entry = Some(hosts_entry_for(url).await?);
            }
        }

        let resources = match (resources, control.as_ref()) {
            (Some(tree), _) => tree,
            (None, Some(control)) => {
                offline
                    .fetch_blueprint_resources(&control.session, &control.blueprint_path)
                    .await?
            }
            (None, None) => {
                return Err(AirgapError::invalid_params(
                    "No resources to serve: pass --blueprint or configure control_host",
                ))
            }
        };

        if let Some(control) = control.as_ref().filter(|control| control.assert_offline) {
            offline
                .assert_offline(&control.session, &control.check_host)
                .await?;
        }

        let server = self.file_server()?;
        let logger = self.logger.clone();
        server
            .scoped(&resources, |served| async move {
                let mut updated_inputs = None;
                if let Some(control) = control.as_ref() {
                    updated_inputs = Some(
                        offline
                            .update_inputs_file(&control.session, &control.inputs_path, &served.inputs)
                            .await?,
                    );
                    if let Some(entry) = hosts_entry.as_deref() {
                        offline.append_hosts_entry(&control.session, entry).await?;
                    }
                }
                if hold {
                    logger.info(
                        &format!("Serving on {}; press Ctrl-C to stop", served.base_url()),
                        None,
                    );
                    tokio::signal::ctrl_c().await?;
                }
                Ok(ServeReport {
                    served,
                    hosts_entry,
                    updated_inputs,
                })
            })
            .await
    }
}
