use crate::constants::retry as retry_constants;
use crate::errors::AirgapError;
use crate::managers::blueprint::{merge_inputs, resources_from_blueprint};
use crate::managers::mirror::ResourceTree;
use crate::managers::remote::{CommandSpec, RemoteExecutor, RemoteSession, RetryBudget};
use crate::services::logger::Logger;
use crate::utils::shell::quote;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Decides whether `ping` output proves name resolution is unavailable.
pub fn offline_verdict(output: &str, host: &str) -> bool {
    if output.contains("bytes from") {
        return false;
    }
    let lowered = output.to_lowercase();
    lowered.contains(&format!("unknown host {}", host.to_lowercase()))
        || lowered.contains("name or service not known")
        || lowered.contains("temporary failure in name resolution")
}

/// Host part of `url` without the port.
pub fn url_host(url: &str) -> Result<String, AirgapError> {
    let parsed = Url::parse(url.trim()).map_err(|err| {
        AirgapError::invalid_params(format!("Invalid url '{}': {}", url, err))
    })?;
    parsed
        .host_str()
        .map(|host| host.trim_matches(|c| c == '[' || c == ']').to_string())
        .ok_or_else(|| AirgapError::invalid_params(format!("Url '{}' has no host", url)))
}

pub fn hosts_line(address: IpAddr, host: &str) -> String {
    format!("{} {}", address, host)
}

/// Resolves the host of `url` on the local machine and returns the matching
/// `/etc/hosts` line. IPv4 addresses win over IPv6.
pub async fn hosts_entry_for(url: &str) -> Result<String, AirgapError> {
    let host = url_host(url)?;
    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await
        .map_err(|err| {
            AirgapError::invalid_params(format!("Failed to resolve {}: {}", host, err))
        })?
        .map(|addr| addr.ip())
        .collect();
    let address = addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| {
            AirgapError::invalid_params(format!("{} resolved to no addresses", host))
        })?;
    Ok(hosts_line(address, &host))
}

/// Control-host steps of an offline install run around the file server.
#[derive(Clone)]
pub struct OfflineDriver {
    logger: Logger,
    executor: Arc<RemoteExecutor>,
    retry_interval: Duration,
}

impl OfflineDriver {
    pub fn new(logger: Logger, executor: Arc<RemoteExecutor>) -> Self {
        Self {
            logger: logger.child("offline"),
            executor,
            retry_interval: Duration::from_secs(retry_constants::COMMAND_RETRY_INTERVAL_SECS),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub async fn assert_offline(
        &self,
        session: &RemoteSession,
        check_host: &str,
    ) -> Result<(), AirgapError> {
        let result = self
            .executor
            .execute(
                session,
                &CommandSpec::new(format!("ping -c 2 {}", quote(check_host))).warn_only(),
            )
            .await?;
        let output = result.combined_output();
        if offline_verdict(&output, check_host) {
            self.logger.info(
                "Control host is offline",
                Some(&serde_json::json!({"target": session.label()})),
            );
            return Ok(());
        }
        Err(AirgapError::command_execution(format!(
            "{} is still able to resolve {}",
            session.label(),
            check_host
        ))
        .with_hint("DNS must be disabled on the control host before the offline install.")
        .with_details(serde_json::json!({"output": output})))
    }

    /// Runs `spec` on a machine other than the file server with the default
    /// retry budget of three retries.
    pub async fn run_on_custom_machine(
        &self,
        session: &RemoteSession,
        spec: &CommandSpec,
    ) -> Result<(), AirgapError> {
        self.executor
            .execute_with_retries(
                session,
                spec,
                RetryBudget::retries(retry_constants::CUSTOM_MACHINE_RETRIES)
                    .with_interval(self.retry_interval),
            )
            .await?;
        Ok(())
    }

    pub async fn append_hosts_entry(
        &self,
        session: &RemoteSession,
        entry: &str,
    ) -> Result<(), AirgapError> {
        self.logger.info(
            &format!("adding {} to /etc/hosts", entry),
            Some(&serde_json::json!({"target": session.label()})),
        );
        self.run_on_custom_machine(
            session,
            &CommandSpec::new(format!("echo {} >> /etc/hosts", quote(entry))).elevated(),
        )
        .await
    }

    /// Reads a blueprint from the control host and collects its resources.
    pub async fn fetch_blueprint_resources(
        &self,
        session: &RemoteSession,
        blueprint_path: &str,
    ) -> Result<ResourceTree, AirgapError> {
        let raw = self.executor.read_file(session, blueprint_path).await?;
        let blueprint = ResourceTree::from_yaml_str(&String::from_utf8_lossy(&raw))?;
        Ok(resources_from_blueprint(&blueprint))
    }

    /// Merges `additional` into the remote inputs document and writes it back
    /// as JSON. Returns the merged document.
    pub async fn update_inputs_file(
        &self,
        session: &RemoteSession,
        inputs_path: &str,
        additional: &ResourceTree,
    ) -> Result<ResourceTree, AirgapError> {
        let raw = self.executor.read_file(session, inputs_path).await?;
        let text = String::from_utf8_lossy(&raw);
        let mut inputs = if text.trim().is_empty() {
            ResourceTree::empty_mapping()
        } else {
            ResourceTree::from_yaml_str(&text)?
        };
        merge_inputs(&mut inputs, additional)?;
        let rendered = inputs.to_json_string()?;
        self.executor
            .write_file(session, inputs_path, rendered.as_bytes())
            .await?;
        self.logger.info(
            "Updated inputs file",
            Some(&serde_json::json!({
                "path": inputs_path,
                "keys": additional.entries().len(),
            })),
        );
        Ok(inputs)
    }
}
