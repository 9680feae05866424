#![allow(dead_code)]

use airgap::errors::AirgapError;
use airgap::managers::mirror::{DownloadReceipt, Downloader};
use airgap::managers::provision::{Deployment, ProvisionedVm, Provisioner};
use airgap::managers::remote::{
    CommandResult, ExecRequest, RemoteExecutor, RemoteSession, RemoteTransport,
};
use airgap::services::logger::{LogLevel, Logger};
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub fn quiet_logger() -> Logger {
    Logger::new("test").with_level(LogLevel::Error)
}

pub fn tmp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("airgap-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn ok(stdout: &str) -> Result<CommandResult, AirgapError> {
    Ok(CommandResult::new(0, stdout, ""))
}

pub fn exit(status: i32, stderr: &str) -> Result<CommandResult, AirgapError> {
    Ok(CommandResult::new(status, "", stderr))
}

pub fn refused() -> Result<CommandResult, AirgapError> {
    Err(AirgapError::connection_not_ready("Connection refused"))
}

/// In-memory transport. Commands are matched against scripted substrings in
/// registration order; the last reply of a script repeats forever. Unmatched
/// commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<Vec<(String, VecDeque<Result<CommandResult, AirgapError>>)>>,
    commands: Mutex<Vec<ExecRequest>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, pattern: &str, replies: Vec<Result<CommandResult, AirgapError>>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push((pattern.to_string(), replies.into()));
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.command).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.contains(pattern))
            .count()
    }
}

#[async_trait::async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn exec(
        &self,
        _session: &RemoteSession,
        request: &ExecRequest,
    ) -> Result<CommandResult, AirgapError> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(request.clone());
        let mut scripts = self.scripts.lock().expect("scripts lock");
        for (pattern, replies) in scripts.iter_mut() {
            if !request.command.contains(pattern.as_str()) {
                continue;
            }
            return match replies.len() {
                0 => Ok(CommandResult::new(0, "", "")),
                1 => replies[0].clone(),
                _ => replies.pop_front().expect("reply"),
            };
        }
        Ok(CommandResult::new(0, "", ""))
    }

    async fn read_file(
        &self,
        _session: &RemoteSession,
        path: &str,
    ) -> Result<Vec<u8>, AirgapError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| AirgapError::internal(format!("no such file {}", path)))
    }

    async fn write_file(
        &self,
        _session: &RemoteSession,
        path: &str,
        content: &[u8],
    ) -> Result<(), AirgapError> {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }
}

pub fn executor(transport: &Arc<ScriptedTransport>) -> Arc<RemoteExecutor> {
    let transport: Arc<dyn RemoteTransport> = transport.clone();
    Arc::new(RemoteExecutor::new(quiet_logger(), transport))
}

/// Provisioner that hands out a fixed address and counts calls.
pub struct CountingProvisioner {
    pub address: String,
    pub install_error: Option<AirgapError>,
    pub uninstall_error: Option<AirgapError>,
    installs: AtomicUsize,
    uninstalls: AtomicUsize,
}

impl CountingProvisioner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            install_error: None,
            uninstall_error: None,
            installs: AtomicUsize::new(0),
            uninstalls: AtomicUsize::new(0),
        }
    }

    pub fn failing_install(mut self, err: AirgapError) -> Self {
        self.install_error = Some(err);
        self
    }

    pub fn failing_uninstall(mut self, err: AirgapError) -> Self {
        self.uninstall_error = Some(err);
        self
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provisioner for CountingProvisioner {
    async fn install(&self, _deployment: &Deployment) -> Result<ProvisionedVm, AirgapError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.install_error.clone() {
            return Err(err);
        }
        Ok(ProvisionedVm {
            address: self.address.clone(),
            outputs: serde_json::json!({"vm_public_ip_address": self.address}),
        })
    }

    async fn uninstall(&self, _deployment: &Deployment) -> Result<(), AirgapError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        match self.uninstall_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Records downloads without touching the network; `fail_times` makes a URL
/// fail that many times before succeeding.
#[derive(Default)]
pub struct MemoryDownloader {
    calls: Mutex<Vec<(String, PathBuf)>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl MemoryDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_times(&self, url: &str, times: usize) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(url.to_string(), times);
    }

    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait::async_trait]
impl Downloader for MemoryDownloader {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<DownloadReceipt, AirgapError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((url.to_string(), destination.to_path_buf()));
        let mut failures = self.failures.lock().expect("failures lock");
        if let Some(left) = failures.get_mut(url) {
            if *left > 0 {
                *left -= 1;
                return Err(AirgapError::download(format!("{} unreachable", url)));
            }
        }
        Ok(DownloadReceipt {
            bytes: Some(url.len() as u64),
            sha256: None,
        })
    }
}
