use super::transport::{CommandResult, ExecRequest, RemoteTransport};
use super::{Credentials, RemoteSession};
use crate::constants::network as network_constants;
use crate::errors::AirgapError;
use crate::services::logger::Logger;
use crate::utils::user_paths::expand_home_path;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// [`RemoteTransport`] over libssh2. Each call opens its own session.
#[derive(Clone)]
pub struct SshTransport {
    logger: Logger,
}

impl SshTransport {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
        }
    }

    async fn blocking<F, T>(&self, label: &'static str, task: F) -> Result<T, AirgapError>
    where
        F: FnOnce() -> Result<T, AirgapError> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(task)
            .await
            .map_err(|_| AirgapError::internal(format!("SSH {} task failed", label)))?
    }
}

#[async_trait::async_trait]
impl RemoteTransport for SshTransport {
    async fn exec(
        &self,
        session: &RemoteSession,
        request: &ExecRequest,
    ) -> Result<CommandResult, AirgapError> {
        self.logger.debug(
            "exec",
            Some(&serde_json::json!({"target": session.label(), "pty": request.pty})),
        );
        let logger = self.logger.clone();
        let session = session.clone();
        let request = request.clone();
        self.blocking("exec", move || exec_blocking(&logger, &session, &request))
            .await
    }

    async fn read_file(
        &self,
        session: &RemoteSession,
        path: &str,
    ) -> Result<Vec<u8>, AirgapError> {
        let session = session.clone();
        let remote_path = PathBuf::from(path);
        self.blocking("sftp read", move || {
            let ssh = connect_session(&session)?;
            let sftp = ssh.sftp().map_err(map_ssh_error)?;
            let mut file = sftp.open(&remote_path).map_err(map_ssh_error)?;
            let mut out = Vec::new();
            file.read_to_end(&mut out).map_err(|err| {
                AirgapError::internal(format!(
                    "Failed to read {}: {}",
                    remote_path.display(),
                    err
                ))
            })?;
            Ok(out)
        })
        .await
    }

    async fn write_file(
        &self,
        session: &RemoteSession,
        path: &str,
        content: &[u8],
    ) -> Result<(), AirgapError> {
        let session = session.clone();
        let remote_path = PathBuf::from(path);
        let content = content.to_vec();
        self.blocking("sftp write", move || {
            let ssh = connect_session(&session)?;
            let sftp = ssh.sftp().map_err(map_ssh_error)?;
            ensure_remote_dir(&sftp, &remote_path);
            let mut file = sftp.create(&remote_path).map_err(map_ssh_error)?;
            file.write_all(&content).map_err(|err| {
                AirgapError::internal(format!(
                    "Failed to write {}: {}",
                    remote_path.display(),
                    err
                ))
            })?;
            Ok(())
        })
        .await
    }
}

fn resolve_addr(session: &RemoteSession) -> Result<SocketAddr, AirgapError> {
    (session.host.as_str(), session.port)
        .to_socket_addrs()
        .map_err(|err| {
            AirgapError::connection_not_ready(format!(
                "Failed to resolve {}: {}",
                session.address(),
                err
            ))
        })?
        .next()
        .ok_or_else(|| {
            AirgapError::connection_not_ready(format!("No address for {}", session.address()))
        })
}

fn connect_tcp(session: &RemoteSession) -> Result<TcpStream, AirgapError> {
    let addr = resolve_addr(session)?;
    let attempts = session.connection_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match TcpStream::connect_timeout(&addr, session.timeout()) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => {
                last_error = Some(err);
                if attempt < attempts {
                    std::thread::sleep(Duration::from_millis(
                        network_constants::SSH_CONNECTION_ATTEMPT_DELAY_MS,
                    ));
                }
            }
        }
    }
    let reason = last_error
        .map(|err| err.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    Err(AirgapError::connection_not_ready(format!(
        "Failed to connect to {} after {} attempts: {}",
        session.address(),
        attempts,
        reason
    )))
}

/// Opens an authenticated session. Every failure up to and including
/// authentication is a readiness failure: a fresh VM may accept TCP before
/// its key has been installed.
fn connect_session(session: &RemoteSession) -> Result<Session, AirgapError> {
    let tcp = connect_tcp(session)?;
    tcp.set_read_timeout(Some(session.timeout())).ok();
    tcp.set_write_timeout(Some(session.timeout())).ok();

    let mut ssh = Session::new()
        .map_err(|_| AirgapError::internal("Failed to create SSH session"))?;
    ssh.set_tcp_stream(tcp);
    ssh.set_timeout(session.timeout().as_millis().min(u32::MAX as u128) as u32);
    ssh.handshake().map_err(not_ready("SSH handshake failed"))?;

    match &session.credentials {
        Credentials::KeyFile { path, passphrase } => ssh
            .userauth_pubkey_file(
                &session.user,
                None,
                &expand_home_path(path),
                passphrase.as_deref(),
            )
            .map_err(not_ready("SSH key authentication failed"))?,
        Credentials::Password { password } => ssh
            .userauth_password(&session.user, password)
            .map_err(not_ready("SSH password authentication failed"))?,
        Credentials::Agent => ssh
            .userauth_agent(&session.user)
            .map_err(not_ready("SSH agent authentication failed"))?,
    }
    if !ssh.authenticated() {
        return Err(AirgapError::connection_not_ready(format!(
            "SSH authentication failed for {}",
            session.label()
        )));
    }
    // Command timeouts are enforced by the exec loop, not by libssh2.
    ssh.set_timeout(0);
    ssh.set_keepalive(true, network_constants::KEEPALIVE_INTERVAL_SECS);
    Ok(ssh)
}

fn not_ready(context: &'static str) -> impl Fn(ssh2::Error) -> AirgapError {
    move |err| AirgapError::connection_not_ready(format!("{}: {}", context, err))
}

/// A refused pty is not fatal; the command still runs without one.
fn pty_refusal(target: &str, result: Result<(), ssh2::Error>) -> Option<serde_json::Value> {
    result
        .err()
        .map(|err| serde_json::json!({"target": target, "error": err.to_string()}))
}

fn exec_blocking(
    logger: &Logger,
    session: &RemoteSession,
    request: &ExecRequest,
) -> Result<CommandResult, AirgapError> {
    let ssh = connect_session(session)?;
    let mut channel = ssh.channel_session().map_err(map_ssh_error)?;
    if request.pty {
        let requested = channel.request_pty("xterm", None, None);
        if let Some(meta) = pty_refusal(&session.label(), requested) {
            logger.debug("PTY request failed, running without one", Some(&meta));
        }
    }
    channel.exec(&request.command).map_err(map_ssh_error)?;
    if let Some(stdin) = request.stdin.as_ref() {
        channel.write_all(stdin).map_err(|err| {
            AirgapError::internal(format!("Failed to write command stdin: {}", err))
        })?;
    }
    let _ = channel.send_eof();
    ssh.set_blocking(false);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stderr_stream = channel.stderr();
    let started = Instant::now();
    let deadline = session.command_timeout();

    loop {
        let mut progressed = false;
        let mut buf = [0u8; 8192];
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                return Err(AirgapError::internal(format!(
                    "SSH stdout read failed: {}",
                    err
                )))
            }
        }
        match stderr_stream.read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                return Err(AirgapError::internal(format!(
                    "SSH stderr read failed: {}",
                    err
                )))
            }
        }
        if channel.eof() && !progressed {
            break;
        }
        if let Some(limit) = deadline {
            if started.elapsed() > limit {
                let _ = channel.close();
                return Err(AirgapError::timeout(format!(
                    "Command on {} exceeded {}s",
                    session.label(),
                    limit.as_secs()
                ))
                .with_details(serde_json::json!({
                    "stdout": String::from_utf8_lossy(&stdout),
                    "stderr": String::from_utf8_lossy(&stderr),
                })));
            }
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    ssh.set_blocking(true);
    let _ = channel.wait_close();
    let exit_status = channel.exit_status().unwrap_or(-1);
    Ok(CommandResult::new(
        exit_status,
        String::from_utf8_lossy(&stdout).trim_end().to_string(),
        String::from_utf8_lossy(&stderr).trim_end().to_string(),
    ))
}

fn map_ssh_error(err: ssh2::Error) -> AirgapError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => AirgapError::timeout("SSH operation timed out"),
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted => {
            AirgapError::connection_not_ready(format!("SSH connection lost: {}", io_err))
        }
        _ => AirgapError::internal(format!("SSH error: {}", io_err)),
    }
}

fn ensure_remote_dir(sftp: &ssh2::Sftp, remote_path: &Path) {
    let Some(parent) = remote_path.parent() else {
        return;
    };
    let mut current = PathBuf::new();
    for part in parent.components() {
        current.push(part);
        if current.as_os_str().is_empty() || sftp.stat(&current).is_ok() {
            continue;
        }
        let _ = sftp.mkdir(&current, 0o755);
    }
}
