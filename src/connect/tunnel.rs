//! SSH port-forwarding tunnels.

use rand::Rng;
use std::ops::RangeInclusive;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::catalog::{SshAuth, SshEndpoint};
use crate::error::TunnelError;

pub const LOCALHOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Candidate local ports
    pub port_range: RangeInclusive<u16>,
    pub max_port_probes: usize,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub ssh_program: String,
    pub sshpass_program: String,
    /// How long a closing tunnel may take to exit after SIGTERM before it
    /// is killed
    pub close_grace: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_range: 6448..=9999,
            max_port_probes: 100,
            readiness_attempts: 10,
            readiness_interval: Duration::from_secs(1),
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// A running forwarding process.
///
/// [`TunnelHandle::close`] must be awaited when the host pass ends; dropping
/// an open handle kills the process.
#[derive(Debug)]
pub struct TunnelHandle {
    child: Option<Child>,
    pid: u32,
    local_port: u16,
    close_grace: Duration,
}

impl TunnelHandle {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the forwarding process if it is still running. Idempotent.
    ///
    /// The process gets SIGTERM and `close_grace` to exit, then SIGKILL.
    pub async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Tunnel process {} already exited: {}", self.pid, status);
                return;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not query tunnel process {}: {}", self.pid, e),
        }

        if let Some(pid) = child.id() {
            // SAFETY: kill(2) on a pid we spawned and have not reaped yet.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!(
                    "Failed to signal tunnel process {}: {}",
                    pid,
                    std::io::Error::last_os_error()
                );
            }
        }

        match tokio::time::timeout(self.close_grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to reap tunnel process {}: {}", self.pid, e),
            Err(_) => {
                warn!(
                    "Tunnel process {} ignored SIGTERM for {:?}, killing it",
                    self.pid, self.close_grace
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill tunnel process {}: {}", self.pid, e);
                }
            }
        }
        info!("Closed tunnel on port {}", self.local_port);
    }
}

/// Argument vector for the forwarding process, program first.
pub fn tunnel_command(
    ssh: &SshEndpoint,
    db_host: &str,
    db_port: u16,
    local_port: u16,
    config: &TunnelConfig,
) -> Vec<String> {
    let mut command = vec![
        config.ssh_program.clone(),
        "-N".to_string(),
        "-L".to_string(),
        format!("{local_port}:{db_host}:{db_port}"),
        format!("{}@{}", ssh.username, ssh.host),
        "-p".to_string(),
        ssh.port.to_string(),
    ];

    match ssh.auth() {
        SshAuth::KeyPair(path) => {
            command.push("-i".to_string());
            command.push(path);
        }
        SshAuth::Password(password) => {
            let mut wrapped = vec![config.sshpass_program.clone(), "-p".to_string(), password];
            wrapped.append(&mut command);
            command = wrapped;
        }
        SshAuth::None => {}
    }
    command
}

async fn port_accepts(port: u16, wait: Duration) -> bool {
    matches!(
        tokio::time::timeout(wait, TcpStream::connect((LOCALHOST, port))).await,
        Ok(Ok(_))
    )
}

/// Pick a random local port nothing is listening on.
pub async fn find_free_port(config: &TunnelConfig) -> Result<u16, TunnelError> {
    for _ in 0..config.max_port_probes {
        let port = rand::rng().random_range(config.port_range.clone());
        if !port_accepts(port, Duration::from_millis(100)).await {
            return Ok(port);
        }
        debug!("Port {} is in use", port);
    }
    Err(TunnelError::NoFreePort(config.max_port_probes))
}

/// Start forwarding a free local port to the host's database.
///
/// Readiness is polled but never required: if the port does not come up
/// the following database connection reports the failure.
pub async fn open_tunnel(
    ssh: &SshEndpoint,
    db_host: &str,
    db_port: u16,
    config: &TunnelConfig,
) -> Result<TunnelHandle, TunnelError> {
    let local_port = find_free_port(config).await?;
    let argv = tunnel_command(ssh, db_host, db_port, local_port, config);

    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TunnelError::Spawn {
            program: argv[0].clone(),
            source,
        })?;

    let mut handle = TunnelHandle {
        pid: child.id().unwrap_or_default(),
        child: Some(child),
        local_port,
        close_grace: config.close_grace,
    };
    info!(
        "Opened tunnel {}:{} -> {}:{} via {} (pid {})",
        LOCALHOST, local_port, db_host, db_port, ssh.host, handle.pid
    );

    for attempt in 1..=config.readiness_attempts {
        if port_accepts(local_port, config.readiness_interval).await {
            debug!("Tunnel ready after {} attempt(s)", attempt);
            return Ok(handle);
        }
        if !handle.is_running() {
            warn!("Tunnel process {} exited before becoming ready", handle.pid);
            return Ok(handle);
        }
        tokio::time::sleep(config.readiness_interval).await;
    }

    warn!(
        "Tunnel on port {} not ready after {} attempts, continuing",
        local_port, config.readiness_attempts
    );
    Ok(handle)
}
