use std::{
    io::Error as IOError,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{anyhow, Result};
use libc::{kill, pid_t, SIGTERM};
use log::{debug, info, warn};
use tokio::{
    process::{Child, Command},
    time::timeout,
};

const PORT_PLACEHOLDER: &str = "{port}";
const TERMINATE_GRACE_DEFAULT: Duration = Duration::from_secs(5);

/// Starts the listener process of a registered peer.
#[derive(Clone, Debug)]
pub struct Launcher {
    program: String,
    args: Vec<String>,
    grace: Duration,
}

impl Launcher {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            grace: TERMINATE_GRACE_DEFAULT,
        }
    }

    /// How long a process may take to exit after SIGTERM before it is killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn spawn(&self, port: u16) -> Result<Child> {
        let port = port.to_string();
        let args: Vec<_> = self.args.iter().map(|arg| arg.replace(PORT_PLACEHOLDER, &port)).collect();

        debug!("Spawning {} {}. ", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn {}: {e}", self.program))?;

        info!("Started peer process {} for port {port}. ", child.id().unwrap_or_default());

        Ok(child)
    }

    /// Asks the process to exit with SIGTERM and waits for it to be reaped,
    /// killing it once the grace period runs out.
    pub async fn terminate(&self, mut child: Child) -> Result<ExitStatus> {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if let Some(pid) = child.id() {
            // pid belongs to an unreaped child, so it cannot have been reused
            let result = unsafe { kill(pid as pid_t, SIGTERM) };
            if result != 0 {
                warn!("Failed to send SIGTERM to {pid}: {}. ", IOError::last_os_error());
            } else if let Ok(status) = timeout(self.grace, child.wait()).await {
                return Ok(status?);
            } else {
                warn!("Process {pid} ignored SIGTERM for {:?}, killing it. ", self.grace);
            }
        }

        child.kill().await?;
        let status = child.wait().await?;
        Ok(status)
    }
}
