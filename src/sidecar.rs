//! Daemon sidecar management
//!
//! Spawns `termlink daemon` as a child process and hands it the app's
//! bootstrap address through the environment.

use std::process::{Child, Command};

use crate::rpc::APP_ADDR_ENV;

/// Manages the daemon child process
pub struct DaemonSidecar {
    process: Option<Child>,
    app_addr: String,
}

impl DaemonSidecar {
    pub fn new(app_addr: String) -> Self {
        Self {
            process: None,
            app_addr,
        }
    }

    /// Start the daemon
    pub fn start(&mut self) -> Result<(), String> {
        if self.process.is_some() {
            return Ok(()); // Already running
        }

        let exe = std::env::current_exe()
            .map_err(|e| format!("Failed to locate own binary: {}", e))?;

        let child = Command::new(exe)
            .arg("daemon")
            .env(APP_ADDR_ENV, &self.app_addr)
            .spawn()
            .map_err(|e| format!("Failed to start daemon: {}", e))?;

        tracing::info!("Started daemon (pid {})", child.id());
        self.process = Some(child);
        Ok(())
    }

    /// Stop the daemon
    pub fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
            tracing::info!("Stopped daemon");
        }
    }

    /// Check if the daemon is running
    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut process) = self.process {
            match process.try_wait() {
                Ok(Some(_)) => {
                    // Process exited
                    self.process = None;
                    false
                }
                Ok(None) => true, // Still running
                Err(_) => false,
            }
        } else {
            false
        }
    }
}

impl Drop for DaemonSidecar {
    fn drop(&mut self) {
        self.stop();
    }
}
