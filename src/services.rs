//! Service manager seam (systemd via `systemctl`)

use anyhow::{Context, Result, bail};
use std::process::Command;
use tracing::debug;

use crate::constants::systemd;

/// Durable start/stop of kiosk sessions across reboots
pub trait ServiceManager {
    fn enable(&self, unit: &str) -> Result<()>;
    fn disable(&self, unit: &str) -> Result<()>;
    fn stop(&self, unit: &str) -> Result<()>;
    fn restart(&self, unit: &str) -> Result<()>;
    fn is_active(&self, unit: &str) -> Result<bool>;
    /// Pick up unit files written since boot
    fn daemon_reload(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Systemctl {
    binary: String,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self {
            binary: systemd::SYSTEMCTL.to_string(),
        }
    }
}

impl Systemctl {
    #[cfg(test)]
    fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        debug!(args = ?args, "systemctl");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {} {}", self.binary, args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl ServiceManager for Systemctl {
    fn enable(&self, unit: &str) -> Result<()> {
        self.run(&["enable", unit])
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.run(&["disable", unit])
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.run(&["stop", unit])
    }

    fn restart(&self, unit: &str) -> Result<()> {
        self.run(&["restart", unit])
    }

    fn is_active(&self, unit: &str) -> Result<bool> {
        // is-active exits non-zero for anything but "active"; that is an answer, not an error
        let output = Command::new(&self.binary)
            .args(["is-active", unit])
            .output()
            .with_context(|| format!("Failed to run {} is-active {}", self.binary, unit))?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "active")
    }

    fn daemon_reload(&self) -> Result<()> {
        self.run(&["daemon-reload"])
    }
}
