//! Operator settings stored as `settings.json` in the state root
//!
//! Every field has a default so a partial file is valid. A missing file is
//! created with defaults on first load.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::store::write_atomic;
use crate::constants::{browser, display, network, systemd, timing};
use crate::retry::RetryPolicy;
use crate::types::Orientation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Browser binary launched for every target
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default)]
    pub extra_browser_flags: Vec<String>,

    /// Display-transform tool binary
    #[serde(default = "default_display_tool")]
    pub display_tool: String,
    /// Compositor socket passed to the display tool and browser when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wayland_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xdg_runtime_dir: Option<String>,

    /// Account the kiosk units run as
    #[serde(default = "default_kiosk_user")]
    pub kiosk_user: String,
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    #[serde(default = "default_probe_addresses")]
    pub probe_addresses: Vec<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_tool_wait_secs")]
    pub tool_wait_secs: u64,
    #[serde(default = "default_tool_poll_secs")]
    pub tool_poll_secs: u64,
    #[serde(default = "default_network_wait_secs")]
    pub network_wait_secs: u64,
    #[serde(default = "default_network_poll_secs")]
    pub network_poll_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Minimum gap between two browser launches of the same session
    #[serde(default = "default_restart_min_secs")]
    pub restart_min_secs: u64,

    /// Targets written by `provision`
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetSeed>,
}

/// Provisioning seed for one kiosk target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_seed_orientation")]
    pub orientation: String,
}

fn default_browser() -> String {
    browser::DEFAULT_BINARY.to_string()
}

fn default_display_tool() -> String {
    display::DEFAULT_TOOL.to_string()
}

fn default_kiosk_user() -> String {
    systemd::DEFAULT_USER.to_string()
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from(systemd::DEFAULT_UNIT_DIR)
}

fn default_probe_addresses() -> Vec<String> {
    network::PROBE_ADDRESSES.iter().map(|a| a.to_string()).collect()
}

fn default_probe_timeout_ms() -> u64 {
    timing::PROBE_TIMEOUT_MS
}

fn default_tool_wait_secs() -> u64 {
    timing::TOOL_WAIT_SECS
}

fn default_tool_poll_secs() -> u64 {
    timing::TOOL_POLL_SECS
}

fn default_network_wait_secs() -> u64 {
    timing::NETWORK_WAIT_SECS
}

fn default_network_poll_secs() -> u64 {
    timing::NETWORK_POLL_SECS
}

fn default_settle_delay_ms() -> u64 {
    timing::SETTLE_DELAY_MS
}

fn default_restart_min_secs() -> u64 {
    timing::RESTART_MIN_SECS
}

fn default_seed_orientation() -> String {
    Orientation::FALLBACK.degrees().to_string()
}

fn default_targets() -> Vec<TargetSeed> {
    vec![
        TargetSeed {
            id: "kuma".to_string(),
            name: "Uptime Kuma".to_string(),
            url: "http://localhost:3001/dashboard".to_string(),
            orientation: Orientation::PortraitRight.degrees().to_string(),
        },
        TargetSeed {
            id: "kibana".to_string(),
            name: "Kibana".to_string(),
            url: "http://localhost:5601/app/dashboards".to_string(),
            orientation: Orientation::Landscape.degrees().to_string(),
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser: default_browser(),
            extra_browser_flags: Vec::new(),
            display_tool: default_display_tool(),
            wayland_display: None,
            xdg_runtime_dir: None,
            kiosk_user: default_kiosk_user(),
            unit_dir: default_unit_dir(),
            probe_addresses: default_probe_addresses(),
            probe_timeout_ms: default_probe_timeout_ms(),
            tool_wait_secs: default_tool_wait_secs(),
            tool_poll_secs: default_tool_poll_secs(),
            network_wait_secs: default_network_wait_secs(),
            network_poll_secs: default_network_poll_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            restart_min_secs: default_restart_min_secs(),
            targets: default_targets(),
        }
    }
}

impl Settings {
    /// Load settings, writing defaults if the file does not exist yet
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Settings not found, writing defaults");
            let settings = Settings::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings JSON in {}", path.display()))?;
        settings.validate_and_clamp();

        info!(path = %path.display(), targets = settings.targets.len(), "Loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Keep every wait bounded and every poll interval non-zero
    fn validate_and_clamp(&mut self) {
        if self.tool_poll_secs == 0 {
            warn!(using = default_tool_poll_secs(), "tool_poll_secs is 0, using default");
            self.tool_poll_secs = default_tool_poll_secs();
        }
        if self.tool_wait_secs < self.tool_poll_secs {
            warn!(tool_wait_secs = self.tool_wait_secs, min = self.tool_poll_secs, "tool_wait_secs below poll interval, clamping");
            self.tool_wait_secs = self.tool_poll_secs;
        }

        if self.network_poll_secs == 0 {
            warn!(using = default_network_poll_secs(), "network_poll_secs is 0, using default");
            self.network_poll_secs = default_network_poll_secs();
        }
        if self.network_wait_secs < self.network_poll_secs {
            warn!(network_wait_secs = self.network_wait_secs, min = self.network_poll_secs, "network_wait_secs below poll interval, clamping");
            self.network_wait_secs = self.network_poll_secs;
        }

        if self.probe_timeout_ms == 0 {
            warn!(using = default_probe_timeout_ms(), "probe_timeout_ms is 0, using default");
            self.probe_timeout_ms = default_probe_timeout_ms();
        }

        if self.restart_min_secs == 0 {
            warn!("restart_min_secs is 0, enforcing 1s between browser restarts");
            self.restart_min_secs = 1;
        }

        if self.probe_addresses.is_empty() {
            warn!("probe_addresses is empty, using defaults");
            self.probe_addresses = default_probe_addresses();
        }
    }

    pub fn tool_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.tool_poll_secs, self.tool_wait_secs)
    }

    pub fn network_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.network_poll_secs, self.network_wait_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn restart_min_gap(&self) -> Duration {
        Duration::from_secs(self.restart_min_secs)
    }

    /// Environment the compositor clients (display tool, browser) need
    pub fn wayland_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(display) = &self.wayland_display {
            env.push(("WAYLAND_DISPLAY".to_string(), display.clone()));
        }
        if let Some(runtime) = &self.xdg_runtime_dir {
            env.push(("XDG_RUNTIME_DIR".to_string(), runtime.clone()));
        }
        env
    }
}
