//! Operator commands, wiring the real collaborators together

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

use crate::browser::{BrowserControl, BrowserLauncher, ProcBrowser};
use crate::config::{FileStore, Paths, Settings, Store};
use crate::constants::{display as display_consts, systemd};
use crate::display::{DisplayTool, WlrRandr, detect_output};
use crate::error::{OrientationError, StoreError};
use crate::network::{NetworkProbe, TcpProbe};
use crate::orientation::OrientationController;
use crate::services::{ServiceManager, Systemctl};
use crate::session::SessionRunner;
use crate::supervisor::KioskSupervisor;
use crate::types::{KioskTarget, Orientation, SessionState, SystemDisplayState, TargetId};
use crate::units::{self, UnitContext};

/// The real collaborators on this machine, built from settings
pub struct Host {
    display: WlrRandr,
    services: Systemctl,
    probe: TcpProbe,
    browsers: ProcBrowser,
}

impl Host {
    pub fn new(settings: &Settings) -> Self {
        Self {
            display: WlrRandr::new(settings.display_tool.clone(), settings.wayland_env()),
            services: Systemctl::default(),
            probe: TcpProbe::new(settings.probe_addresses.clone(), settings.probe_timeout()),
            browsers: ProcBrowser::new(&settings.browser),
        }
    }
}

pub struct App<'a> {
    settings: Settings,
    store: FileStore,
    display: &'a dyn DisplayTool,
    services: &'a dyn ServiceManager,
    probe: &'a dyn NetworkProbe,
    browsers: &'a dyn BrowserControl,
}

/// Changes requested by `set-target`
#[derive(Debug, Default)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub orientation: Option<String>,
}

#[derive(Debug, Serialize)]
struct TargetStatus {
    id: TargetId,
    name: String,
    url: String,
    orientation: Orientation,
    state: SessionState,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    output: String,
    saved_orientation: Orientation,
    /// What the display tool reports right now, when it answers
    reported_transform: Option<String>,
    targets: Vec<TargetStatus>,
}

impl<'a> App<'a> {
    pub fn new(
        paths: Paths,
        settings: Settings,
        display: &'a dyn DisplayTool,
        services: &'a dyn ServiceManager,
        probe: &'a dyn NetworkProbe,
        browsers: &'a dyn BrowserControl,
    ) -> Self {
        Self {
            settings,
            store: FileStore::new(paths),
            display,
            services,
            probe,
            browsers,
        }
    }

    pub fn on_host(paths: Paths, settings: Settings, host: &'a Host) -> Self {
        Self::new(paths, settings, &host.display, &host.services, &host.probe, &host.browsers)
    }

    fn orientation(&self) -> OrientationController<'a> {
        OrientationController::new(self.display, self.settings.tool_policy(), self.settings.settle_delay())
    }

    fn supervisor(&self) -> KioskSupervisor<'_> {
        KioskSupervisor::new(
            &self.store,
            self.orientation(),
            self.services,
            self.probe,
            self.browsers,
            self.settings.network_policy(),
        )
    }

    fn unit_context(&self) -> Result<UnitContext> {
        Ok(UnitContext {
            exe: std::env::current_exe().context("Failed to locate own executable")?,
            root: self.store.paths().root().to_path_buf(),
            user: self.settings.kiosk_user.clone(),
            env: self.settings.wayland_env(),
            restart_secs: self.settings.restart_min_secs,
        })
    }

    /// First-time setup: display state, seeded targets, systemd units
    pub fn provision(&self, output: Option<String>) -> Result<()> {
        let mut state = self.store.load_display_state()?;
        match output {
            Some(output) => state.output_identifier = output,
            None if !self.store.has_display_state() => state.output_identifier = self.detect_output(),
            None => {}
        }
        self.store.save_display_state(&state)?;
        info!(output = %state.output_identifier, orientation = %state.saved_orientation, "Display state ready");

        for seed in &self.settings.targets {
            let id: TargetId = match seed.id.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!(id = %seed.id, error = %e, "Skipping seed target");
                    continue;
                }
            };
            if self.store.paths().target_file(&id).exists() {
                debug!(target = %id, "Target already provisioned, keeping it");
                continue;
            }
            let (orientation, substituted) = Orientation::normalize_or_fallback(&seed.orientation);
            if substituted {
                warn!(target = %id, value = %seed.orientation, using = %orientation, "Unrecognized seed orientation");
            }
            self.store
                .save_target(&KioskTarget::new(id.clone(), &seed.name, &seed.url, orientation))?;
            info!(target = %id, url = %seed.url, "Provisioned target");
        }

        let targets = self.store.list_targets()?;
        units::write_units(&self.settings.unit_dir, &self.unit_context()?, &targets)?;
        self.services.daemon_reload()?;
        self.services.enable(systemd::ROTATION_UNIT)?;
        println!("Provisioned {} target(s) on output {}", targets.len(), state.output_identifier);
        Ok(())
    }

    /// One-shot query; the compositor may not be up during provisioning
    fn detect_output(&self) -> String {
        if self.display.is_installed() {
            match self.display.list_outputs() {
                Ok(outputs) => {
                    if let Some(found) = detect_output(&outputs) {
                        info!(output = %found.name, "Detected display output");
                        return found.name.clone();
                    }
                }
                Err(e) => warn!(error = %format!("{e:#}"), "Could not list display outputs"),
            }
        }
        warn!(output = display_consts::DEFAULT_OUTPUT, "No output detected, using default");
        display_consts::DEFAULT_OUTPUT.to_string()
    }

    pub fn activate(&self, id: &TargetId) -> Result<()> {
        let report = self.supervisor().activate(id)?;
        for stopped in &report.stopped {
            println!("Stopped {stopped}");
        }
        if let Some(warning) = &report.orientation_warning {
            println!("Warning: orientation not applied: {warning}");
        }
        if !report.network_ready {
            println!("Warning: network not reachable, started anyway");
        }
        println!("Activated {}", report.target);
        Ok(())
    }

    pub fn deactivate(&self, id: &TargetId) -> Result<()> {
        // Unknown ids are an error, not a silent no-op
        self.store.load_target(id)?;
        if self.supervisor().deactivate(id)? {
            println!("Stopped {id}");
        } else {
            println!("{id} was not running");
        }
        Ok(())
    }

    pub fn deactivate_all(&self) -> Result<()> {
        let stopped = self.supervisor().deactivate_all()?;
        println!("Stopped {} session(s)", stopped.len());
        Ok(())
    }

    pub fn rotate(&self, raw: &str) -> Result<()> {
        let state = self.store.load_display_state()?;
        let applied = self
            .orientation()
            .set_and_persist_raw(&self.store, &state.output_identifier, raw)?;
        if let Some(original) = &applied.substituted_from {
            println!("Warning: unrecognized orientation '{original}', using {}", applied.orientation);
        }
        println!("{} is now {}", applied.output, applied.orientation.label());
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        let applied = self.orientation().restore(&self.store)?;
        println!("Restored {} on {}", applied.orientation.label(), applied.output);
        Ok(())
    }

    /// Create or replace a target record
    pub fn set_target(&self, id: &TargetId, update: TargetUpdate) -> Result<()> {
        let existing = match self.store.load_target(id) {
            Ok(target) => Some(target),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let is_new = existing.is_none();
        let mut target = existing
            .unwrap_or_else(|| KioskTarget::new(id.clone(), id.as_str(), "", Orientation::FALLBACK));

        if let Some(name) = update.name {
            target.display_name = name;
        }
        if let Some(url) = update.url {
            target.url = url;
        }
        let mut orientation_changed = false;
        if let Some(raw) = update.orientation {
            let orientation =
                Orientation::normalize(&raw).ok_or(OrientationError::UnknownOrientation(raw))?;
            orientation_changed = orientation != target.preferred_orientation;
            target.preferred_orientation = orientation;
        }
        self.store.save_target(&target)?;
        println!("Saved {id}: {} ({}, {})", target.display_name, target.url, target.preferred_orientation.label());

        if is_new {
            units::write_units(&self.settings.unit_dir, &self.unit_context()?, std::slice::from_ref(&target))?;
            self.services.daemon_reload()?;
        }

        // A running target follows its new rotation right away
        if orientation_changed && self.services.is_active(&id.unit_name())? {
            let state = self.store.load_display_state()?;
            match self
                .orientation()
                .set_and_persist(&self.store, &state.output_identifier, target.preferred_orientation)
            {
                Ok(applied) => println!("{} is now {}", applied.output, applied.orientation.label()),
                Err(OrientationError::Store(e)) => return Err(e.into()),
                Err(e) => println!("Warning: orientation not applied: {e}"),
            }
        }
        Ok(())
    }

    pub fn status(&self, json: bool) -> Result<()> {
        let states = self.supervisor().status()?;
        let state: SystemDisplayState = self.store.peek_display_state()?;

        let reported_transform = if self.display.is_installed() {
            match self.orientation().current(&state.output_identifier) {
                Ok(info) => info.map(|o| o.transform),
                Err(e) => {
                    debug!(error = %format!("{e:#}"), "Display tool did not answer");
                    None
                }
            }
        } else {
            None
        };

        let mut targets = Vec::new();
        for target in self.store.peek_targets()? {
            let state = states.get(&target.id).copied().unwrap_or(SessionState::Stopped);
            targets.push(TargetStatus {
                id: target.id,
                name: target.display_name,
                url: target.url,
                orientation: target.preferred_orientation,
                state,
            });
        }

        let report = StatusReport {
            output: state.output_identifier,
            saved_orientation: state.saved_orientation,
            reported_transform,
            targets,
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize status")?);
            return Ok(());
        }

        println!(
            "Output: {} (saved {}, reported {})",
            report.output,
            report.saved_orientation.label(),
            report.reported_transform.as_deref().unwrap_or("unknown")
        );
        for t in &report.targets {
            println!(
                "  {:<12} {:<16} {:<15} {} [{}]",
                t.id.as_str(),
                t.state.label(),
                t.orientation.label(),
                t.name,
                if t.url.trim().is_empty() { "no url" } else { t.url.as_str() }
            );
        }
        Ok(())
    }

    /// Foreground session for one target; returns once SIGTERM or SIGINT arrives
    pub fn run(&self, id: &TargetId) -> Result<()> {
        let target = self.store.load_target(id)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            signal_hook::flag::register(signal, Arc::clone(&shutdown))
                .context("Failed to register signal handler")?;
        }

        let launcher = BrowserLauncher::new(
            self.settings.browser.clone(),
            self.settings.extra_browser_flags.clone(),
            self.settings.wayland_env(),
        );
        let runner = SessionRunner::new(
            &launcher,
            self.browsers,
            self.probe,
            self.settings.network_policy(),
            self.settings.restart_min_gap(),
        );
        let profile: PathBuf = self.store.paths().profile_dir(id);
        let summary = runner.run(&target, &profile, &shutdown)?;
        info!(target = %id, launches = summary.launches, "Session runner exiting");
        Ok(())
    }
}
