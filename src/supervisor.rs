//! Kiosk session supervisor
//!
//! Keeps at most one target active. Activation is "validate, stop all others,
//! start one"; there is no lock around it. Two activations racing each other
//! (an operator firing two commands at once) end with whichever finished
//! last, which is accepted for a human-operated control surface.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::browser::BrowserControl;
use crate::config::Store;
use crate::error::{KioskError, OrientationError};
use crate::network::{NetworkProbe, wait_for_network};
use crate::orientation::{AppliedOrientation, OrientationController};
use crate::retry::RetryPolicy;
use crate::services::ServiceManager;
use crate::types::{KioskTarget, SessionState, TargetId};

/// What happened during one activation
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub target: TargetId,
    pub stopped: Vec<TargetId>,
    /// None when the orientation could not be applied (see `orientation_warning`)
    pub orientation: Option<AppliedOrientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation_warning: Option<String>,
    pub network_ready: bool,
    pub stale_browsers: usize,
}

pub struct KioskSupervisor<'a> {
    store: &'a dyn Store,
    orientation: OrientationController<'a>,
    services: &'a dyn ServiceManager,
    probe: &'a dyn NetworkProbe,
    browsers: &'a dyn BrowserControl,
    network_policy: RetryPolicy,
}

impl<'a> KioskSupervisor<'a> {
    pub fn new(
        store: &'a dyn Store,
        orientation: OrientationController<'a>,
        services: &'a dyn ServiceManager,
        probe: &'a dyn NetworkProbe,
        browsers: &'a dyn BrowserControl,
        network_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            orientation,
            services,
            probe,
            browsers,
            network_policy,
        }
    }

    /// Load a target that is safe to launch
    /// Fails before anything is stopped, so a bad request leaves the current kiosk alone
    fn launchable_target(&self, id: &TargetId) -> Result<KioskTarget, KioskError> {
        let target = self.store.load_target(id)?;
        if !target.has_url() {
            return Err(KioskError::TargetNotConfigured(id.clone()));
        }
        Ok(target)
    }

    /// Make `id` the only running kiosk
    pub fn activate(&self, id: &TargetId) -> Result<ActivationReport, KioskError> {
        let target = self.launchable_target(id)?;
        info!(target = %id, url = %target.url, "Activating kiosk target");

        let mut stopped = Vec::new();
        for other in self.store.list_targets()? {
            if other.id == *id {
                continue;
            }
            if self.deactivate(&other.id)? {
                stopped.push(other.id);
            }
        }

        let display = self.store.load_display_state()?;
        let (orientation, orientation_warning) = match self.orientation.set_and_persist(
            self.store,
            &display.output_identifier,
            target.preferred_orientation,
        ) {
            Ok(applied) => (Some(applied), None),
            // Losing a persisted write is never downgraded
            Err(OrientationError::Store(e)) => return Err(e.into()),
            Err(e) => {
                warn!(target = %id, orientation = %target.preferred_orientation, error = %e, "Orientation not applied, launching at current orientation");
                (None, Some(e.to_string()))
            }
        };

        let network_ready = wait_for_network(self.probe, &self.network_policy);
        let stale_browsers = self.browsers.kill_stale()?;

        let unit = id.unit_name();
        self.services.enable(&unit)?;
        // restart also starts an inactive unit and replaces a running one
        self.services.restart(&unit)?;
        info!(target = %id, unit = %unit, "Kiosk target active");

        Ok(ActivationReport {
            target: id.clone(),
            stopped,
            orientation,
            orientation_warning,
            network_ready,
            stale_browsers,
        })
    }

    /// Stop a target's session and keep it from starting at boot
    /// Returns whether it was running
    pub fn deactivate(&self, id: &TargetId) -> Result<bool, KioskError> {
        let unit = id.unit_name();
        let was_active = self.services.is_active(&unit)?;
        if was_active {
            self.services.stop(&unit)?;
            info!(target = %id, "Stopped kiosk target");
        }
        self.services.disable(&unit)?;
        Ok(was_active)
    }

    pub fn deactivate_all(&self) -> Result<Vec<TargetId>, KioskError> {
        let mut stopped = Vec::new();
        for target in self.store.list_targets()? {
            if self.deactivate(&target.id)? {
                stopped.push(target.id);
            }
        }
        info!(count = stopped.len(), "Deactivated all kiosk targets");
        Ok(stopped)
    }

    /// Read-only snapshot of every known target's session
    pub fn status(&self) -> Result<BTreeMap<TargetId, SessionState>, KioskError> {
        let mut states = BTreeMap::new();
        for target in self.store.peek_targets()? {
            let state = if self.services.is_active(&target.id.unit_name())? {
                SessionState::Running
            } else {
                SessionState::Stopped
            };
            states.insert(target.id, state);
        }
        Ok(states)
    }
}
