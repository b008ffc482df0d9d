//! Orientation controller
//!
//! Applies a logical orientation through the display tool, re-queries the tool
//! to confirm it took effect, and only then touches the persisted display
//! state. A failed apply never updates the saved orientation.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Store;
use crate::display::{DisplayTool, OutputInfo};
use crate::error::OrientationError;
use crate::retry::{RetryPolicy, retry};
use crate::types::{Orientation, SystemDisplayState};

/// Outcome of a verified apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedOrientation {
    pub output: String,
    pub orientation: Orientation,
    /// False when the output already showed the requested transform
    pub changed: bool,
    /// Raw input that did not normalize and was replaced by the fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub substituted_from: Option<String>,
}

pub struct OrientationController<'a> {
    tool: &'a dyn DisplayTool,
    readiness: RetryPolicy,
    settle_delay: Duration,
}

impl<'a> OrientationController<'a> {
    pub fn new(tool: &'a dyn DisplayTool, readiness: RetryPolicy, settle_delay: Duration) -> Self {
        Self {
            tool,
            readiness,
            settle_delay,
        }
    }

    /// Block until the tool answers, bounded by the readiness policy
    pub fn wait_ready(&self) -> Result<Vec<OutputInfo>, OrientationError> {
        if !self.tool.is_installed() {
            return Err(OrientationError::ToolUnavailable(
                "display tool binary not found".to_string(),
            ));
        }
        retry(&self.readiness, "display tool", || self.tool.list_outputs())
            .map_err(|timeout| OrientationError::ToolUnavailable(timeout.to_string()))
    }

    /// Apply `orientation` to `output` and verify the tool reports it
    pub fn apply(&self, output: &str, orientation: Orientation) -> Result<AppliedOrientation, OrientationError> {
        let outputs = self.wait_ready()?;
        let current = outputs.iter().find(|o| o.name == output);
        if current.is_none() {
            warn!(output, available = ?outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), "Output not listed by display tool");
        }

        let already_active = current.and_then(OutputInfo::orientation) == Some(orientation);
        if already_active {
            debug!(output, %orientation, "Orientation already active, verifying only");
        } else {
            info!(output, %orientation, "Applying orientation");
            self.tool
                .set_transform(output, orientation)
                .map_err(OrientationError::Tool)?;
            if !self.settle_delay.is_zero() {
                std::thread::sleep(self.settle_delay);
            }
        }

        self.verify(output, orientation)?;
        Ok(AppliedOrientation {
            output: output.to_string(),
            orientation,
            changed: !already_active,
            substituted_from: None,
        })
    }

    fn verify(&self, output: &str, requested: Orientation) -> Result<(), OrientationError> {
        let outputs = self.tool.list_outputs().map_err(OrientationError::Tool)?;
        let reported = outputs.iter().find(|o| o.name == output);

        match reported {
            Some(info) if info.orientation() == Some(requested) => Ok(()),
            Some(info) => Err(OrientationError::VerificationFailed {
                output: output.to_string(),
                requested,
                reported: info.transform.clone(),
            }),
            None => Err(OrientationError::VerificationFailed {
                output: output.to_string(),
                requested,
                reported: "no such output".to_string(),
            }),
        }
    }

    /// Apply, then persist only on success
    pub fn set_and_persist(
        &self,
        store: &dyn Store,
        output: &str,
        orientation: Orientation,
    ) -> Result<AppliedOrientation, OrientationError> {
        let applied = self.apply(output, orientation)?;
        store.save_display_state(&SystemDisplayState {
            output_identifier: output.to_string(),
            saved_orientation: applied.orientation,
        })?;
        Ok(applied)
    }

    /// Like [`Self::set_and_persist`] but for operator input
    ///
    /// Unknown input is replaced by the fallback orientation; the replacement is
    /// applied, persisted and reported back in `substituted_from`.
    pub fn set_and_persist_raw(
        &self,
        store: &dyn Store,
        output: &str,
        raw: &str,
    ) -> Result<AppliedOrientation, OrientationError> {
        let (orientation, substituted) = Orientation::normalize_or_fallback(raw);
        if substituted {
            warn!(value = %raw, using = %orientation, "{}", OrientationError::UnknownOrientation(raw.to_string()));
        }

        let mut applied = self.set_and_persist(store, output, orientation)?;
        if substituted {
            applied.substituted_from = Some(raw.to_string());
        }
        Ok(applied)
    }

    /// Boot path: re-apply the saved orientation to the saved output
    pub fn restore(&self, store: &dyn Store) -> Result<AppliedOrientation, OrientationError> {
        let state = store.load_display_state()?;
        info!(output = %state.output_identifier, orientation = %state.saved_orientation, "Restoring saved orientation");
        self.set_and_persist(store, &state.output_identifier, state.saved_orientation)
    }

    /// Single query for status display, no readiness wait
    pub fn current(&self, output: &str) -> anyhow::Result<Option<OutputInfo>> {
        Ok(self
            .tool
            .list_outputs()?
            .into_iter()
            .find(|o| o.name == output))
    }
}
