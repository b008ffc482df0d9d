//! External display-transform tool (wlr-randr)

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::process::Command;
use tracing::debug;

use crate::types::Orientation;

/// One output as reported by the display tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputInfo {
    pub name: String,
    /// Raw transform string ("normal", "90", "flipped-180", ...)
    pub transform: String,
    pub enabled: bool,
}

impl OutputInfo {
    /// None for transforms outside the four canonical rotations (flipped variants)
    pub fn orientation(&self) -> Option<Orientation> {
        Orientation::normalize(&self.transform)
    }
}

/// Display-transform tool as the orientation controller sees it
pub trait DisplayTool {
    /// Whether the tool binary can be located at all
    fn is_installed(&self) -> bool;
    fn list_outputs(&self) -> Result<Vec<OutputInfo>>;
    fn set_transform(&self, output: &str, orientation: Orientation) -> Result<()>;
}

/// Pick the output a kiosk should drive: first enabled, else first listed
pub fn detect_output(outputs: &[OutputInfo]) -> Option<&OutputInfo> {
    outputs
        .iter()
        .find(|o| o.enabled)
        .or_else(|| outputs.first())
}

/// wlr-randr client
#[derive(Debug, Clone)]
pub struct WlrRandr {
    binary: String,
    env: Vec<(String, String)>,
}

impl WlrRandr {
    pub fn new(binary: impl Into<String>, env: Vec<(String, String)>) -> Self {
        Self {
            binary: binary.into(),
            env,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl DisplayTool for WlrRandr {
    fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn list_outputs(&self) -> Result<Vec<OutputInfo>> {
        let output = self
            .command()
            .output()
            .with_context(|| format!("Failed to run {}", self.binary))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let outputs = parse_outputs(&String::from_utf8_lossy(&output.stdout));
        if outputs.is_empty() {
            bail!("{} reported no outputs", self.binary);
        }
        debug!(count = outputs.len(), "Listed display outputs");
        Ok(outputs)
    }

    fn set_transform(&self, output: &str, orientation: Orientation) -> Result<()> {
        let result = self
            .command()
            .args(["--output", output, "--transform", orientation.transform()])
            .output()
            .with_context(|| format!("Failed to run {}", self.binary))?;
        if !result.status.success() {
            bail!(
                "{} --output {} --transform {} exited with {}: {}",
                self.binary,
                output,
                orientation.transform(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Parse wlr-randr's human-readable listing
///
/// Output headers start at column 0 (`HDMI-A-1 "Make Model (HDMI-A-1)"`),
/// properties are indented (`  Enabled: yes`, `  Transform: 270`).
pub fn parse_outputs(listing: &str) -> Vec<OutputInfo> {
    let mut outputs: Vec<OutputInfo> = Vec::new();

    for line in listing.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            if let Some(name) = line.split_whitespace().next() {
                outputs.push(OutputInfo {
                    name: name.to_string(),
                    transform: "normal".to_string(),
                    enabled: true,
                });
            }
            continue;
        }

        let Some(current) = outputs.last_mut() else {
            continue;
        };
        if let Some((key, value)) = line.trim().split_once(':') {
            match key.trim() {
                "Enabled" => current.enabled = value.trim() == "yes",
                "Transform" => current.transform = value.trim().to_string(),
                _ => {}
            }
        }
    }

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"HDMI-A-1 "Dell Inc. DELL U2415 (HDMI-A-1)"
  Make: Dell Inc.
  Model: DELL U2415
  Serial: ABC123
  Physical size: 520x320 mm
  Enabled: yes
  Modes:
    1920x1200 px, 59.950001 Hz (preferred, current)
    1920x1080 px, 60.000000 Hz
  Position: 0,0
  Transform: 270
  Scale: 1.000000
  Adaptive Sync: disabled
HDMI-A-2 "Unknown (HDMI-A-2)"
  Enabled: no
  Modes:
  Position: 0,0
  Transform: normal
"#;

    #[test]
    fn test_parse_outputs() {
        let outputs = parse_outputs(LISTING);
        assert_eq!(
            outputs,
            vec![
                OutputInfo { name: "HDMI-A-1".to_string(), transform: "270".to_string(), enabled: true },
                OutputInfo { name: "HDMI-A-2".to_string(), transform: "normal".to_string(), enabled: false },
            ]
        );
        assert_eq!(outputs[0].orientation(), Some(Orientation::PortraitRight));
        assert_eq!(outputs[1].orientation(), Some(Orientation::Landscape));
    }

    #[test]
    fn test_mode_lines_do_not_leak_into_properties() {
        // Mode lines contain ':' only inside numbers, never a known key
        let outputs = parse_outputs(LISTING);
        assert_eq!(outputs[0].transform, "270");
    }

    #[test]
    fn test_flipped_transform_has_no_orientation() {
        let outputs = parse_outputs("DSI-1 \"Panel\"\n  Transform: flipped-90\n");
        assert_eq!(outputs[0].orientation(), None);
    }

    #[test]
    fn test_detect_output_prefers_enabled() {
        let mut outputs = parse_outputs(LISTING);
        outputs.swap(0, 1);
        assert_eq!(detect_output(&outputs).map(|o| o.name.as_str()), Some("HDMI-A-1"));

        for output in &mut outputs {
            output.enabled = false;
        }
        assert_eq!(detect_output(&outputs).map(|o| o.name.as_str()), Some("HDMI-A-2"));
        assert!(detect_output(&[]).is_none());
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_outputs("").is_empty());
    }
}
