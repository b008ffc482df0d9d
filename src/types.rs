//! Core domain types shared by the store, controller and supervisor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants;
use crate::error::StoreError;

/// Logical screen rotation
///
/// The canonical form is the degree value (`0`, `90`, `180`, `270`), which is
/// what gets persisted. Aliases are only accepted at the boundary via
/// [`Orientation::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    Landscape,
    PortraitLeft,
    Inverted,
    PortraitRight,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Landscape,
        Orientation::PortraitLeft,
        Orientation::Inverted,
        Orientation::PortraitRight,
    ];

    /// Substitute for anything that does not normalize
    pub const FALLBACK: Orientation = Orientation::PortraitRight;

    pub fn degrees(self) -> u16 {
        match self {
            Orientation::Landscape => 0,
            Orientation::PortraitLeft => 90,
            Orientation::Inverted => 180,
            Orientation::PortraitRight => 270,
        }
    }

    /// Transform name understood by the display tool
    pub fn transform(self) -> &'static str {
        match self {
            Orientation::Landscape => "normal",
            Orientation::PortraitLeft => "90",
            Orientation::Inverted => "180",
            Orientation::PortraitRight => "270",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Landscape => "landscape",
            Orientation::PortraitLeft => "portrait-left",
            Orientation::Inverted => "inverted",
            Orientation::PortraitRight => "portrait-right",
        }
    }

    /// Map any accepted spelling onto a canonical value
    /// Case-insensitive; '_' and spaces count as '-'
    pub fn normalize(raw: &str) -> Option<Orientation> {
        let cleaned = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_ascii_lowercase()
            .replace(['_', ' '], "-");
        let cleaned = cleaned.strip_suffix("deg").unwrap_or(&cleaned);

        match cleaned {
            "0" | "normal" | "landscape" => Some(Orientation::Landscape),
            "90" | "left" | "portrait-left" | "portraitleft" => Some(Orientation::PortraitLeft),
            "180" | "inverted" | "upside-down" | "flipped" => Some(Orientation::Inverted),
            "270" | "right" | "portrait" | "portrait-right" | "portraitright" => {
                Some(Orientation::PortraitRight)
            }
            _ => None,
        }
    }

    /// Normalize, substituting [`Orientation::FALLBACK`] for unknown input
    /// Returns the value and whether a substitution happened
    pub fn normalize_or_fallback(raw: &str) -> (Orientation, bool) {
        match Self::normalize(raw) {
            Some(orientation) => (orientation, false),
            None => (Self::FALLBACK, true),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}°)", self.label(), self.degrees())
    }
}

/// Identifier of a kiosk target
/// Doubles as a file name and part of a systemd unit name, so it is restricted
/// to lowercase ASCII letters, digits, '-' and '_'
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// systemd unit running this target's browser session
    pub fn unit_name(&self) -> String {
        format!("{}{}.service", constants::systemd::UNIT_PREFIX, self.0)
    }
}

impl FromStr for TargetId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 64
            && s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(TargetId(s.to_string()))
        } else {
            Err(StoreError::InvalidId(s.to_string()))
        }
    }
}

impl TryFrom<String> for TargetId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One configured dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KioskTarget {
    pub id: TargetId,
    pub display_name: String,
    pub url: String,
    pub preferred_orientation: Orientation,
}

impl KioskTarget {
    pub fn new(id: TargetId, display_name: &str, url: &str, preferred_orientation: Orientation) -> Self {
        Self {
            id,
            display_name: display_name.to_string(),
            url: url.to_string(),
            preferred_orientation,
        }
    }

    /// A blank address must never be launched
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// System-wide display record, the source of truth between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemDisplayState {
    pub output_identifier: String,
    pub saved_orientation: Orientation,
}

impl Default for SystemDisplayState {
    fn default() -> Self {
        Self {
            output_identifier: constants::display::DEFAULT_OUTPUT.to_string(),
            saved_orientation: Orientation::FALLBACK,
        }
    }
}

/// Lifecycle of one target's browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Stopped,
    Starting,
    WaitingNetwork,
    Running,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::WaitingNetwork => "waiting-network",
            SessionState::Running => "running",
        }
    }
}
