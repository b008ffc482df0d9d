//! Durable KEY=value records for kiosk targets and the display state
//!
//! Every write replaces the whole record through a temp file + rename in the
//! same directory, so a reader racing a writer sees either the old or the new
//! record, never a torn one.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Paths;
use crate::constants::{keys, paths};
use crate::error::StoreError;
use crate::types::{KioskTarget, Orientation, SystemDisplayState, TargetId};

/// Persisted configuration store
pub trait Store {
    fn load_target(&self, id: &TargetId) -> Result<KioskTarget, StoreError>;
    fn save_target(&self, target: &KioskTarget) -> Result<(), StoreError>;
    /// All provisioned targets, sorted by id
    fn list_targets(&self) -> Result<Vec<KioskTarget>, StoreError>;
    /// Like `list_targets` but never rewrites a record; unrecognized
    /// orientations read as the fallback without being corrected on disk
    fn peek_targets(&self) -> Result<Vec<KioskTarget>, StoreError>;
    /// Defaults when nothing has been persisted yet
    fn load_display_state(&self) -> Result<SystemDisplayState, StoreError>;
    /// Read-only counterpart of `load_display_state`
    fn peek_display_state(&self) -> Result<SystemDisplayState, StoreError>;
    fn save_display_state(&self, state: &SystemDisplayState) -> Result<(), StoreError>;
}

/// Store backed by env-style files under the state root
#[derive(Debug, Clone)]
pub struct FileStore {
    paths: Paths,
}

impl FileStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn has_display_state(&self) -> bool {
        self.paths.display_file().exists()
    }

    fn read_record(path: &Path) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        match fs::read_to_string(path) {
            Ok(contents) => parse_record(&contents)
                .map(Some)
                .map_err(|reason| StoreError::Malformed {
                    path: path.to_path_buf(),
                    reason,
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_record(path: &Path, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        let contents = render_record(fields).map_err(|reason| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        })?;
        write_atomic(path, contents.as_bytes()).map_err(|e| StoreError::io(path, e))?;
        debug!(path = %path.display(), "Record replaced");
        Ok(())
    }
}

impl FileStore {
    /// Parse a target record; the second value is the raw orientation when it did not normalize
    fn read_target(&self, id: &TargetId) -> Result<(KioskTarget, Option<String>), StoreError> {
        let path = self.paths.target_file(id);
        let record = Self::read_record(&path)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let display_name = record
            .get(keys::NAME)
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| id.to_string());
        let url = record.get(keys::URL).cloned().unwrap_or_default();
        let raw = record.get(keys::ORIENTATION).map(String::as_str).unwrap_or("");

        let (preferred_orientation, substituted) = Orientation::normalize_or_fallback(raw);
        let target = KioskTarget {
            id: id.clone(),
            display_name,
            url,
            preferred_orientation,
        };
        Ok((target, substituted.then(|| raw.to_string())))
    }

    /// Ids of every target record, sorted
    fn target_ids(&self) -> Result<Vec<TargetId>, StoreError> {
        let dir = self.paths.targets_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(paths::TARGET_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<TargetId>() {
                Ok(id) => ids.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping record with invalid target id"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_display_state(&self) -> Result<(SystemDisplayState, Option<String>), StoreError> {
        let path = self.paths.display_file();
        let Some(record) = Self::read_record(&path)? else {
            debug!(path = %path.display(), "No display state yet, using defaults");
            return Ok((SystemDisplayState::default(), None));
        };

        let output_identifier = record
            .get(keys::OUTPUT)
            .filter(|output| !output.is_empty())
            .cloned()
            .unwrap_or_else(|| SystemDisplayState::default().output_identifier);
        let raw = record.get(keys::SAVED_ORIENTATION).map(String::as_str).unwrap_or("");

        let (saved_orientation, substituted) = Orientation::normalize_or_fallback(raw);
        let state = SystemDisplayState {
            output_identifier,
            saved_orientation,
        };
        Ok((state, substituted.then(|| raw.to_string())))
    }
}

impl Store for FileStore {
    fn load_target(&self, id: &TargetId) -> Result<KioskTarget, StoreError> {
        let (target, unrecognized) = self.read_target(id)?;
        if let Some(raw) = unrecognized {
            warn!(target = %id, value = %raw, using = %target.preferred_orientation, "Unrecognized target orientation, correcting");
            self.save_target(&target)?;
        }
        Ok(target)
    }

    fn save_target(&self, target: &KioskTarget) -> Result<(), StoreError> {
        let degrees = target.preferred_orientation.degrees().to_string();
        Self::write_record(
            &self.paths.target_file(&target.id),
            &[
                (keys::NAME, &target.display_name),
                (keys::URL, &target.url),
                (keys::ORIENTATION, &degrees),
            ],
        )
    }

    fn list_targets(&self) -> Result<Vec<KioskTarget>, StoreError> {
        self.target_ids()?.iter().map(|id| self.load_target(id)).collect()
    }

    fn peek_targets(&self) -> Result<Vec<KioskTarget>, StoreError> {
        self.target_ids()?
            .iter()
            .map(|id| self.read_target(id).map(|(target, _)| target))
            .collect()
    }

    fn load_display_state(&self) -> Result<SystemDisplayState, StoreError> {
        let (state, unrecognized) = self.read_display_state()?;
        if let Some(raw) = unrecognized {
            warn!(value = %raw, using = %state.saved_orientation, "Unrecognized saved orientation, correcting");
            self.save_display_state(&state)?;
        }
        Ok(state)
    }

    fn peek_display_state(&self) -> Result<SystemDisplayState, StoreError> {
        self.read_display_state().map(|(state, _)| state)
    }

    fn save_display_state(&self, state: &SystemDisplayState) -> Result<(), StoreError> {
        let degrees = state.saved_orientation.degrees().to_string();
        Self::write_record(
            &self.paths.display_file(),
            &[
                (keys::OUTPUT, &state.output_identifier),
                (keys::SAVED_ORIENTATION, &degrees),
            ],
        )?;
        info!(output = %state.output_identifier, orientation = %state.saved_orientation, "Saved display state");
        Ok(())
    }
}

/// Parse KEY=value lines; blank lines and '#' comments are ignored
fn parse_record(contents: &str) -> Result<BTreeMap<String, String>, String> {
    let mut fields = BTreeMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected KEY=value", number + 1))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("line {}: empty key", number + 1));
        }
        fields.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(fields)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Values that `parse_record` would trim or unquote get wrapped in double quotes
fn quote_if_needed(value: &str) -> Cow<'_, str> {
    let ambiguous = value.starts_with(['"', '\'']) || value.ends_with(['"', '\'']) || value.trim() != value;
    if ambiguous {
        Cow::Owned(format!("\"{value}\""))
    } else {
        Cow::Borrowed(value)
    }
}

fn render_record(fields: &[(&str, &str)]) -> Result<String, String> {
    let mut out = String::from("# Managed by pi-kiosk, replaced whole on every write\n");
    for (key, value) in fields {
        if value.contains(['\n', '\r']) {
            return Err(format!("value for {key} contains a line break"));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(&quote_if_needed(value));
        out.push('\n');
    }
    Ok(out)
}

/// Mode of newly created records
const RECORD_MODE: u32 = 0o644;

/// Replace `path` with `contents` via a synced temp file in the same directory
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    // Records are written by root at provisioning and read by the kiosk user;
    // keep an existing file's mode, otherwise make it world-readable
    let mode = match fs::metadata(path) {
        Ok(meta) => meta.permissions().mode() & 0o7777,
        Err(_) => RECORD_MODE,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    // Set explicitly so the umask does not apply
    tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
