use std::path::{Path, PathBuf};

use crate::constants::paths;
use crate::types::TargetId;

/// Layout of the state root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root: explicit flag > PI_KIOSK_HOME > XDG config dir
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        if let Some(root) = explicit {
            return Self::new(root);
        }
        if let Some(root) = std::env::var_os(paths::ROOT_ENV).filter(|v| !v.is_empty()) {
            return Self::new(PathBuf::from(root));
        }
        let mut root = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        root.push(paths::APP_DIR);
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(paths::SETTINGS_FILE)
    }

    pub fn display_file(&self) -> PathBuf {
        self.root.join(paths::DISPLAY_FILE)
    }

    pub fn targets_dir(&self) -> PathBuf {
        self.root.join(paths::TARGETS_DIR)
    }

    pub fn target_file(&self, id: &TargetId) -> PathBuf {
        self.targets_dir()
            .join(format!("{}.{}", id.as_str(), paths::TARGET_EXT))
    }

    /// Isolated browser profile for one target
    pub fn profile_dir(&self, id: &TargetId) -> PathBuf {
        self.root.join(paths::PROFILES_DIR).join(id.as_str())
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(paths::LOG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_wins() {
        let paths = Paths::resolve(Some(PathBuf::from("/tmp/kiosk-root")));
        assert_eq!(paths.root(), Path::new("/tmp/kiosk-root"));
    }

    #[test]
    fn test_layout() {
        let paths = Paths::new("/srv/kiosk");
        let id: TargetId = "kuma".parse().unwrap();
        assert_eq!(paths.target_file(&id), PathBuf::from("/srv/kiosk/targets/kuma.env"));
        assert_eq!(paths.display_file(), PathBuf::from("/srv/kiosk/display.env"));
        assert_eq!(paths.profile_dir(&id), PathBuf::from("/srv/kiosk/profiles/kuma"));
        assert_eq!(paths.log_file(), PathBuf::from("/srv/kiosk/kiosk.log"));
    }
}
