//! Application-wide constants
//!
//! Default values, file names and external command names used throughout
//! the kiosk manager. Settings in `settings.json` override most of these.

/// On-disk layout of the state root
pub mod paths {
    /// Directory name under the XDG config dir
    pub const APP_DIR: &str = "pi-kiosk";

    /// Environment variable overriding the state root
    pub const ROOT_ENV: &str = "PI_KIOSK_HOME";

    /// Operator settings (JSON)
    pub const SETTINGS_FILE: &str = "settings.json";

    /// System display state record
    pub const DISPLAY_FILE: &str = "display.env";

    /// Directory holding one record per kiosk target
    pub const TARGETS_DIR: &str = "targets";

    /// Extension of target records
    pub const TARGET_EXT: &str = "env";

    /// Per-target browser profile directories
    pub const PROFILES_DIR: &str = "profiles";

    /// Append-only event log
    pub const LOG_FILE: &str = "kiosk.log";

    /// Where the kernel exposes process command lines
    pub const PROC_DIR: &str = "/proc";
}

/// Record keys (plain KEY=value lines)
pub mod keys {
    pub const NAME: &str = "KIOSK_NAME";
    pub const URL: &str = "KIOSK_URL";
    pub const ORIENTATION: &str = "KIOSK_ORIENTATION";
    pub const OUTPUT: &str = "DISPLAY_OUTPUT";
    pub const SAVED_ORIENTATION: &str = "SAVED_ORIENTATION";
}

/// Display defaults
pub mod display {
    /// Output used when detection fails or nothing is persisted yet
    pub const DEFAULT_OUTPUT: &str = "HDMI-A-1";

    /// wlr-roots output management client
    pub const DEFAULT_TOOL: &str = "wlr-randr";
}

/// Bounded wait defaults (seconds unless stated)
pub mod timing {
    pub const TOOL_WAIT_SECS: u64 = 30;
    pub const TOOL_POLL_SECS: u64 = 1;
    pub const NETWORK_WAIT_SECS: u64 = 60;
    pub const NETWORK_POLL_SECS: u64 = 2;
    pub const SETTLE_DELAY_MS: u64 = 2000;
    pub const RESTART_MIN_SECS: u64 = 10;
    pub const PROBE_TIMEOUT_MS: u64 = 1500;

    /// How often the session runner checks its child and the shutdown flag
    pub const CHILD_POLL_MS: u64 = 250;

    /// Time a stale browser gets to exit after SIGTERM
    pub const STALE_GRACE_MS: u64 = 3000;

    /// Time allowed for the kernel to tear a process down after SIGKILL
    pub const KILL_WAIT_MS: u64 = 1000;
}

/// Browser launch defaults
pub mod browser {
    pub const DEFAULT_BINARY: &str = "chromium-browser";

    /// Process names treated as a full-screen kiosk browser when killing stale sessions
    pub const PROCESS_NAMES: &[&str] = &["chromium-browser", "chromium", "chrome"];

    /// Flags enforcing full-screen, no first-run UI and no crash-restore prompts
    pub const KIOSK_FLAGS: &[&str] = &[
        "--kiosk",
        "--noerrdialogs",
        "--disable-infobars",
        "--no-first-run",
        "--disable-session-crashed-bubble",
        "--disable-features=TranslateUI",
        "--check-for-update-interval=31536000",
    ];

    /// Chromium profile preferences file, relative to the user data dir
    pub const PREFERENCES_FILE: &str = "Default/Preferences";
}

/// Network reachability defaults
pub mod network {
    pub const PROBE_ADDRESSES: &[&str] = &["1.1.1.1:53", "8.8.8.8:53"];
}

/// systemd integration
pub mod systemd {
    pub const SYSTEMCTL: &str = "systemctl";
    pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";
    pub const UNIT_PREFIX: &str = "kiosk-";
    pub const ROTATION_UNIT: &str = "kiosk-rotation.service";
    pub const DEFAULT_USER: &str = "pi";
}
