//! Full-screen browser: launch command, stale-process cleanup, crash marker

use anyhow::{Context, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::store::write_atomic;
use crate::constants::{browser, paths, timing};
use crate::retry::{RetryPolicy, retry};
use crate::types::KioskTarget;

/// Control over browser processes the supervisor does not own
pub trait BrowserControl {
    /// Terminate every full-screen browser still running; returns how many were signalled
    fn kill_stale(&self) -> Result<usize>;
}

/// Finds kiosk browsers through /proc and signals them with SIGTERM
#[derive(Debug, Clone)]
pub struct ProcBrowser {
    proc_dir: PathBuf,
    names: Vec<String>,
    /// How long a signalled browser gets before SIGKILL
    grace: Duration,
}

impl ProcBrowser {
    pub fn new(binary: &str) -> Self {
        let mut names: Vec<String> = browser::PROCESS_NAMES.iter().map(|n| n.to_string()).collect();
        let own = basename(binary.as_bytes());
        if !own.is_empty() && !names.iter().any(|n| n == own) {
            names.push(own.to_string());
        }
        Self {
            proc_dir: PathBuf::from(paths::PROC_DIR),
            names,
            grace: Duration::from_millis(timing::STALE_GRACE_MS),
        }
    }

    #[cfg(test)]
    fn with_proc_dir(mut self, proc_dir: &Path) -> Self {
        self.proc_dir = proc_dir.to_path_buf();
        self
    }

    #[cfg(test)]
    fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Zombies count as gone; their parent just has not reaped them yet
    fn is_alive(&self, pid: i32) -> bool {
        let Ok(stat) = fs::read_to_string(self.proc_dir.join(pid.to_string()).join("stat")) else {
            return false;
        };
        // Field 3 follows the parenthesised command name, which may itself contain ')'
        let state = stat
            .rfind(')')
            .and_then(|end| stat[end + 1..].split_whitespace().next());
        !matches!(state, Some("Z" | "X" | "x"))
    }

    /// Poll until every pid is gone or `wait` runs out; returns the survivors
    fn wait_for_exit(&self, pids: &[i32], wait: Duration) -> Vec<i32> {
        let policy = RetryPolicy::new(Duration::from_millis(timing::CHILD_POLL_MS), wait);
        let alive = || pids.iter().copied().filter(|pid| self.is_alive(*pid)).collect::<Vec<_>>();
        let outcome = retry(&policy, "stale browser exit", || {
            let survivors = alive();
            if survivors.is_empty() {
                Ok(())
            } else {
                Err(format!("{} still running", survivors.len()))
            }
        });
        match outcome {
            Ok(()) => Vec::new(),
            Err(_) => alive(),
        }
    }

    /// PIDs of running kiosk browsers, excluding this process
    pub fn find_stale(&self) -> Result<Vec<i32>> {
        let own_pid = std::process::id() as i32;
        let mut pids = Vec::new();

        let entries = fs::read_dir(&self.proc_dir)
            .with_context(|| format!("Failed to read {}", self.proc_dir.display()))?;
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            if pid == own_pid {
                continue;
            }
            // Processes exit while we scan; unreadable entries are skipped
            let Ok(cmdline) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            if is_kiosk_browser(&cmdline, &self.names) {
                pids.push(pid);
            }
        }

        pids.sort_unstable();
        Ok(pids)
    }
}

impl BrowserControl for ProcBrowser {
    /// SIGTERM every stale browser, SIGKILL whatever outlives the grace period
    /// Only returns Ok once none of them is left on screen
    fn kill_stale(&self) -> Result<usize> {
        let mut signalled = Vec::new();
        for pid in self.find_stale()? {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid, "Terminating stale kiosk browser");
                    signalled.push(pid);
                }
                Err(e) => warn!(pid, error = %e, "Failed to terminate stale kiosk browser"),
            }
        }
        if signalled.is_empty() {
            return Ok(0);
        }

        let survivors = self.wait_for_exit(&signalled, self.grace);
        for &pid in &survivors {
            warn!(pid, grace = ?self.grace, "Stale kiosk browser ignored SIGTERM, killing");
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
                warn!(pid, error = %e, "Failed to kill stale kiosk browser");
            }
        }
        if !survivors.is_empty() {
            let remaining = self.wait_for_exit(&survivors, Duration::from_millis(timing::KILL_WAIT_MS));
            if !remaining.is_empty() {
                bail!("stale kiosk browsers still running after SIGKILL: {remaining:?}");
            }
        }
        Ok(signalled.len())
    }
}

/// NUL-separated /proc cmdline of a full-screen browser we launched
fn is_kiosk_browser(cmdline: &[u8], names: &[String]) -> bool {
    let mut args = cmdline.split(|b| *b == 0).filter(|a| !a.is_empty());
    let Some(program) = args.next() else {
        return false;
    };
    let program = basename(program);
    names.iter().any(|n| n == program) && args.any(|a| a == b"--kiosk")
}

fn basename(path: &[u8]) -> &str {
    let name = path.rsplit(|b| *b == b'/').next().unwrap_or(path);
    std::str::from_utf8(name).unwrap_or("")
}

/// Builds the browser command line for one target
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    binary: String,
    extra_flags: Vec<String>,
    env: Vec<(String, String)>,
}

impl BrowserLauncher {
    pub fn new(binary: impl Into<String>, extra_flags: Vec<String>, env: Vec<(String, String)>) -> Self {
        Self {
            binary: binary.into(),
            extra_flags,
            env,
        }
    }

    pub fn args(&self, target: &KioskTarget, profile_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = browser::KIOSK_FLAGS.iter().map(|f| f.to_string()).collect();
        args.push(format!("--user-data-dir={}", profile_dir.display()));
        args.extend(self.extra_flags.iter().cloned());
        args.push(target.url.clone());
        args
    }

    /// Launch the browser for `target` with an isolated profile directory
    pub fn spawn(&self, target: &KioskTarget, profile_dir: &Path) -> Result<Child> {
        fs::create_dir_all(profile_dir)
            .with_context(|| format!("Failed to create profile dir {}", profile_dir.display()))?;
        if let Err(e) = clear_crash_marker(profile_dir) {
            warn!(profile = %profile_dir.display(), error = %e, "Could not clear crash marker");
        }

        let child = Command::new(&self.binary)
            .args(self.args(target, profile_dir))
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to launch {} for '{}'", self.binary, target.id))?;
        info!(target = %target.id, pid = child.id(), url = %target.url, "Launched kiosk browser");
        Ok(child)
    }
}

/// Mark the last browser exit as clean so no restore bubble appears
/// Returns whether the preferences file needed rewriting
pub fn clear_crash_marker(profile_dir: &Path) -> Result<bool> {
    let path = profile_dir.join(browser::PREFERENCES_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let mut prefs: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let Some(profile) = prefs.get_mut("profile").and_then(|p| p.as_object_mut()) else {
        return Ok(false);
    };

    let crashed = profile.get("exit_type").and_then(|v| v.as_str()) != Some("Normal")
        || profile.get("exited_cleanly").and_then(|v| v.as_bool()) != Some(true);
    if !crashed {
        return Ok(false);
    }

    profile.insert("exit_type".to_string(), serde_json::Value::from("Normal"));
    profile.insert("exited_cleanly".to_string(), serde_json::Value::from(true));
    let json = serde_json::to_vec(&prefs).context("Failed to serialize browser preferences")?;
    write_atomic(&path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Cleared browser crash marker");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Orientation, TargetId};

    fn target() -> KioskTarget {
        let id: TargetId = "kuma".parse().unwrap();
        KioskTarget::new(id, "Kuma", "http://kuma.lan:3001", Orientation::PortraitRight)
    }

    fn names() -> Vec<String> {
        vec!["chromium-browser".to_string()]
    }

    #[test]
    fn test_args_include_profile_and_url_last() {
        let launcher = BrowserLauncher::new("chromium-browser", vec!["--ozone-platform=wayland".to_string()], Vec::new());
        let args = launcher.args(&target(), Path::new("/srv/kiosk/profiles/kuma"));

        assert!(args.contains(&"--kiosk".to_string()));
        assert!(args.contains(&"--no-first-run".to_string()));
        assert!(args.contains(&"--disable-session-crashed-bubble".to_string()));
        assert!(args.contains(&"--user-data-dir=/srv/kiosk/profiles/kuma".to_string()));
        assert!(args.contains(&"--ozone-platform=wayland".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("http://kuma.lan:3001"));
    }

    #[test]
    fn test_is_kiosk_browser() {
        assert!(is_kiosk_browser(b"/usr/lib/chromium-browser/chromium-browser\0--kiosk\0http://a\0", &names()));
        assert!(!is_kiosk_browser(b"chromium-browser\0http://a\0", &names()));
        assert!(!is_kiosk_browser(b"firefox\0--kiosk\0", &names()));
        assert!(!is_kiosk_browser(b"", &names()));
    }

    #[test]
    fn test_find_stale_scans_proc() {
        let proc_dir = tempfile::tempdir().unwrap();
        let entries: [(&str, &[u8]); 4] = [
            ("101", b"chromium-browser\0--kiosk\0http://a\0"),
            ("102", b"chromium-browser\0http://personal\0"),
            ("103", b"/bin/bash\0"),
            ("self", b"chromium-browser\0--kiosk\0"),
        ];
        for (name, cmdline) in entries {
            let dir = proc_dir.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("cmdline"), cmdline).unwrap();
        }

        let control = ProcBrowser::new("chromium-browser").with_proc_dir(proc_dir.path());
        assert_eq!(control.find_stale().unwrap(), vec![101]);
    }

    #[test]
    fn test_custom_binary_name_is_matched() {
        let control = ProcBrowser::new("/opt/browser/kiosk-chrome");
        assert!(control.names.iter().any(|n| n == "kiosk-chrome"));
    }

    #[test]
    fn test_clear_crash_marker() {
        let profile = tempfile::tempdir().unwrap();
        let prefs = profile.path().join("Default/Preferences");
        fs::create_dir_all(prefs.parent().unwrap()).unwrap();
        fs::write(&prefs, r#"{"profile":{"exit_type":"Crashed","exited_cleanly":false,"name":"Kiosk"}}"#).unwrap();

        assert!(clear_crash_marker(profile.path()).unwrap());
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&prefs).unwrap()).unwrap();
        assert_eq!(value["profile"]["exit_type"], "Normal");
        assert_eq!(value["profile"]["exited_cleanly"], true);
        assert_eq!(value["profile"]["name"], "Kiosk");

        // Already clean: nothing to do
        assert!(!clear_crash_marker(profile.path()).unwrap());
    }

    #[test]
    fn test_clear_crash_marker_without_preferences() {
        let profile = tempfile::tempdir().unwrap();
        assert!(!clear_crash_marker(profile.path()).unwrap());
    }

    fn spawn_fake_kiosk(program: &Path, script: &str) -> std::process::Child {
        // A freshly copied binary can briefly report ETXTBSY while another test forks
        for _ in 0..20 {
            match Command::new(program).args(["-c", script, "--kiosk"]).spawn() {
                Ok(child) => return child,
                Err(e) if e.raw_os_error() == Some(nix::libc::ETXTBSY) => {
                    std::thread::sleep(Duration::from_millis(50))
                }
                Err(e) => panic!("spawn {}: {e}", program.display()),
            }
        }
        panic!("{} stayed busy", program.display());
    }

    #[test]
    fn test_kill_stale_terminates_and_escalates() {
        use std::os::unix::process::ExitStatusExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chromium-browser");
        fs::copy("/bin/sh", &fake).unwrap();
        let control = ProcBrowser::new("chromium-browser").with_grace(Duration::from_millis(300));

        // Exits on SIGTERM
        let mut polite = spawn_fake_kiosk(&fake, "while :; do sleep 0.05; done");
        std::thread::sleep(Duration::from_millis(200));
        assert!(control.kill_stale().unwrap() >= 1);
        assert_eq!(polite.wait().unwrap().signal(), Some(Signal::SIGTERM as i32));

        // Ignores SIGTERM, so only SIGKILL gets it off the screen
        let mut stubborn = spawn_fake_kiosk(&fake, "trap '' TERM; while :; do sleep 0.05; done");
        std::thread::sleep(Duration::from_millis(300));
        assert!(control.kill_stale().unwrap() >= 1);
        assert_eq!(stubborn.try_wait().unwrap().and_then(|s| s.signal()), Some(Signal::SIGKILL as i32));
        assert!(control.find_stale().unwrap().iter().all(|pid| *pid != stubborn.id() as i32));
    }

    #[test]
    fn test_zombies_are_not_alive() {
        let proc_dir = tempfile::tempdir().unwrap();
        for (pid, stat) in [("201", "201 (chromium (x)) S 1 201"), ("202", "202 (chromium) Z 1 202")] {
            let dir = proc_dir.path().join(pid);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("stat"), stat).unwrap();
        }

        let control = ProcBrowser::new("chromium-browser").with_proc_dir(proc_dir.path());
        assert!(control.is_alive(201));
        assert!(!control.is_alive(202));
        assert!(!control.is_alive(203));
    }
}
