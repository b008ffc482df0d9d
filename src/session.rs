//! Foreground kiosk session, run by the per-target systemd unit
//!
//! Waits (bounded) for the network, clears out stale browsers, then keeps one
//! browser process alive until asked to stop. Relaunches are spaced by a
//! minimum gap so a browser that dies on startup cannot spin the CPU.

use anyhow::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserControl, BrowserLauncher};
use crate::constants::timing;
use crate::error::KioskError;
use crate::network::{NetworkProbe, wait_for_network};
use crate::retry::RetryPolicy;
use crate::types::{KioskTarget, SessionState};

/// How long a browser gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub launches: u32,
    pub network_ready: bool,
}

enum ChildExit {
    Exited(ExitStatus),
    Shutdown,
}

pub struct SessionRunner<'a> {
    launcher: &'a BrowserLauncher,
    browsers: &'a dyn BrowserControl,
    probe: &'a dyn NetworkProbe,
    network_policy: RetryPolicy,
    min_gap: Duration,
    poll: Duration,
}

impl<'a> SessionRunner<'a> {
    pub fn new(
        launcher: &'a BrowserLauncher,
        browsers: &'a dyn BrowserControl,
        probe: &'a dyn NetworkProbe,
        network_policy: RetryPolicy,
        min_gap: Duration,
    ) -> Self {
        Self {
            launcher,
            browsers,
            probe,
            network_policy,
            min_gap,
            poll: Duration::from_millis(timing::CHILD_POLL_MS),
        }
    }

    #[cfg(test)]
    fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Run until `shutdown` is set; the browser is relaunched whenever it exits
    pub fn run(&self, target: &KioskTarget, profile_dir: &Path, shutdown: &AtomicBool) -> Result<RunSummary> {
        if !target.has_url() {
            return Err(KioskError::TargetNotConfigured(target.id.clone()).into());
        }

        info!(target = %target.id, state = SessionState::Starting.label(), "Kiosk session starting");
        info!(target = %target.id, state = SessionState::WaitingNetwork.label(), "Waiting for network");
        let network_ready = wait_for_network(self.probe, &self.network_policy);

        match self.browsers.kill_stale() {
            Ok(0) => {}
            Ok(count) => info!(count, "Cleared stale kiosk browsers"),
            Err(e) => warn!(error = %e, "Could not scan for stale kiosk browsers"),
        }

        let mut launches = 0;
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            launches += 1;

            match self.launcher.spawn(target, profile_dir) {
                Ok(mut child) => {
                    info!(target = %target.id, state = SessionState::Running.label(), launch = launches, "Kiosk session running");
                    match self.supervise(&mut child, shutdown)? {
                        ChildExit::Shutdown => break,
                        ChildExit::Exited(status) => {
                            warn!(target = %target.id, %status, uptime = ?started.elapsed(), "Kiosk browser exited, relaunching")
                        }
                    }
                }
                Err(e) => error!(target = %target.id, error = %format!("{e:#}"), "Kiosk browser failed to launch"),
            }

            let next = started + self.min_gap;
            let now = Instant::now();
            if next > now {
                debug!(delay = ?(next - now), "Holding off before relaunch");
                self.sleep_unless_shutdown(next - now, shutdown);
            }
        }

        info!(target = %target.id, state = SessionState::Stopped.label(), launches, "Kiosk session stopped");
        Ok(RunSummary {
            launches,
            network_ready,
        })
    }

    fn supervise(&self, child: &mut Child, shutdown: &AtomicBool) -> Result<ChildExit> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                terminate(child)?;
                return Ok(ChildExit::Shutdown);
            }
            if let Some(status) = child.try_wait().context("Failed to poll kiosk browser")? {
                return Ok(ChildExit::Exited(status));
            }
            thread::sleep(self.poll);
        }
    }

    fn sleep_unless_shutdown(&self, total: Duration, shutdown: &AtomicBool) {
        let deadline = Instant::now() + total;
        while !shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.poll.min(deadline - now));
        }
    }
}

/// SIGTERM, then SIGKILL if the browser ignores it
fn terminate(child: &mut Child) -> Result<()> {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        debug!(pid = child.id(), error = %e, "SIGTERM failed, browser probably gone");
    }

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if child.try_wait().context("Failed to poll kiosk browser")?.is_some() {
            info!(pid = child.id(), "Kiosk browser terminated");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(timing::CHILD_POLL_MS));
    }

    warn!(pid = child.id(), "Kiosk browser ignored SIGTERM, killing");
    child.kill().context("Failed to kill kiosk browser")?;
    child.wait().context("Failed to reap kiosk browser")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, FakeProbe};
    use crate::types::{Orientation, TargetId};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    fn target(url: &str) -> KioskTarget {
        let id: TargetId = "kuma".parse().unwrap();
        KioskTarget::new(id, "Kuma", url, Orientation::PortraitRight)
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(2), Duration::from_millis(20))
    }

    fn stop_after(delay: Duration) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        let handle = thread::spawn(move || {
            thread::sleep(delay);
            setter.store(true, Ordering::SeqCst);
        });
        (flag, handle)
    }

    #[test]
    fn test_blank_url_is_rejected_before_launch() {
        let launcher = BrowserLauncher::new("true", Vec::new(), Vec::new());
        let browsers = FakeBrowser::default();
        let probe = FakeProbe::new(true);
        let runner = SessionRunner::new(&launcher, &browsers, &probe, quick_policy(), Duration::ZERO);
        let profile = tempfile::tempdir().unwrap();

        let err = runner
            .run(&target("  "), profile.path(), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<KioskError>(), Some(KioskError::TargetNotConfigured(_))));
        assert_eq!(probe.calls(), 0);
        assert_eq!(browsers.kills(), 0);
    }

    #[test]
    fn test_exiting_browser_is_relaunched_with_minimum_gap() {
        let launcher = BrowserLauncher::new("true", Vec::new(), Vec::new());
        let browsers = FakeBrowser::default();
        let probe = FakeProbe::new(true);
        let runner = SessionRunner::new(&launcher, &browsers, &probe, quick_policy(), Duration::from_millis(40))
            .with_poll(Duration::from_millis(5));
        let profile = tempfile::tempdir().unwrap();

        let (shutdown, handle) = stop_after(Duration::from_millis(200));
        let summary = runner.run(&target("http://kuma.lan:3001"), profile.path(), &shutdown).unwrap();
        handle.join().unwrap();

        assert!(summary.network_ready);
        assert!(summary.launches >= 2, "expected relaunches, got {}", summary.launches);
        // 200ms at a 40ms minimum gap allows at most six launches
        assert!(summary.launches <= 6, "relaunched too fast: {}", summary.launches);
        assert_eq!(browsers.kills(), 1);
    }

    #[test]
    fn test_shutdown_terminates_running_browser() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-browser");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let launcher = BrowserLauncher::new(script.to_string_lossy(), Vec::new(), Vec::new());
        let browsers = FakeBrowser::default();
        let probe = FakeProbe::new(false);
        let runner = SessionRunner::new(&launcher, &browsers, &probe, quick_policy(), Duration::from_secs(10))
            .with_poll(Duration::from_millis(5));

        let started = Instant::now();
        let (shutdown, handle) = stop_after(Duration::from_millis(100));
        let summary = runner
            .run(&target("http://kuma.lan:3001"), &dir.path().join("profile"), &shutdown)
            .unwrap();
        handle.join().unwrap();

        assert_eq!(summary.launches, 1);
        assert!(!summary.network_ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_launch_failure_keeps_retrying_until_shutdown() {
        let launcher = BrowserLauncher::new("/nonexistent/browser", Vec::new(), Vec::new());
        let browsers = FakeBrowser::default();
        let probe = FakeProbe::new(true);
        let runner = SessionRunner::new(&launcher, &browsers, &probe, quick_policy(), Duration::from_millis(30))
            .with_poll(Duration::from_millis(5));
        let profile = tempfile::tempdir().unwrap();

        let (shutdown, handle) = stop_after(Duration::from_millis(120));
        let summary = runner.run(&target("http://kuma.lan:3001"), profile.path(), &shutdown).unwrap();
        handle.join().unwrap();

        assert!(summary.launches >= 2);
    }
}
