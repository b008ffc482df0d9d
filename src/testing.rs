//! In-memory stand-ins for the external collaborators, shared by unit tests

use anyhow::{Result, anyhow, bail};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use crate::browser::BrowserControl;
use crate::config::Store;
use crate::display::{DisplayTool, OutputInfo};
use crate::error::StoreError;
use crate::network::NetworkProbe;
use crate::services::ServiceManager;
use crate::types::{KioskTarget, Orientation, SystemDisplayState, TargetId};

/// Display tool keeping transforms in a map
pub struct FakeDisplay {
    transforms: RefCell<BTreeMap<String, String>>,
    installed: Cell<bool>,
    failing_lists: Cell<u32>,
    ignore_sets: Cell<bool>,
    set_calls: Cell<u32>,
}

impl FakeDisplay {
    pub fn with_output(name: &str, transform: &str) -> Self {
        Self {
            transforms: RefCell::new(BTreeMap::from([(name.to_string(), transform.to_string())])),
            installed: Cell::new(true),
            failing_lists: Cell::new(0),
            ignore_sets: Cell::new(false),
            set_calls: Cell::new(0),
        }
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.set(installed);
    }

    /// Fail the next `count` list calls (tool not ready yet)
    pub fn fail_lists(&self, count: u32) {
        self.failing_lists.set(count);
    }

    /// Accept set calls without changing anything (verification will fail)
    pub fn ignore_sets(&self, ignore: bool) {
        self.ignore_sets.set(ignore);
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.get()
    }

    pub fn transform(&self, output: &str) -> Option<String> {
        self.transforms.borrow().get(output).cloned()
    }
}

impl DisplayTool for FakeDisplay {
    fn is_installed(&self) -> bool {
        self.installed.get()
    }

    fn list_outputs(&self) -> Result<Vec<OutputInfo>> {
        let failing = self.failing_lists.get();
        if failing > 0 {
            self.failing_lists.set(failing.saturating_sub(1));
            bail!("compositor not ready");
        }
        Ok(self
            .transforms
            .borrow()
            .iter()
            .map(|(name, transform)| OutputInfo {
                name: name.clone(),
                transform: transform.clone(),
                enabled: true,
            })
            .collect())
    }

    fn set_transform(&self, output: &str, orientation: Orientation) -> Result<()> {
        self.set_calls.set(self.set_calls.get() + 1);
        if self.ignore_sets.get() {
            return Ok(());
        }
        let mut transforms = self.transforms.borrow_mut();
        let current = transforms
            .get_mut(output)
            .ok_or_else(|| anyhow!("no such output {output}"))?;
        *current = orientation.transform().to_string();
        Ok(())
    }
}

/// Store keeping records in memory
#[derive(Default)]
pub struct MemoryStore {
    targets: RefCell<BTreeMap<TargetId, KioskTarget>>,
    display: RefCell<Option<SystemDisplayState>>,
    fail_writes: Cell<bool>,
}

impl MemoryStore {
    pub fn with_targets(targets: Vec<KioskTarget>) -> Self {
        let store = Self::default();
        for target in targets {
            store.targets.borrow_mut().insert(target.id.clone(), target);
        }
        store
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::io(
                "memory",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn load_target(&self, id: &TargetId) -> Result<KioskTarget, StoreError> {
        self.targets
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn save_target(&self, target: &KioskTarget) -> Result<(), StoreError> {
        self.check_writable()?;
        self.targets.borrow_mut().insert(target.id.clone(), target.clone());
        Ok(())
    }

    fn list_targets(&self) -> Result<Vec<KioskTarget>, StoreError> {
        Ok(self.targets.borrow().values().cloned().collect())
    }

    fn peek_targets(&self) -> Result<Vec<KioskTarget>, StoreError> {
        self.list_targets()
    }

    fn load_display_state(&self) -> Result<SystemDisplayState, StoreError> {
        Ok(self.display.borrow().clone().unwrap_or_default())
    }

    fn peek_display_state(&self) -> Result<SystemDisplayState, StoreError> {
        self.load_display_state()
    }

    fn save_display_state(&self, state: &SystemDisplayState) -> Result<(), StoreError> {
        self.check_writable()?;
        *self.display.borrow_mut() = Some(state.clone());
        Ok(())
    }
}

/// Service manager tracking enabled/active units
#[derive(Default)]
pub struct FakeServices {
    active: RefCell<BTreeSet<String>>,
    enabled: RefCell<BTreeSet<String>>,
    calls: RefCell<Vec<String>>,
}

impl FakeServices {
    pub fn is_enabled(&self, unit: &str) -> bool {
        self.enabled.borrow().contains(unit)
    }

    pub fn active_units(&self) -> Vec<String> {
        self.active.borrow().iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, verb: &str, unit: &str) {
        self.calls.borrow_mut().push(format!("{verb} {unit}"));
    }
}

impl ServiceManager for FakeServices {
    fn enable(&self, unit: &str) -> Result<()> {
        self.record("enable", unit);
        self.enabled.borrow_mut().insert(unit.to_string());
        Ok(())
    }

    fn disable(&self, unit: &str) -> Result<()> {
        self.record("disable", unit);
        self.enabled.borrow_mut().remove(unit);
        Ok(())
    }

    fn stop(&self, unit: &str) -> Result<()> {
        self.record("stop", unit);
        self.active.borrow_mut().remove(unit);
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<()> {
        self.record("restart", unit);
        self.active.borrow_mut().insert(unit.to_string());
        Ok(())
    }

    fn is_active(&self, unit: &str) -> Result<bool> {
        Ok(self.active.borrow().contains(unit))
    }

    fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload", "");
        Ok(())
    }
}

pub struct FakeProbe {
    reachable: bool,
    calls: Cell<u32>,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl NetworkProbe for FakeProbe {
    fn is_reachable(&self) -> bool {
        self.calls.set(self.calls.get() + 1);
        self.reachable
    }
}

#[derive(Default)]
pub struct FakeBrowser {
    kills: Cell<u32>,
}

impl FakeBrowser {
    pub fn kills(&self) -> u32 {
        self.kills.get()
    }
}

impl BrowserControl for FakeBrowser {
    fn kill_stale(&self) -> Result<usize> {
        self.kills.set(self.kills.get() + 1);
        Ok(0)
    }
}

/// Captures formatted tracing output so tests can assert on warnings
#[derive(Clone, Default)]
pub struct LogCapture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Run `f` with a subscriber writing into this capture
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Kuma (portrait) and Kibana (landscape) dashboards
pub fn sample_targets() -> Vec<KioskTarget> {
    vec![
        KioskTarget::new("kuma".parse().unwrap(), "Uptime Kuma", "http://kuma.lan:3001", Orientation::PortraitRight),
        KioskTarget::new("kibana".parse().unwrap(), "Kibana", "http://kibana.lan:5601", Orientation::Landscape),
    ]
}
