//! systemd unit files for kiosk sessions and boot-time rotation restore

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::store::write_atomic;
use crate::constants::systemd;
use crate::types::KioskTarget;

/// Everything a unit needs to call back into this binary
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub exe: PathBuf,
    pub root: PathBuf,
    pub user: String,
    pub env: Vec<(String, String)>,
    pub restart_secs: u64,
}

impl UnitContext {
    fn exec(&self, args: &str) -> String {
        format!(
            "{} --root {} {}",
            quote(&self.exe.to_string_lossy()),
            quote(&self.root.to_string_lossy()),
            args
        )
    }

    fn environment(&self, unit: &mut String) {
        for (key, value) in &self.env {
            let _ = writeln!(unit, "Environment={}", quote(&format!("{key}={value}")));
        }
    }
}

/// Long-running unit keeping one target's browser alive
pub fn session_unit(ctx: &UnitContext, target: &KioskTarget) -> String {
    let mut unit = String::new();
    let _ = writeln!(unit, "[Unit]");
    let _ = writeln!(unit, "Description=Kiosk session: {}", target.display_name);
    let _ = writeln!(unit, "Wants=network-online.target");
    let _ = writeln!(unit, "After=network-online.target graphical.target {}", systemd::ROTATION_UNIT);
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Service]");
    let _ = writeln!(unit, "Type=simple");
    let _ = writeln!(unit, "User={}", ctx.user);
    ctx.environment(&mut unit);
    let _ = writeln!(unit, "ExecStart={}", ctx.exec(&format!("run {}", target.id)));
    let _ = writeln!(unit, "Restart=always");
    let _ = writeln!(unit, "RestartSec={}", ctx.restart_secs);
    let _ = writeln!(unit, "KillSignal=SIGTERM");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Install]");
    let _ = writeln!(unit, "WantedBy=graphical.target");
    unit
}

/// Oneshot re-applying the saved orientation once the compositor is up
pub fn rotation_unit(ctx: &UnitContext) -> String {
    let mut unit = String::new();
    let _ = writeln!(unit, "[Unit]");
    let _ = writeln!(unit, "Description=Restore kiosk display orientation");
    let _ = writeln!(unit, "After=graphical.target");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Service]");
    let _ = writeln!(unit, "Type=oneshot");
    let _ = writeln!(unit, "User={}", ctx.user);
    ctx.environment(&mut unit);
    let _ = writeln!(unit, "ExecStart={}", ctx.exec("restore"));
    let _ = writeln!(unit, "RemainAfterExit=yes");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Install]");
    let _ = writeln!(unit, "WantedBy=graphical.target");
    unit
}

/// Write the rotation unit plus one session unit per target into `unit_dir`
pub fn write_units(unit_dir: &Path, ctx: &UnitContext, targets: &[KioskTarget]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(targets.len() + 1);

    let path = unit_dir.join(systemd::ROTATION_UNIT);
    write_unit(&path, &rotation_unit(ctx))?;
    written.push(path);

    for target in targets {
        let path = unit_dir.join(target.id.unit_name());
        write_unit(&path, &session_unit(ctx, target))?;
        written.push(path);
    }

    info!(dir = %unit_dir.display(), count = written.len(), "Wrote systemd units");
    Ok(written)
}

fn write_unit(path: &Path, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes())
        .with_context(|| format!("Failed to write unit {}", path.display()))
}

/// systemd command-line quoting, only when needed
fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\'') {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
