use anyhow::{bail, Result};
use std::path::Path;
use std::time::Instant;

use crate::commands::{interrupt_on_ctrl_c, print_box};
use crate::core::automation::{load_script, AutomationContext, AutomationRegistry};
use crate::core::handler::AutomatedHandler;
use crate::core::process::{ConsoleProcessLog, HandlerRegistry};
use crate::core::session::{InstallSession, MANIFEST_NAME};

pub fn auto(installer: &Path, script: &Path) -> Result<()> {
    if !installer.join(MANIFEST_NAME).is_file() {
        bail!("Installer not found: {}", installer.display());
    }
    if !script.is_file() {
        bail!("Install script not found: {}", script.display());
    }

    let mut session = InstallSession::load(installer)?;
    let entries = load_script(script)?;
    eprintln!("Replaying {} panels from {}", entries.len(), script.display());

    interrupt_on_ctrl_c(session.interrupts.clone());
    let start = Instant::now();
    let mut handler = AutomatedHandler::default();
    let mut log = ConsoleProcessLog;
    let handlers = HandlerRegistry::new();
    let mut ctx = AutomationContext {
        session: &mut session,
        handler: &mut handler,
        process_log: &mut log,
        process_handlers: &handlers,
        volume_locator: None,
    };
    AutomationRegistry::builtin().run_script(&mut ctx, &entries)?;
    let elapsed = start.elapsed().as_secs_f64();

    let mut lines = vec![
        format!("Installed: {} paths", session.uninstall.files().len()),
        format!("Time: {:.1}s", elapsed),
    ];
    if !handler.errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        lines.extend(handler.errors.iter().map(|e| format!("  {e}")));
    }
    let color = if handler.errors.is_empty() { "\x1b[32m" } else { "\x1b[33m" };
    let line_refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
    print_box("Automated Install", &line_refs, color);

    Ok(())
}
