use anyhow::{bail, Result};
use std::fs;
use std::path::Path;

use crate::commands::print_box;
use crate::core::uninstaller::read_uninstaller;
use crate::types::UninstallerSummary;
use crate::utils::fs::format_bytes;

pub fn inspect(uninstaller: &Path) -> Result<UninstallerSummary> {
    if !uninstaller.is_file() {
        bail!("Uninstaller not found: {}", uninstaller.display());
    }
    let summary = read_uninstaller(uninstaller)?;
    let size = fs::metadata(uninstaller)?.len();

    let mut lines = vec![
        format!("Install path: {}", summary.install_path),
        format!("Files: {}", summary.files.len()),
        format!("Executables: {}", summary.executables),
        format!("Entries: {}", summary.entries.len()),
        format!("Size: {}", format_bytes(size)),
    ];
    if let Some(jar) = summary.jar_location.first() {
        lines.push(format!("Jar: {jar}"));
    }

    if !summary.files.is_empty() && summary.files.len() <= 10 {
        lines.push(String::new());
        lines.push("Installed files:".to_string());
        for file in &summary.files {
            lines.push(format!("  {file}"));
        }
    } else if summary.files.len() > 10 {
        lines.push(String::new());
        lines.push("(Use RUST_LOG=debug for the full list)".to_string());
        for file in &summary.files {
            tracing::debug!(file = %file, "installed");
        }
    }

    let line_refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
    print_box("Uninstaller", &line_refs, "\x1b[36m");
    Ok(summary)
}
