use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::core::properties::render_template;
use crate::core::session::{InstallSession, MANIFEST_NAME};

pub fn template(installer: &Path, output: &Path) -> Result<()> {
    if !installer.join(MANIFEST_NAME).is_file() {
        bail!("Installer not found: {}", installer.display());
    }
    let session = InstallSession::load(installer)?;
    fs::write(output, render_template(&session))
        .with_context(|| format!("writing {}", output.display()))?;
    eprintln!("Wrote properties template to {}", output.display());
    Ok(())
}
