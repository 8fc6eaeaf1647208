//! Properties files for unattended console installs.
//!
//! `INSTALL_PATH` sets the target, `pack.<name>` selects or deselects a pack and
//! every other key becomes an installer variable.

use anyhow::{Context, Result};

use crate::core::session::InstallSession;
use crate::utils::fs::native_path;

const PACK_PREFIX: &str = "pack.";

/// Renders the current state of `session` as an editable template.
pub fn render_template(session: &InstallSession) -> String {
    let info = &session.manifest.info;
    let title = format!("{} {}", info.app_name, info.app_version);
    let mut out = format!("# Installation properties for {}\n", title.trim_end());
    out.push_str("INSTALL_PATH=");
    out.push_str(session.variables.get("INSTALL_PATH").unwrap_or_default());
    out.push('\n');

    out.push_str("\n# Packs\n");
    for (index, pack) in session.manifest.packs.iter().enumerate() {
        if !pack.description.is_empty() {
            out.push_str(&format!("# {}\n", pack.description));
        }
        let selected = session.selected_packs.contains(&index);
        out.push_str(&format!("{PACK_PREFIX}{}={selected}\n", pack.name));
    }

    if !session.manifest.variables.is_empty() {
        out.push_str("\n# Variables\n");
        for name in session.manifest.variables.keys() {
            let value = session.variables.get(name).unwrap_or_default();
            out.push_str(&format!("{name}={value}\n"));
        }
    }
    out
}

/// Applies a properties file to the session.
pub fn apply_properties(session: &mut InstallSession, text: &str) -> Result<()> {
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(split) = line.find(['=', ':']) else {
            anyhow::bail!("line {}: expected key=value", number + 1);
        };
        let key = line[..split].trim();
        let value = line[split + 1..].trim();

        if key == "INSTALL_PATH" {
            let path = session.variables.substitute(value);
            session.set_install_path(native_path(&path));
        } else if let Some(pack) = key.strip_prefix(PACK_PREFIX) {
            let selected: bool = value
                .parse()
                .with_context(|| format!("line {}: {key} must be true or false", number + 1))?;
            session.set_pack_selected(pack, selected)?;
        } else {
            session.variables.set(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstallManifest, Pack};
    use std::path::Path;

    fn session() -> InstallSession {
        let mut manifest = InstallManifest::default();
        manifest.info.app_name = "Demo".to_string();
        manifest.info.app_version = "1.2".to_string();
        manifest.default_install_path = Some("/opt/demo".to_string());
        manifest.variables.insert("PORT".to_string(), "8080".to_string());
        manifest.packs = vec![
            Pack {
                name: "core".to_string(),
                description: "Runtime files".to_string(),
                required: true,
                ..Default::default()
            },
            Pack {
                name: "docs".to_string(),
                preselected: false,
                ..Default::default()
            },
        ];
        InstallSession::new(Path::new("/installer"), manifest)
    }

    #[test]
    fn test_template_lists_packs_and_variables() {
        let template = render_template(&session());
        assert_eq!(
            template,
            "# Installation properties for Demo 1.2\n\
             INSTALL_PATH=/opt/demo\n\
             \n# Packs\n\
             # Runtime files\n\
             pack.core=true\n\
             pack.docs=false\n\
             \n# Variables\n\
             PORT=8080\n"
        );
    }

    #[test]
    fn test_apply_round_trips_template() {
        let mut session = session();
        let edited = render_template(&session)
            .replace("pack.docs=false", "pack.docs=true")
            .replace("PORT=8080", "PORT = 9090")
            .replace("INSTALL_PATH=/opt/demo", "INSTALL_PATH=/srv/$APP_NAME");
        apply_properties(&mut session, &edited).unwrap();
        assert_eq!(session.variables.get("INSTALL_PATH"), Some("/srv/Demo"));
        assert_eq!(session.variables.get("PORT"), Some("9090"));
        assert_eq!(session.selected_packs, vec![0, 1]);
    }

    #[test]
    fn test_apply_rejects_bad_lines() {
        let mut session = session();
        assert!(apply_properties(&mut session, "just text").is_err());
        assert!(apply_properties(&mut session, "pack.docs=maybe").is_err());
        assert!(apply_properties(&mut session, "pack.unknown=true").is_err());
    }
}
