use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::interrupt::InterruptRegistry;
use crate::core::rules::{condition_holds, one_matches_current_system, ManifestRules, RulesEngine};
use crate::core::substitutor::VariableSubstitutor;
use crate::core::uninstall::UninstallData;
use crate::types::{InstallManifest, Pack};
use crate::utils::fs::native_path;

pub const MANIFEST_NAME: &str = "install.json";

/// State of one installer run, passed explicitly to every component.
pub struct InstallSession {
    pub installer_dir: PathBuf,
    pub manifest: InstallManifest,
    pub variables: VariableSubstitutor,
    pub rules: Arc<dyn RulesEngine>,
    /// Indices into `manifest.packs`, in installation order.
    pub selected_packs: Vec<usize>,
    pub uninstall: UninstallData,
    pub interrupts: InterruptRegistry,
    /// Set once the uninstaller jar was written; `None` means no uninstaller.
    pub uninstaller_jar: Option<PathBuf>,
}

impl InstallSession {
    pub fn load(installer_dir: &Path) -> Result<Self> {
        let manifest_path = installer_dir.join(MANIFEST_NAME);
        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let manifest: InstallManifest = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;
        Ok(Self::new(installer_dir, manifest))
    }

    pub fn new(installer_dir: &Path, manifest: InstallManifest) -> Self {
        let mut variables = VariableSubstitutor::new();
        variables.set("APP_NAME", manifest.info.app_name.as_str());
        variables.set("APP_VER", manifest.info.app_version.as_str());
        variables.set("ISO3_LANG", manifest.locale.as_str());
        variables.set("FILE_SEPARATOR", std::path::MAIN_SEPARATOR.to_string());
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            variables.set("USER_HOME", home.to_string_lossy());
        }
        for (name, value) in &manifest.variables {
            variables.set(name.as_str(), value.as_str());
        }

        let rules: Arc<dyn RulesEngine> = Arc::new(ManifestRules::new(manifest.conditions.clone()));
        let mut session = InstallSession {
            installer_dir: installer_dir.to_path_buf(),
            manifest,
            variables,
            rules,
            selected_packs: Vec::new(),
            uninstall: UninstallData::new(),
            interrupts: InterruptRegistry::new(),
            uninstaller_jar: None,
        };
        if let Some(path) = session.manifest.default_install_path.clone() {
            let path = session.variables.substitute(&path);
            session.set_install_path(native_path(&path));
        }
        session.selected_packs = session.default_selection();
        session
    }

    pub fn set_install_path(&mut self, path: PathBuf) {
        self.variables.set("INSTALL_PATH", path.to_string_lossy());
    }

    pub fn install_path(&self) -> Option<PathBuf> {
        self.variables.get("INSTALL_PATH").map(PathBuf::from)
    }

    pub fn is_condition_true(&self, condition: Option<&str>) -> bool {
        condition_holds(self.rules.as_ref(), condition, &self.variables)
    }

    /// Packs that are preselected or required and apply to this system.
    pub fn default_selection(&self) -> Vec<usize> {
        self.manifest
            .packs
            .iter()
            .enumerate()
            .filter(|(_, p)| (p.preselected || p.required) && one_matches_current_system(&p.os))
            .map(|(i, _)| i)
            .collect()
    }

    /// Replaces the selection with the named packs, keeping required ones.
    pub fn select_packs<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            let name = name.as_ref();
            if self.pack_index(name).is_none() {
                anyhow::bail!("Unknown pack: {name}");
            }
        }
        self.selected_packs = self
            .manifest
            .packs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.required || names.iter().any(|n| n.as_ref() == p.name))
            .map(|(i, _)| i)
            .collect();
        Ok(())
    }

    pub fn set_pack_selected(&mut self, name: &str, selected: bool) -> Result<()> {
        let index = self
            .pack_index(name)
            .with_context(|| format!("Unknown pack: {name}"))?;
        if selected {
            if !self.selected_packs.contains(&index) {
                self.selected_packs.push(index);
                self.selected_packs.sort_unstable();
            }
        } else if !self.manifest.packs[index].required {
            self.selected_packs.retain(|&i| i != index);
        }
        Ok(())
    }

    pub fn pack_index(&self, name: &str) -> Option<usize> {
        self.manifest
            .packs
            .iter()
            .position(|p| p.name == name || p.id.as_deref() == Some(name))
    }

    pub fn selected(&self) -> impl Iterator<Item = (usize, &Pack)> {
        self.selected_packs
            .iter()
            .map(move |&i| (i, &self.manifest.packs[i]))
    }

    pub fn resource(&self, name: &str) -> PathBuf {
        self.installer_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pack;

    fn manifest() -> InstallManifest {
        let mut manifest = InstallManifest::default();
        manifest.info.app_name = "Demo".to_string();
        manifest.default_install_path = Some("/opt/$APP_NAME".to_string());
        manifest.packs = vec![
            Pack {
                name: "core".to_string(),
                required: true,
                preselected: true,
                ..Default::default()
            },
            Pack {
                name: "docs".to_string(),
                preselected: false,
                ..Default::default()
            },
            Pack {
                name: "samples".to_string(),
                preselected: true,
                ..Default::default()
            },
        ];
        manifest
    }

    #[test]
    fn test_defaults() {
        let session = InstallSession::new(Path::new("/installer"), manifest());
        assert_eq!(session.variables.get("APP_NAME"), Some("Demo"));
        assert_eq!(session.variables.get("INSTALL_PATH"), Some("/opt/Demo"));
        assert_eq!(session.selected_packs, vec![0, 2]);
    }

    #[test]
    fn test_selection_keeps_required() {
        let mut session = InstallSession::new(Path::new("/installer"), manifest());
        session.select_packs(&["docs"]).unwrap();
        assert_eq!(session.selected_packs, vec![0, 1]);
        session.set_pack_selected("core", false).unwrap();
        assert_eq!(session.selected_packs, vec![0, 1]);
        session.set_pack_selected("samples", true).unwrap();
        assert_eq!(session.selected_packs, vec![0, 1, 2]);
        assert!(session.select_packs(&["nope"]).is_err());
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_NAME),
            r#"{
                "info": {"app_name": "Demo", "app_version": "2.0"},
                "kind": "multivolume",
                "packs": [{"name": "core"}],
                "variables": {"PORT": "8080"},
                "conditions": {"always": {"type": "const", "value": true}}
            }"#,
        )
        .unwrap();
        let session = InstallSession::load(dir.path()).unwrap();
        assert_eq!(session.manifest.kind, crate::types::InstallerKind::Multivolume);
        assert_eq!(session.manifest.info.uninstaller_name, "uninstaller.jar");
        assert_eq!(session.variables.get("PORT"), Some("8080"));
        assert!(session.is_condition_true(Some("always")));
        assert_eq!(session.selected_packs, vec![0]);
    }
}
