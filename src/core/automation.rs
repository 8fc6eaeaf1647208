//! Replays a recorded install script panel by panel.
//!
//! A script is a JSON array of entries such as
//! `{"panel": "TargetPanel", "installpath": "/opt/demo"}`. Every panel kind maps
//! to a [`PanelAutomation`] in an [`AutomationRegistry`].

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::core::compile::{CompileOutcome, CompileWorker};
use crate::core::handler::{ProgressHandler, ReaderVolumeLocator, VolumeLocator};
use crate::core::process::{HandlerRegistry, ProcessLog, ProcessPanelWorker};
use crate::core::session::InstallSession;
use crate::core::unpacker::{create_unpacker, run_unpacker_scoped};
use crate::utils::fs::native_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelEntry {
    pub panel: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PanelEntry {
    fn fields<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .with_context(|| format!("invalid {} entry", self.panel))
    }
}

pub fn load_script(path: &Path) -> Result<Vec<PanelEntry>> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Everything a panel may touch while the script runs.
pub struct AutomationContext<'a> {
    pub session: &'a mut InstallSession,
    pub handler: &'a mut dyn ProgressHandler,
    pub process_log: &'a mut dyn ProcessLog,
    pub process_handlers: &'a HandlerRegistry,
    /// Used by the first install panel; later ones read volume paths from stdin.
    pub volume_locator: Option<Box<dyn VolumeLocator>>,
}

pub trait PanelAutomation {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, entry: &PanelEntry) -> Result<()>;

    /// Whether a failure of this panel ends the script.
    fn is_fatal(&self) -> bool {
        false
    }
}

#[derive(Deserialize)]
struct TargetFields {
    installpath: String,
}

pub struct TargetPanel;

impl PanelAutomation for TargetPanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, entry: &PanelEntry) -> Result<()> {
        let fields: TargetFields = entry.fields()?;
        let path = ctx.session.variables.substitute(&fields.installpath);
        info!(install_path = %path, "target selected");
        ctx.session.set_install_path(native_path(&path));
        Ok(())
    }
}

#[derive(Deserialize)]
struct PackChoice {
    name: String,
    selected: bool,
}

#[derive(Deserialize)]
struct PacksFields {
    packs: Vec<PackChoice>,
}

pub struct PacksPanel;

impl PanelAutomation for PacksPanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, entry: &PanelEntry) -> Result<()> {
        let fields: PacksFields = entry.fields()?;
        for choice in fields.packs {
            ctx.session.set_pack_selected(&choice.name, choice.selected)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct UserInputFields {
    variables: IndexMap<String, String>,
}

pub struct UserInputPanel;

impl PanelAutomation for UserInputPanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, entry: &PanelEntry) -> Result<()> {
        let fields: UserInputFields = entry.fields()?;
        for (name, value) in fields.variables {
            ctx.session.variables.set(name, value);
        }
        Ok(())
    }
}

pub struct InstallPanel;

impl PanelAutomation for InstallPanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, _entry: &PanelEntry) -> Result<()> {
        if ctx.session.install_path().is_none() {
            bail!("no install path set before the install panel");
        }
        let locator: Box<dyn VolumeLocator> = match ctx.volume_locator.take() {
            Some(locator) => locator,
            None => Box::new(ReaderVolumeLocator::new(BufReader::new(io::stdin()))),
        };
        let mut unpacker = create_unpacker(ctx.session, locator);
        if !run_unpacker_scoped(unpacker.as_mut(), ctx.session, ctx.handler)? {
            bail!("installation failed");
        }
        Ok(())
    }

    fn is_fatal(&self) -> bool {
        true
    }
}

pub struct ProcessPanel;

impl PanelAutomation for ProcessPanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, _entry: &PanelEntry) -> Result<()> {
        let session: &InstallSession = &*ctx.session;
        let Some(spec) = &session.manifest.process else {
            return Ok(());
        };
        let outcome =
            ProcessPanelWorker::new(spec, session, ctx.process_handlers).run(ctx.process_log);
        if !outcome.success {
            bail!("process jobs failed");
        }
        Ok(())
    }
}

pub struct CompilePanel;

impl PanelAutomation for CompilePanel {
    fn run_automated(&self, ctx: &mut AutomationContext<'_>, _entry: &PanelEntry) -> Result<()> {
        let session: &InstallSession = &*ctx.session;
        let Some(spec) = &session.manifest.compile else {
            return Ok(());
        };
        match CompileWorker::new(spec, session).run(ctx.process_log) {
            CompileOutcome::Success { .. } => Ok(()),
            CompileOutcome::NoCompiler => bail!("no usable compiler"),
            CompileOutcome::Failed { job, status } => {
                bail!("compile job {job} failed ({status:?})")
            }
        }
    }
}

#[derive(Default)]
pub struct AutomationRegistry {
    panels: HashMap<String, Box<dyn PanelAutomation>>,
}

impl AutomationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in panel.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("TargetPanel", Box::new(TargetPanel));
        registry.register("PacksPanel", Box::new(PacksPanel));
        registry.register("UserInputPanel", Box::new(UserInputPanel));
        registry.register("InstallPanel", Box::new(InstallPanel));
        registry.register("ProcessPanel", Box::new(ProcessPanel));
        registry.register("CompilePanel", Box::new(CompilePanel));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, panel: Box<dyn PanelAutomation>) {
        self.panels.insert(kind.into(), panel);
    }

    pub fn get(&self, kind: &str) -> Option<&dyn PanelAutomation> {
        self.panels.get(kind).map(|p| p.as_ref())
    }

    /// Runs the script entries in order.
    ///
    /// Unknown panels and failures of fatal panels stop the run; other failures
    /// are logged and the script continues.
    pub fn run_script(
        &self,
        ctx: &mut AutomationContext<'_>,
        entries: &[PanelEntry],
    ) -> Result<()> {
        for entry in entries {
            let Some(panel) = self.get(&entry.panel) else {
                bail!("Unknown panel: {}", entry.panel);
            };
            info!(panel = %entry.panel, "running automated panel");
            if let Err(err) = panel.run_automated(ctx, entry) {
                if panel.is_fatal() {
                    return Err(err.context(format!("{} failed", entry.panel)));
                }
                warn!(panel = %entry.panel, "{err:#}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::fixtures::PackStreamBuilder;
    use crate::core::handler::AutomatedHandler;
    use crate::core::process::tests::RecordingLog;
    use crate::types::{InstallManifest, Pack, PackFile};
    use tempfile::tempdir;

    fn script(json: &str) -> Vec<PanelEntry> {
        serde_json::from_str(json).unwrap()
    }

    fn installer(dir: &Path) -> InstallSession {
        let mut manifest = InstallManifest::default();
        manifest.info.app_name = "Demo".to_string();
        manifest.packs = vec![
            Pack {
                name: "core".to_string(),
                required: true,
                ..Default::default()
            },
            Pack {
                name: "docs".to_string(),
                ..Default::default()
            },
        ];
        fs::create_dir_all(dir.join("packs")).unwrap();
        let core = PackStreamBuilder::default()
            .file(PackFile::new("$INSTALL_PATH/$APP_NAME.cfg", 10), b"port=$PORT")
            .build(false);
        fs::write(dir.join("packs/pack-0"), core).unwrap();
        let docs = PackStreamBuilder::default()
            .file(PackFile::new("$INSTALL_PATH/README", 4), b"read")
            .build(false);
        fs::write(dir.join("packs/pack-1"), docs).unwrap();
        InstallSession::new(dir, manifest)
    }

    #[test]
    fn test_script_drives_installation() {
        let dir = tempdir().unwrap();
        let mut session = installer(dir.path());
        let target = dir.path().join("out");
        let entries = script(&format!(
            r#"[
                {{"panel": "TargetPanel", "installpath": "{}"}},
                {{"panel": "PacksPanel", "packs": [{{"name": "docs", "selected": false}}]}},
                {{"panel": "UserInputPanel", "variables": {{"PORT": "8080"}}}},
                {{"panel": "InstallPanel"}}
            ]"#,
            target.display()
        ));

        let mut handler = AutomatedHandler::default();
        let mut log = RecordingLog::default();
        let handlers = HandlerRegistry::new();
        let mut ctx = AutomationContext {
            session: &mut session,
            handler: &mut handler,
            process_log: &mut log,
            process_handlers: &handlers,
            volume_locator: None,
        };
        AutomationRegistry::builtin().run_script(&mut ctx, &entries).unwrap();

        assert_eq!(fs::read(target.join("Demo.cfg")).unwrap(), b"port=$PORT");
        assert!(!target.join("README").exists());
        assert_eq!(session.variables.get("PORT"), Some("8080"));
        assert!(session.uninstaller_jar.is_some());
    }

    #[test]
    fn test_helper_errors_do_not_stop_the_script() {
        let dir = tempdir().unwrap();
        let mut session = installer(dir.path());
        let entries = script(
            r#"[
                {"panel": "PacksPanel", "packs": [{"name": "missing", "selected": true}]},
                {"panel": "UserInputPanel", "variables": {"PORT": "9090"}}
            ]"#,
        );
        let mut handler = AutomatedHandler::default();
        let mut log = RecordingLog::default();
        let handlers = HandlerRegistry::new();
        let mut ctx = AutomationContext {
            session: &mut session,
            handler: &mut handler,
            process_log: &mut log,
            process_handlers: &handlers,
            volume_locator: None,
        };
        AutomationRegistry::builtin().run_script(&mut ctx, &entries).unwrap();
        assert_eq!(session.variables.get("PORT"), Some("9090"));
    }

    #[test]
    fn test_unknown_panel_and_fatal_install() {
        let dir = tempdir().unwrap();
        let mut session = installer(dir.path());
        fs::write(dir.path().join("packs/pack-0"), b"IZPK").unwrap();
        let mut handler = AutomatedHandler::default();
        let mut log = RecordingLog::default();
        let handlers = HandlerRegistry::new();
        let mut ctx = AutomationContext {
            session: &mut session,
            handler: &mut handler,
            process_log: &mut log,
            process_handlers: &handlers,
            volume_locator: None,
        };
        let registry = AutomationRegistry::builtin();

        let unknown = script(r#"[{"panel": "HelloPanel"}]"#);
        let err = registry.run_script(&mut ctx, &unknown).unwrap_err();
        assert!(err.to_string().contains("HelloPanel"));

        let target = dir.path().join("out");
        let broken = script(&format!(
            r#"[
                {{"panel": "TargetPanel", "installpath": "{}"}},
                {{"panel": "InstallPanel"}},
                {{"panel": "UserInputPanel", "variables": {{"AFTER": "1"}}}}
            ]"#,
            target.display()
        ));
        assert!(registry.run_script(&mut ctx, &broken).is_err());
        assert_eq!(ctx.session.variables.get("AFTER"), None);
    }
}
