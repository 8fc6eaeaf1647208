use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::commands::{interrupt_on_ctrl_c, print_box};
use crate::core::compile::{CompileOutcome, CompileWorker};
use crate::core::handler::{
    AutomatedHandler, ConsoleHandler, ConsoleVolumeLocator, InstallerListener, ProgressHandler,
    ReaderVolumeLocator, VolumeLocator,
};
use crate::core::process::{ConsoleProcessLog, HandlerRegistry, ProcessPanelWorker};
use crate::core::properties::apply_properties;
use crate::core::session::{InstallSession, MANIFEST_NAME};
use crate::core::unpacker::{create_unpacker, spawn_unpacker};
use crate::types::{InstallOptions, PackFile};
use crate::utils::fs::format_bytes;

#[derive(Default)]
struct Tally {
    files: AtomicUsize,
    bytes: AtomicU64,
}

/// Counts the files the unpacker writes.
struct TallyListener(Arc<Tally>);

impl InstallerListener for TallyListener {
    fn is_file_listener(&self) -> bool {
        true
    }

    fn after_file(&mut self, _file: &Path, pf: &PackFile) -> Result<()> {
        self.0.files.fetch_add(1, Ordering::Relaxed);
        self.0.bytes.fetch_add(pf.length, Ordering::Relaxed);
        Ok(())
    }
}

pub fn install(options: &InstallOptions) -> Result<()> {
    let manifest = options.installer.join(MANIFEST_NAME);
    if !manifest.is_file() {
        bail!("Installer not found: {}", manifest.display());
    }
    let mut session = InstallSession::load(&options.installer)?;

    if let Some(properties) = &options.properties {
        let text = fs::read_to_string(properties)
            .with_context(|| format!("reading {}", properties.display()))?;
        apply_properties(&mut session, &text)?;
    }
    for (name, value) in &options.variables {
        session.variables.set(name.as_str(), value.as_str());
    }
    if let Some(target) = &options.target {
        session.set_install_path(target.clone());
    }
    let Some(target) = session.install_path() else {
        bail!("No target directory. Use --target or set INSTALL_PATH in a properties file.");
    };
    if !options.packs.is_empty() {
        session.select_packs(&options.packs[..])?;
    }

    let info = &session.manifest.info;
    let packs: Vec<&str> = session.selected().map(|(_, p)| p.name.as_str()).collect();
    print_box(
        "Installer",
        &[
            &format!("Application: {} {}", info.app_name, info.app_version),
            &format!("Target: {}", target.display()),
            &format!("Packs: {}", packs.join(", ")),
        ],
        "\x1b[36m",
    );

    let (handler, locator): (Box<dyn ProgressHandler>, Box<dyn VolumeLocator>) =
        if options.automated {
            (
                Box::new(AutomatedHandler::default()),
                Box::new(ReaderVolumeLocator::new(BufReader::new(io::stdin()))),
            )
        } else {
            (
                Box::new(ConsoleHandler::new(options.assume_yes)),
                Box::new(ConsoleVolumeLocator),
            )
        };

    interrupt_on_ctrl_c(session.interrupts.clone());
    let start = Instant::now();
    let tally = Arc::new(Tally::default());
    let mut unpacker = create_unpacker(&session, locator);
    unpacker.add_listener(Box::new(TallyListener(tally.clone())));
    let (session, succeeded) = spawn_unpacker(unpacker, session, handler)?
        .join()
        .map_err(|_| anyhow!("unpacker thread panicked"))?;
    if !succeeded {
        if session.interrupts.is_interrupt_desired() {
            bail!("Installation interrupted");
        }
        bail!("Installation failed");
    }

    run_jobs(&session)?;
    let elapsed = start.elapsed().as_secs_f64();

    let uninstaller = session
        .uninstaller_jar
        .as_ref()
        .map(|jar| jar.display().to_string())
        .unwrap_or_else(|| "disabled".to_string());
    print_box(
        "Install Complete",
        &[
            &format!(
                "Installed: {} files ({})",
                tally.files.load(Ordering::Relaxed),
                format_bytes(tally.bytes.load(Ordering::Relaxed))
            ),
            &format!("Uninstaller: {uninstaller}"),
            &format!("Time: {:.1}s", elapsed),
        ],
        "\x1b[32m",
    );

    Ok(())
}

/// Runs the process and compile sections of the manifest, if any.
fn run_jobs(session: &InstallSession) -> Result<()> {
    let mut log = ConsoleProcessLog;
    if let Some(spec) = &session.manifest.process {
        eprintln!("Running post-install jobs...");
        let handlers = HandlerRegistry::new();
        let outcome = ProcessPanelWorker::new(spec, session, &handlers).run(&mut log);
        if !outcome.success {
            bail!("Post-install jobs failed");
        }
    }
    if let Some(spec) = &session.manifest.compile {
        eprintln!("Compiling...");
        match CompileWorker::new(spec, session).run(&mut log) {
            CompileOutcome::Success { compiled } => eprintln!("Compiled {compiled} files"),
            CompileOutcome::NoCompiler => bail!("No usable compiler found"),
            CompileOutcome::Failed { job, .. } => bail!("Compilation of {job} failed"),
        }
    }
    Ok(())
}
