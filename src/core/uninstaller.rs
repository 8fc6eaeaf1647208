//! Assembles the uninstaller jar from installer resources and the recorded uninstall data.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::format::{read_record, write_record};
use crate::core::session::InstallSession;
use crate::core::uninstall::{
    AdditionalData, CustomData, UninstallData, ROOT_SCRIPT_PREFIX, UNINSTALLER_JARS_KEY,
    UNINSTALLER_LISTENERS_KEY, UNINSTALL_LIBS_KEY,
};
use crate::types::{ExecutableFile, UninstallerSummary};
use crate::utils::fs::native_path;

pub const BASE_UNINSTALLER: &str = "res/IzPack.uninstaller";
pub const UNINSTALLER_EXTENSION: &str = "res/IzPack.uninstaller-ext";
pub const LOGFILE_PATH_VARIABLE: &str = "InstallerFrame.logfilePath";

pub const INSTALL_LOG: &str = "install.log";
pub const JAR_LOCATION_LOG: &str = "jarlocation.log";
pub const EXECUTABLES: &str = "executables";
pub const LANGPACK: &str = "langpack.xml";
pub const EXEC_ADMIN: &str = "exec-admin";

/// Records the manifest's uninstaller libraries, listeners, jars, scripts and data
/// in the uninstall data. Done once when unpacking starts.
pub fn register_uninstaller_resources(session: &mut InstallSession) {
    let resources = &session.manifest.uninstaller;
    let vars = &session.variables;
    let data = &mut session.uninstall;

    if !resources.native_libs.is_empty() {
        data.add_additional_data(
            UNINSTALL_LIBS_KEY,
            AdditionalData::NativeLibs(resources.native_libs.clone()),
        );
    }
    if !resources.listeners.is_empty() {
        let listeners = resources
            .listeners
            .iter()
            .map(|listener| CustomData {
                listener_name: Some(listener.name.clone()),
                contents: listener.resources.clone(),
            })
            .collect();
        data.add_additional_data(UNINSTALLER_LISTENERS_KEY, AdditionalData::Custom(listeners));
    }
    if !resources.jars.is_empty() {
        let jars = resources
            .jars
            .iter()
            .map(|jar| CustomData {
                listener_name: None,
                contents: vec![jar.clone()],
            })
            .collect();
        data.add_additional_data(UNINSTALLER_JARS_KEY, AdditionalData::Custom(jars));
    }
    for (key, value) in &resources.data {
        let bytes = vars.substitute(value).into_bytes();
        data.add_additional_data(key.as_str(), AdditionalData::Bytes(bytes));
    }
    for script in &resources.scripts {
        let script = vars.substitute(script);
        if !data.uninstall_scripts().contains(&script) {
            data.add_uninstall_script(script);
        }
    }
}

/// Writes the uninstaller and records its location in the session.
///
/// Returns `None` when the uninstaller condition vetoes it or the jar file cannot be
/// created. Failures while filling the jar are logged and leave it incomplete.
pub fn write_uninstaller(session: &mut InstallSession) -> Option<PathBuf> {
    session.uninstaller_jar = None;
    let condition = session.manifest.info.uninstaller_condition.clone();
    if !session.is_condition_true(condition.as_deref()) {
        info!("uninstaller condition not met, no uninstaller written");
        return None;
    }

    let dest = native_path(&session.variables.substitute(&session.manifest.info.uninstaller_path));
    let jar = dest.join(&session.manifest.info.uninstaller_name);
    let file = match fs::create_dir_all(&dest).and_then(|()| File::create(&jar)) {
        Ok(file) => file,
        Err(err) => {
            warn!(jar = %jar.display(), "cannot create uninstaller: {err}");
            return None;
        }
    };
    session.uninstall.set_uninstaller_location(
        jar.to_string_lossy().into_owned(),
        dest.to_string_lossy().into_owned(),
    );
    session.uninstall.add_file(jar.to_string_lossy().into_owned());

    info!(jar = %jar.display(), "writing uninstaller data");
    let mut builder = JarBuilder::new(file);
    if let Err(err) = builder.write_all_parts(session) {
        warn!("uninstaller is incomplete: {err:#}");
    }
    if let Err(err) = builder.finish() {
        warn!("uninstaller is incomplete: {err:#}");
    }
    session.uninstaller_jar = Some(jar.clone());
    Some(jar)
}

struct JarBuilder {
    zip: ZipWriter<BufWriter<File>>,
    written: HashSet<String>,
    options: SimpleFileOptions,
}

impl JarBuilder {
    fn new(file: File) -> Self {
        JarBuilder {
            zip: ZipWriter::new(BufWriter::new(file)),
            written: HashSet::new(),
            options: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(9)),
        }
    }

    /// Opens a new entry unless one with that name was already written.
    fn start(&mut self, name: &str) -> Result<bool> {
        if !self.written.insert(name.to_string()) {
            debug!(entry = name, "skipping duplicate entry");
            return Ok(false);
        }
        self.zip.start_file(name, self.options)?;
        Ok(true)
    }

    fn entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if self.start(name)? {
            self.zip.write_all(data)?;
        }
        Ok(())
    }

    fn copy_file(&mut self, name: &str, source: &Path) -> Result<()> {
        if self.written.contains(name) {
            return Ok(());
        }
        let mut input = match File::open(source) {
            Ok(input) => input,
            Err(err) => {
                warn!(resource = %source.display(), "uninstaller resource missing: {err}");
                return Ok(());
            }
        };
        self.start(name)?;
        io::copy(&mut input, &mut self.zip)?;
        Ok(())
    }

    fn merge_archive(&mut self, source: &Path) -> Result<()> {
        let file = match File::open(source) {
            Ok(file) => file,
            Err(_) => {
                debug!(archive = %source.display(), "optional uninstaller archive absent");
                return Ok(());
            }
        };
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("reading {}", source.display()))?;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if entry.is_dir() {
                if self.written.insert(name.clone()) {
                    self.zip.add_directory(name, self.options)?;
                }
                continue;
            }
            if self.start(&name)? {
                io::copy(&mut entry, &mut self.zip)?;
            }
        }
        Ok(())
    }

    fn write_all_parts(&mut self, session: &InstallSession) -> Result<()> {
        self.merge_archive(&session.resource(BASE_UNINSTALLER))?;
        self.merge_archive(&session.resource(UNINSTALLER_EXTENSION))?;
        if session.manifest.info.privileged_uninstall {
            self.entry(EXEC_ADMIN, &[])?;
        }
        let langpack = format!("langpacks/{}.xml", session.manifest.locale);
        self.copy_file(LANGPACK, &session.resource(&langpack))?;

        let install_path = session.variables.get("INSTALL_PATH").unwrap_or_default();
        self.write_files_log(session, install_path)?;
        self.write_jar_location(&session.uninstall)?;
        self.write_executables(session.uninstall.executables())?;
        self.write_additional_data(session)?;
        self.write_scripts(session.uninstall.uninstall_scripts())?;
        Ok(())
    }

    fn write_files_log(&mut self, session: &InstallSession, install_path: &str) -> Result<()> {
        let mut log = String::from(install_path);
        log.push('\n');
        log.push_str(&session.uninstall.files().join("\n"));
        self.entry(INSTALL_LOG, log.as_bytes())?;

        if let Some(external) = session.variables.get(LOGFILE_PATH_VARIABLE) {
            let target = if external.to_lowercase().starts_with("default") {
                let dir = session.uninstall.uninstaller_path().unwrap_or_default();
                format!("{dir}/{INSTALL_LOG}")
            } else {
                session.variables.substitute(external)
            };
            let target = native_path(&target);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if let Err(err) = fs::write(&target, session.uninstall.files().join("\n")) {
                warn!(log = %target.display(), "cannot write install log: {err}");
            }
        }
        Ok(())
    }

    fn write_jar_location(&mut self, data: &UninstallData) -> Result<()> {
        let text = format!(
            "{}\n{}",
            data.uninstaller_jar_filename().unwrap_or_default(),
            data.uninstaller_path().unwrap_or_default()
        );
        self.entry(JAR_LOCATION_LOG, text.as_bytes())
    }

    fn write_executables(&mut self, executables: &[ExecutableFile]) -> Result<()> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(executables.len() as u32)?;
        for executable in executables {
            write_record(&mut buf, executable)?;
        }
        self.entry(EXECUTABLES, &buf)
    }

    fn write_additional_data(&mut self, session: &InstallSession) -> Result<()> {
        for (key, data) in session.uninstall.additional_data() {
            match data {
                AdditionalData::NativeLibs(names) => {
                    for name in names {
                        let resource = format!("native/{name}");
                        self.copy_file(&resource, &session.resource(&resource))?;
                    }
                }
                AdditionalData::Custom(items) => {
                    let mut listeners = Vec::new();
                    for item in items {
                        if let Some(listener) = &item.listener_name {
                            listeners.push(listener.as_str());
                        }
                        for content in &item.contents {
                            self.copy_file(content, &session.resource(content))?;
                        }
                    }
                    let mut buf = Vec::new();
                    buf.write_u32::<LittleEndian>(listeners.len() as u32)?;
                    for listener in listeners {
                        buf.write_u32::<LittleEndian>(listener.len() as u32)?;
                        buf.write_all(listener.as_bytes())?;
                    }
                    self.entry(key, &buf)?;
                }
                AdditionalData::Bytes(bytes) => self.entry(key, bytes)?,
            }
        }
        Ok(())
    }

    fn write_scripts(&mut self, scripts: &[String]) -> Result<()> {
        for (index, script) in scripts.iter().enumerate() {
            let mut buf = Vec::new();
            buf.write_u32::<LittleEndian>(script.len() as u32)?;
            buf.write_all(script.as_bytes())?;
            self.entry(&format!("{ROOT_SCRIPT_PREFIX}{index}"), &buf)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        let mut out = self.zip.finish()?;
        out.flush()?;
        Ok(())
    }
}

/// Reads back the installation record of an uninstaller jar.
pub fn read_uninstaller(jar: &Path) -> Result<UninstallerSummary> {
    let file = File::open(jar).with_context(|| format!("opening {}", jar.display()))?;
    let mut archive = ZipArchive::new(file)?;
    let mut summary = UninstallerSummary {
        entries: archive.file_names().map(str::to_string).collect(),
        ..Default::default()
    };
    summary.entries.sort();

    let mut log = String::new();
    archive.by_name(INSTALL_LOG)?.read_to_string(&mut log)?;
    let mut lines = log.lines();
    summary.install_path = lines.next().unwrap_or_default().to_string();
    summary.files = lines.map(str::to_string).collect();

    if let Ok(mut entry) = archive.by_name(JAR_LOCATION_LOG) {
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        summary.jar_location = text.lines().map(str::to_string).collect();
    }

    if let Ok(mut entry) = archive.by_name(EXECUTABLES) {
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        let mut input = buf.as_slice();
        let count = input.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let _: ExecutableFile = read_record(&mut input)?;
        }
        summary.executables = count as usize;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ExecutableKind, ExecutionStage, FailurePolicy, InstallManifest, UninstallerListenerSpec,
    };
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn session(installer: &Path, target: &Path) -> InstallSession {
        let mut manifest = InstallManifest::default();
        manifest.info.app_name = "Demo".to_string();
        let mut session = InstallSession::new(installer, manifest);
        session.set_install_path(target.to_path_buf());
        session
    }

    fn entry_bytes(jar: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(jar).unwrap()).unwrap();
        let mut buf = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_install_log_lists_files_in_order() {
        let installer = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut session = session(installer.path(), target.path());
        let recorded = ["/opt/demo/b.txt", "/opt/demo/a.txt", "/opt/demo/lib"];
        for file in recorded {
            session.uninstall.add_file(file);
        }

        let jar = write_uninstaller(&mut session).unwrap();
        assert_eq!(jar, target.path().join("Uninstaller").join("uninstaller.jar"));
        assert_eq!(session.uninstaller_jar.as_deref(), Some(jar.as_path()));

        let summary = read_uninstaller(&jar).unwrap();
        assert_eq!(summary.install_path, target.path().to_string_lossy());
        let mut expected: Vec<String> = recorded.iter().map(|s| s.to_string()).collect();
        expected.push(jar.to_string_lossy().into_owned());
        assert_eq!(summary.files, expected);
        assert_eq!(
            summary.jar_location,
            vec![
                jar.to_string_lossy().into_owned(),
                target.path().join("Uninstaller").to_string_lossy().into_owned()
            ]
        );
    }

    #[test]
    fn test_first_writer_wins_on_duplicate_entries() {
        let installer = tempdir().unwrap();
        let target = tempdir().unwrap();
        write_zip(
            &installer.path().join(BASE_UNINSTALLER),
            &[("uninstaller/Main.class", b"base"), ("META-INF/MANIFEST.MF", b"base manifest")],
        );
        write_zip(
            &installer.path().join(UNINSTALLER_EXTENSION),
            &[("uninstaller/Main.class", b"ext"), ("native/ext.so", b"ext lib")],
        );
        fs::create_dir_all(installer.path().join("langpacks")).unwrap();
        fs::write(installer.path().join("langpacks/eng.xml"), b"<langpack/>").unwrap();
        fs::create_dir_all(installer.path().join("native")).unwrap();
        fs::write(installer.path().join("native/ext.so"), b"other lib").unwrap();
        fs::create_dir_all(installer.path().join("listeners")).unwrap();
        fs::write(installer.path().join("listeners/Cleanup.class"), b"listener").unwrap();

        let mut session = session(installer.path(), target.path());
        session.manifest.info.privileged_uninstall = true;
        let resources = &mut session.manifest.uninstaller;
        resources.native_libs = vec!["ext.so".to_string()];
        resources.listeners = vec![UninstallerListenerSpec {
            name: "Cleanup".to_string(),
            resources: vec!["listeners/Cleanup.class".to_string()],
        }];
        resources.jars = vec!["lib/helper.jar".to_string()];
        resources.data.insert("registry".to_string(), "keys of $APP_NAME".to_string());
        resources.scripts = vec!["rm -rf /tmp/$APP_NAME".to_string()];
        fs::create_dir_all(installer.path().join("lib")).unwrap();
        fs::write(installer.path().join("lib/helper.jar"), b"helper").unwrap();
        register_uninstaller_resources(&mut session);
        // a second install run records the scripts once
        register_uninstaller_resources(&mut session);
        assert_eq!(session.uninstall.uninstall_scripts().len(), 1);
        session.uninstall.add_executable(ExecutableFile {
            path: "/opt/demo/bin/cleanup.sh".to_string(),
            kind: ExecutableKind::Bin,
            main_class: None,
            stage: ExecutionStage::Uninstall,
            on_failure: FailurePolicy::Warn,
            args: vec![],
            keep_file: true,
            os_constraints: vec![],
            condition: None,
        });

        let jar = write_uninstaller(&mut session).unwrap();
        assert_eq!(entry_bytes(&jar, "uninstaller/Main.class"), b"base");
        assert_eq!(entry_bytes(&jar, "native/ext.so"), b"ext lib");
        assert_eq!(entry_bytes(&jar, LANGPACK), b"<langpack/>");
        assert_eq!(entry_bytes(&jar, "listeners/Cleanup.class"), b"listener");
        assert_eq!(entry_bytes(&jar, "lib/helper.jar"), b"helper");
        assert_eq!(entry_bytes(&jar, "registry"), b"keys of Demo");
        assert!(entry_bytes(&jar, EXEC_ADMIN).is_empty());
        let script = entry_bytes(&jar, "rootscript0");
        assert_eq!(&script[4..], b"rm -rf /tmp/Demo");

        let summary = read_uninstaller(&jar).unwrap();
        assert_eq!(summary.executables, 1);
        assert!(summary.entries.contains(&UNINSTALLER_LISTENERS_KEY.to_string()));
        // jars carry no listener names
        assert_eq!(entry_bytes(&jar, UNINSTALLER_JARS_KEY), 0u32.to_le_bytes());
    }

    #[test]
    fn test_condition_vetoes_uninstaller() {
        let installer = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut session = session(installer.path(), target.path());
        session.manifest.info.uninstaller_condition = Some("neverTrue".to_string());

        assert!(write_uninstaller(&mut session).is_none());
        assert!(session.uninstaller_jar.is_none());
        assert!(!target.path().join("Uninstaller").exists());
        assert!(session.uninstall.files().is_empty());
    }

    #[test]
    fn test_external_install_log() {
        let installer = tempdir().unwrap();
        let target = tempdir().unwrap();
        let mut session = session(installer.path(), target.path());
        session.variables.set(LOGFILE_PATH_VARIABLE, "default");
        session.uninstall.add_file("/opt/demo/a");

        let jar = write_uninstaller(&mut session).unwrap();
        let external =
            fs::read_to_string(target.path().join("Uninstaller").join(INSTALL_LOG)).unwrap();
        assert_eq!(external, format!("/opt/demo/a\n{}", jar.to_string_lossy()));
    }
}
