//! Streams the selected packs onto disk.
//!
//! [`Unpacker`] runs the same loop for every installer kind. Where the bytes of a
//! file come from is decided by its [`PackSource`]: single-archive installers
//! carry payloads inline in the pack stream ([`ArchiveSource`]), multi-volume
//! installers address them by offset in a spanning volume stream
//! ([`VolumeSource`]).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::core::executor::FileExecutor;
use crate::core::format::{read_header, read_record, read_trailer, PackTrailer, VolumesInfo};
use crate::core::handler::{Answer, Choices, InstallerListener, ProgressHandler, VolumeLocator};
use crate::core::interrupt::CancellationToken;
use crate::core::rules::one_matches_current_system;
use crate::core::script_parser::ScriptParser;
use crate::core::session::InstallSession;
use crate::core::uninstaller::{register_uninstaller_resources, write_uninstaller};
use crate::core::update_check::perform_update_checks;
use crate::core::volume::FileSpanningReader;
use crate::error::{FormatError, InstallError, InstallResult, VolumeError};
use crate::types::{BackReference, ExecutionStage, InstallerKind, OverridePolicy, Pack, PackFile};
use crate::utils::compression::pack_decoder;
use crate::utils::fs::{mtime_millis, native_path, set_mode, set_mtime_millis};

pub const VOLUMES_INFO: &str = "volumes.info";

const COPY_BUFFER: usize = 5120;

pub trait Unpack: Send {
    fn add_listener(&mut self, listener: Box<dyn InstallerListener>);

    /// Unpacks the selected packs and runs the post-install steps. Returns the result.
    fn run(&mut self, session: &mut InstallSession, handler: &mut dyn ProgressHandler) -> bool;

    /// Result of the last [`run`](Unpack::run); `false` before the first one.
    fn result(&self) -> bool;
}

/// Where pack streams and out-of-line payloads are read from.
pub trait PackSource: Send {
    /// Opens the stream of the pack at `index` in the manifest, positioned at its header.
    fn open_pack(
        &mut self,
        session: &InstallSession,
        index: usize,
    ) -> InstallResult<Box<dyn Read + Send>>;

    /// Whether regular file payloads follow their records in the pack stream.
    fn inline_payloads(&self) -> bool;

    /// Copies a payload that is not part of the pack stream.
    fn copy_external(&mut self, pf: &PackFile, _out: &mut dyn Write) -> InstallResult<u64> {
        Err(InstallError::BackReferenceUnavailable(pf.target_path.clone()))
    }

    /// Copies the content of a back-referenced file that was not written during this run.
    fn copy_back_reference(
        &mut self,
        session: &InstallSession,
        reference: BackReference,
        out: &mut dyn Write,
    ) -> InstallResult<u64> {
        let mut stream = self.open_pack(session, reference.pack as usize)?;
        let pf = find_record(&mut stream, reference.file, true)?;
        if let Some(loose) = &pf.loose_source {
            return copy_file(&loose_path(session, loose), out);
        }
        if !pf.has_inline_payload() {
            return Err(InstallError::BackReferenceUnavailable(pf.target_path));
        }
        copy_exact(&mut stream, out, pf.length)
    }
}

/// Reads packs from `packs/pack-<n>` of the installer directory, or from the web
/// location of a web installer.
pub struct ArchiveSource {
    installer_dir: PathBuf,
    encoding: Option<String>,
    web_url: Option<String>,
    client: Option<reqwest::blocking::Client>,
}

impl ArchiveSource {
    pub fn new(session: &InstallSession) -> Self {
        let manifest = &session.manifest;
        let web_url = match manifest.kind {
            InstallerKind::Web => manifest.web_url.clone(),
            _ => None,
        };
        ArchiveSource {
            installer_dir: session.installer_dir.clone(),
            encoding: manifest.pack_encoding.clone(),
            web_url,
            client: None,
        }
    }

    fn download(&mut self, name: &str) -> InstallResult<Box<dyn Read + Send>> {
        let base = self.web_url.as_deref().unwrap_or_default().trim_end_matches('/');
        let url = format!("{base}/packs/{name}");
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                let client = reqwest::blocking::Client::builder().build()?;
                self.client = Some(client.clone());
                client
            }
        };
        info!(%url, "downloading pack");
        let response = client.get(&url).send()?.error_for_status()?;
        Ok(Box::new(response))
    }
}

impl PackSource for ArchiveSource {
    fn open_pack(
        &mut self,
        _session: &InstallSession,
        index: usize,
    ) -> InstallResult<Box<dyn Read + Send>> {
        let name = format!("pack-{index}");
        let raw: Box<dyn Read + Send> = if self.web_url.is_some() {
            self.download(&name)?
        } else {
            let path = self.installer_dir.join("packs").join(&name);
            debug!(pack = %path.display(), "opening pack stream");
            Box::new(BufReader::new(File::open(path)?))
        };
        pack_decoder(self.encoding.as_deref(), raw)
    }

    fn inline_payloads(&self) -> bool {
        true
    }
}

/// Reads pack metadata from `packs/pack-<n>` and payloads from the volumes named in
/// `volumes.info`, asking the locator whenever a volume is missing or corrupt.
pub struct VolumeSource {
    installer_dir: PathBuf,
    encoding: Option<String>,
    locator: Box<dyn VolumeLocator>,
    info: Option<VolumesInfo>,
    first_volume: PathBuf,
    reader: Option<FileSpanningReader>,
}

impl VolumeSource {
    pub fn new(session: &InstallSession, locator: Box<dyn VolumeLocator>) -> Self {
        VolumeSource {
            installer_dir: session.installer_dir.clone(),
            encoding: session.manifest.pack_encoding.clone(),
            locator,
            info: None,
            first_volume: PathBuf::new(),
            reader: None,
        }
    }

    fn volume_count(&mut self) -> InstallResult<usize> {
        if let Some(info) = &self.info {
            return Ok(info.volume_count as usize);
        }
        let path = self.installer_dir.join(VOLUMES_INFO);
        let mut input = BufReader::new(File::open(&path)?);
        let info = VolumesInfo::read(&mut input)?;
        info!(volumes = info.volume_count, base = %info.base_name, "multi-volume installer");
        self.first_volume = self.installer_dir.join(&info.base_name);
        let count = info.volume_count as usize;
        self.info = Some(info);
        Ok(count)
    }

    fn open_reader(&mut self) -> InstallResult<FileSpanningReader> {
        let count = self.volume_count()?;
        loop {
            match FileSpanningReader::open(&self.first_volume, count) {
                Ok(reader) => return Ok(reader),
                Err(err) if err.is_recoverable() => {
                    let corrupt = matches!(err, VolumeError::Corrupt { .. });
                    match self.locator.locate(&self.first_volume, corrupt) {
                        Some(path) => self.first_volume = path,
                        None => return Err(InstallError::VolumeAborted(self.first_volume.clone())),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl PackSource for VolumeSource {
    fn open_pack(
        &mut self,
        _session: &InstallSession,
        index: usize,
    ) -> InstallResult<Box<dyn Read + Send>> {
        let path = self.installer_dir.join("packs").join(format!("pack-{index}"));
        debug!(pack = %path.display(), "opening pack metadata");
        pack_decoder(self.encoding.as_deref(), Box::new(BufReader::new(File::open(path)?)))
    }

    fn inline_payloads(&self) -> bool {
        false
    }

    fn copy_external(&mut self, pf: &PackFile, out: &mut dyn Write) -> InstallResult<u64> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => self.open_reader()?,
        };
        let copied = copy_from_volumes(&mut reader, self.locator.as_mut(), pf, out);
        self.reader = Some(reader);
        copied
    }

    fn copy_back_reference(
        &mut self,
        session: &InstallSession,
        reference: BackReference,
        out: &mut dyn Write,
    ) -> InstallResult<u64> {
        let mut stream = self.open_pack(session, reference.pack as usize)?;
        let pf = find_record(&mut stream, reference.file, false)?;
        if let Some(loose) = &pf.loose_source {
            return copy_file(&loose_path(session, loose), out);
        }
        if pf.directory || pf.is_back_reference() {
            return Err(InstallError::BackReferenceUnavailable(pf.target_path));
        }
        // The shared reader only moves forward, earlier content needs its own stream.
        let mut reader = self.open_reader()?;
        copy_from_volumes(&mut reader, self.locator.as_mut(), &pf, out)
    }
}

/// Runs `op` until it succeeds, re-pointing the reader at a volume supplied by the
/// locator after every missing or corrupt one.
fn with_recovery<T>(
    reader: &mut FileSpanningReader,
    locator: &mut dyn VolumeLocator,
    mut op: impl FnMut(&mut FileSpanningReader) -> Result<T, VolumeError>,
) -> InstallResult<T> {
    loop {
        match op(reader) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_recoverable() => {
                let corrupt = matches!(err, VolumeError::Corrupt { .. });
                let expected = reader.next_volume_path();
                warn!(
                    volume = %expected.display(),
                    after = %reader.current_volume().display(),
                    pointer = reader.file_pointer(),
                    "{err}"
                );
                match locator.locate(&expected, corrupt) {
                    Some(path) => reader.relocate(path),
                    None => return Err(InstallError::VolumeAborted(expected)),
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn copy_from_volumes(
    reader: &mut FileSpanningReader,
    locator: &mut dyn VolumeLocator,
    pf: &PackFile,
    out: &mut dyn Write,
) -> InstallResult<u64> {
    if reader.file_pointer() < pf.archive_position {
        debug!(from = reader.file_pointer(), to = pf.archive_position, "skipping in volume stream");
        with_recovery(reader, locator, |r| r.skip_to(pf.archive_position))?;
    } else if reader.file_pointer() > pf.archive_position {
        return Err(VolumeError::Backwards {
            current: reader.file_pointer(),
            target: pf.archive_position,
        }
        .into());
    }

    let mut buffer = [0u8; COPY_BUFFER];
    let mut copied = 0u64;
    while copied < pf.length {
        let want = ((pf.length - copied) as usize).min(buffer.len());
        let read = with_recovery(reader, locator, |r| r.read_some(&mut buffer[..want]))?;
        if read == 0 {
            return Err(FormatError::UnexpectedEof.into());
        }
        out.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    Ok(copied)
}

/// Reads the pack header and advances to record `file`, returning it.
fn find_record(stream: &mut dyn Read, file: u32, inline: bool) -> InstallResult<PackFile> {
    let count = read_header(stream)?;
    if file >= count {
        return Err(FormatError::UnexpectedEof.into());
    }
    for _ in 0..file {
        let pf: PackFile = read_record(stream)?;
        if inline && pf.has_inline_payload() {
            skip_exact(stream, pf.length)?;
        }
    }
    Ok(read_record(stream)?)
}

fn copy_exact(input: &mut dyn Read, out: &mut dyn Write, length: u64) -> InstallResult<u64> {
    let copied = io::copy(&mut (&mut *input).take(length), out)?;
    if copied < length {
        return Err(FormatError::UnexpectedEof.into());
    }
    Ok(copied)
}

fn skip_exact(input: &mut dyn Read, length: u64) -> InstallResult<()> {
    copy_exact(input, &mut io::sink(), length).map(|_| ())
}

fn copy_file(source: &Path, out: &mut dyn Write) -> InstallResult<u64> {
    let mut input = File::open(source)?;
    Ok(io::copy(&mut input, out)?)
}

/// Loose sources are relative to the installer directory unless absolute.
fn loose_path(session: &InstallSession, loose: &str) -> PathBuf {
    let path = native_path(&session.variables.substitute(loose));
    if path.is_absolute() {
        path
    } else {
        session.installer_dir.join(path)
    }
}

fn is_keepme(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("izpack-keepme") && n.ends_with(".tmp"))
}

/// Where the bytes of a regular file come from.
enum Payload {
    Inline,
    Loose(PathBuf),
    Written(PathBuf),
    BackReference(BackReference),
    External,
}

/// State shared by every unpacker kind.
#[derive(Default)]
pub struct UnpackerBase {
    listeners: Vec<Box<dyn InstallerListener>>,
    result: bool,
    /// Files written in this run, by their pack and file index.
    written: HashMap<BackReference, PathBuf>,
}

impl UnpackerBase {
    fn notify(
        &mut self,
        files_only: bool,
        mut event: impl FnMut(&mut dyn InstallerListener) -> anyhow::Result<()>,
    ) -> InstallResult<()> {
        if files_only && !self.listeners.iter().any(|l| l.is_file_listener()) {
            return Ok(());
        }
        for listener in &mut self.listeners {
            event(listener.as_mut()).map_err(|err| InstallError::Listener(format!("{err:#}")))?;
        }
        Ok(())
    }

    fn unpack(
        &mut self,
        source: &mut dyn PackSource,
        session: &mut InstallSession,
        handler: &mut dyn ProgressHandler,
    ) -> bool {
        let token = session.interrupts.register();
        self.written.clear();
        register_uninstaller_resources(session);
        let packs: Vec<(usize, Pack)> = session.selected().map(|(i, p)| (i, p.clone())).collect();
        handler.start_action("Unpacking", packs.len());

        let result = match self.unpack_packs(source, session, handler, &token, &packs) {
            Ok(collected) => {
                // files are in place; post-processing runs to the end
                session.interrupts.set_discard_interrupt(true);
                let processed = self.post_process(session, handler, collected);
                session.interrupts.set_discard_interrupt(false);
                match processed {
                    Ok(result) => result,
                    Err(err) => {
                        handler.emit_error("An error occurred", &err.to_string());
                        false
                    }
                }
            }
            Err(InstallError::Interrupted) => {
                info!("unpacking interrupted");
                false
            }
            Err(err) => {
                handler.emit_error("An error occurred", &err.to_string());
                false
            }
        };
        handler.stop_action();
        self.result = result;
        result
    }

    fn unpack_packs(
        &mut self,
        source: &mut dyn PackSource,
        session: &mut InstallSession,
        handler: &mut dyn ProgressHandler,
        token: &CancellationToken,
        packs: &[(usize, Pack)],
    ) -> InstallResult<PackTrailer> {
        let all: Vec<Pack> = packs.iter().map(|(_, p)| p.clone()).collect();
        self.notify(false, |l| l.before_packs(&all))?;

        let mut collected = PackTrailer::default();
        for (step, (index, pack)) in packs.iter().enumerate() {
            if token.perform_interrupted() {
                return Err(InstallError::Interrupted);
            }
            if !one_matches_current_system(&pack.os)
                || !session.is_condition_true(pack.condition.as_deref())
            {
                debug!(pack = %pack.name, "pack skipped by condition");
                continue;
            }
            info!(pack = %pack.name, "unpacking pack");
            self.notify(false, |l| l.before_pack(pack, step))?;
            self.unpack_pack(source, session, handler, token, *index, pack, step, &mut collected)?;
            self.notify(false, |l| l.after_pack(pack, step))?;
        }

        self.notify(false, |l| l.after_packs())?;
        Ok(collected)
    }

    #[allow(clippy::too_many_arguments)]
    fn unpack_pack(
        &mut self,
        source: &mut dyn PackSource,
        session: &mut InstallSession,
        handler: &mut dyn ProgressHandler,
        token: &CancellationToken,
        index: usize,
        pack: &Pack,
        step: usize,
        collected: &mut PackTrailer,
    ) -> InstallResult<()> {
        let mut stream = source.open_pack(session, index)?;
        let count = read_header(&mut stream)?;
        handler.next_step(&pack.name, step + 1, count as usize);

        for file_index in 0..count {
            if token.perform_interrupted() {
                return Err(InstallError::Interrupted);
            }
            let pf: PackFile = read_record(&mut stream)?;
            let inline = source.inline_payloads() && pf.has_inline_payload();

            if !one_matches_current_system(&pf.os_constraints)
                || !session.is_condition_true(pf.condition.as_deref())
            {
                debug!(path = %pf.target_path, "file skipped by condition");
                if inline {
                    skip_exact(&mut stream, pf.length)?;
                }
                continue;
            }

            let target = session.variables.substitute(&pf.target_path);
            let path = native_path(&target);
            handler.progress(file_index as usize, &target);

            if pf.directory {
                self.create_dirs(&path, &pf, session)?;
                continue;
            }
            if let Some(parent) = path.parent() {
                self.create_dirs(parent, &pf, session)?;
            }
            session.uninstall.add_file(target.as_str());

            if path.exists() && !should_override(&pf, &path, handler) {
                debug!(path = %path.display(), "existing file kept");
                if inline {
                    skip_exact(&mut stream, pf.length)?;
                }
                continue;
            }

            let payload = if let Some(reference) = pf.back_reference {
                match self.written.get(&reference) {
                    Some(earlier) if earlier.is_file() => Payload::Written(earlier.clone()),
                    _ => Payload::BackReference(reference),
                }
            } else if let Some(loose) = &pf.loose_source {
                Payload::Loose(loose_path(session, loose))
            } else if inline {
                Payload::Inline
            } else {
                Payload::External
            };
            if let Payload::Loose(src) = &payload {
                if !src.is_file() {
                    handler.emit_error("Missing loose file", &src.display().to_string());
                    continue;
                }
            }

            self.notify(true, |l| l.before_file(&path, &pf))?;
            // the referenced content already sits at this path
            let in_place = matches!(&payload, Payload::Written(earlier) if *earlier == path);
            if in_place {
                debug!(path = %path.display(), "back reference already in place");
            } else {
                let mut out = BufWriter::new(File::create(&path)?);
                let copied = match payload {
                    Payload::Inline => copy_exact(&mut stream, &mut out, pf.length)?,
                    Payload::Loose(src) => copy_file(&src, &mut out)?,
                    Payload::Written(earlier) => {
                        debug!(
                            path = %path.display(),
                            from = %earlier.display(),
                            "copying back reference"
                        );
                        copy_file(&earlier, &mut out)?
                    }
                    Payload::BackReference(reference) => {
                        debug!(path = %path.display(), ?reference, "re-reading back reference");
                        source.copy_back_reference(session, reference, &mut out)?
                    }
                    Payload::External => source.copy_external(&pf, &mut out)?,
                };
                out.flush()?;
                drop(out);
                debug!(path = %path.display(), bytes = copied, "file written");
                // earlier entries naming this path no longer hold their content
                self.written.retain(|_, written| *written != path);
            }

            if pf.mtime >= 0 {
                set_mtime_millis(&path, pf.mtime)?;
            }
            if pf.mode != 0 {
                set_mode(&path, pf.mode)?;
            }
            self.written.insert(
                BackReference {
                    pack: index as u32,
                    file: file_index,
                },
                path.clone(),
            );
            self.notify(true, |l| l.after_file(&path, &pf))?;

            if is_keepme(&path) {
                fs::remove_file(&path)?;
            }
        }

        let trailer = read_trailer(&mut stream)?;
        let vars = &session.variables;
        for mut parsable in trailer.parsables {
            parsable.path = vars.substitute(&parsable.path);
            collected.parsables.push(parsable);
        }
        for mut executable in trailer.executables {
            executable.path = vars.substitute(&executable.path);
            executable.args = executable.args.iter().map(|a| vars.substitute(a)).collect();
            if executable.stage == ExecutionStage::Uninstall {
                session.uninstall.add_executable(executable.clone());
            }
            collected.executables.push(executable);
        }
        collected.update_checks.extend(trailer.update_checks);
        Ok(())
    }

    /// Creates `dir` and its missing parents, recording each created directory.
    fn create_dirs(
        &mut self,
        dir: &Path,
        pf: &PackFile,
        session: &mut InstallSession,
    ) -> InstallResult<()> {
        if dir.as_os_str().is_empty() || dir.is_dir() {
            return Ok(());
        }
        if let Some(parent) = dir.parent() {
            self.create_dirs(parent, pf, session)?;
        }
        self.notify(true, |l| l.before_dir(dir, pf))?;
        if let Err(err) = fs::create_dir(dir) {
            if !dir.is_dir() {
                return Err(err.into());
            }
        }
        session.uninstall.add_file(dir.to_string_lossy());
        self.notify(true, |l| l.after_dir(dir, pf))
    }

    fn post_process(
        &mut self,
        session: &mut InstallSession,
        handler: &mut dyn ProgressHandler,
        collected: PackTrailer,
    ) -> InstallResult<bool> {
        let parsed = ScriptParser::new(&collected.parsables, session).parse_files()?;
        debug!(substitutions = parsed, "parsable files processed");

        let result = match FileExecutor::new(&collected.executables).execute_files(
            ExecutionStage::PostInstall,
            session,
            handler,
        ) {
            Ok(()) => {
                if let Some(install_path) = session.install_path() {
                    let deleted = perform_update_checks(
                        &collected.update_checks,
                        &install_path,
                        &session.variables,
                        &session.uninstall,
                    );
                    if !deleted.is_empty() {
                        info!(count = deleted.len(), "removed files of a previous installation");
                    }
                }
                true
            }
            Err(err) => {
                warn!("{err}");
                handler.emit_error("File execution failed", "The installation was not completed");
                false
            }
        };

        write_uninstaller(session);
        Ok(result)
    }
}

fn should_override(pf: &PackFile, path: &Path, handler: &mut dyn ProgressHandler) -> bool {
    match pf.override_policy {
        OverridePolicy::True => true,
        OverridePolicy::False => false,
        OverridePolicy::Update => mtime_millis(path).is_some_and(|existing| existing < pf.mtime),
        OverridePolicy::AskFalse | OverridePolicy::AskTrue => {
            let default = if pf.override_policy == OverridePolicy::AskTrue {
                Answer::Yes
            } else {
                Answer::No
            };
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            handler.ask_question(
                &format!("File already exists: {name}"),
                &format!("Overwrite {}?", path.display()),
                Choices::YesNo,
                Some(default),
            ) == Answer::Yes
        }
    }
}

/// Unpacks packs read through a [`PackSource`].
pub struct Unpacker<S> {
    base: UnpackerBase,
    source: S,
}

/// Multi-volume installers read payloads from spanning volumes.
pub type MultiVolumeUnpacker = Unpacker<VolumeSource>;

impl<S: PackSource> Unpacker<S> {
    pub fn with_source(source: S) -> Self {
        Unpacker {
            base: UnpackerBase::default(),
            source,
        }
    }
}

impl<S: PackSource> Unpack for Unpacker<S> {
    fn add_listener(&mut self, listener: Box<dyn InstallerListener>) {
        self.base.listeners.push(listener);
    }

    fn run(&mut self, session: &mut InstallSession, handler: &mut dyn ProgressHandler) -> bool {
        self.base.unpack(&mut self.source, session, handler)
    }

    fn result(&self) -> bool {
        self.base.result
    }
}

/// Picks the unpacker for the installer kind of the session.
pub fn create_unpacker(
    session: &InstallSession,
    locator: Box<dyn VolumeLocator>,
) -> Box<dyn Unpack> {
    match session.manifest.kind {
        InstallerKind::Multivolume => {
            Box::new(Unpacker::with_source(VolumeSource::new(session, locator)))
        }
        InstallerKind::Standard | InstallerKind::Web => {
            Box::new(Unpacker::with_source(ArchiveSource::new(session)))
        }
    }
}

/// Runs `unpacker` on a dedicated thread that borrows the session and handler, and
/// waits for it.
pub fn run_unpacker_scoped(
    unpacker: &mut dyn Unpack,
    session: &mut InstallSession,
    handler: &mut dyn ProgressHandler,
) -> io::Result<bool> {
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("unpacker".to_string())
            .spawn_scoped(scope, move || unpacker.run(session, handler))?;
        worker
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "unpacker thread panicked"))
    })
}

/// Runs `unpacker` on its own thread; joining yields the session and the result.
pub fn spawn_unpacker(
    mut unpacker: Box<dyn Unpack>,
    mut session: InstallSession,
    mut handler: Box<dyn ProgressHandler>,
) -> io::Result<JoinHandle<(InstallSession, bool)>> {
    thread::Builder::new().name("unpacker".to_string()).spawn(move || {
        let result = unpacker.run(&mut session, handler.as_mut());
        (session, result)
    })
}
