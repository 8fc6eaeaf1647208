//! Binary layout of pack streams and the multi-volume descriptor.
//!
//! A pack stream is `IZPK`, a `u16` version, a `u32` file count, then per
//! file a length-prefixed [`PackFile`] record followed by its payload (when
//! [`PackFile::has_inline_payload`] holds and the installer is not
//! multi-volume). Three trailing record lists follow: parsables,
//! executables and update checks. Every record is a `u32` body length and
//! the body; readers ignore body bytes they do not understand.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::FormatError;
use crate::types::{
    BackReference, ExecutableFile, ExecutableKind, ExecutionStage, FailurePolicy, OsConstraint,
    OverridePolicy, PackFile, ParsableFile, UpdateCheck,
};

pub const PACK_MAGIC: &[u8; 4] = b"IZPK";
pub const FORMAT_VERSION: u16 = 1;

const FLAG_DIRECTORY: u8 = 0b01;

// Records larger than this are treated as a corrupt stream.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

pub trait Record: Sized {
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(body: &mut Cursor<&[u8]>) -> Result<Self, FormatError>;
}

pub fn write_record<W: Write + ?Sized, R: Record>(out: &mut W, record: &R) -> std::io::Result<()> {
    let mut body = Vec::new();
    record.encode(&mut body);
    out.write_u32::<LittleEndian>(body.len() as u32)?;
    out.write_all(&body)
}

pub fn read_record<R: Read + ?Sized, T: Record>(input: &mut R) -> Result<T, FormatError> {
    let len = input.read_u32::<LittleEndian>()?;
    if len > MAX_RECORD_LEN {
        return Err(FormatError::UnexpectedEof);
    }
    let mut body = vec![0u8; len as usize];
    input.read_exact(&mut body)?;
    let mut cursor = Cursor::new(body.as_slice());
    T::decode(&mut cursor)
}

pub fn write_records<W: Write + ?Sized, R: Record>(
    out: &mut W,
    records: &[R],
) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(records.len() as u32)?;
    for record in records {
        write_record(out, record)?;
    }
    Ok(())
}

pub fn read_records<R: Read + ?Sized, T: Record>(input: &mut R) -> Result<Vec<T>, FormatError> {
    let count = input.read_u32::<LittleEndian>()?;
    let mut records = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        records.push(read_record(input)?);
    }
    Ok(records)
}

pub fn write_header<W: Write + ?Sized>(out: &mut W, file_count: u32) -> std::io::Result<()> {
    out.write_all(PACK_MAGIC)?;
    out.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    out.write_u32::<LittleEndian>(file_count)
}

/// Reads the stream preamble and returns the number of files in the pack.
pub fn read_header<R: Read + ?Sized>(input: &mut R) -> Result<u32, FormatError> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != PACK_MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = input.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(input.read_u32::<LittleEndian>()?)
}

/// The trailing descriptor lists of a pack stream.
#[derive(Debug, Default)]
pub struct PackTrailer {
    pub parsables: Vec<ParsableFile>,
    pub executables: Vec<ExecutableFile>,
    pub update_checks: Vec<UpdateCheck>,
}

pub fn read_trailer<R: Read + ?Sized>(input: &mut R) -> Result<PackTrailer, FormatError> {
    Ok(PackTrailer {
        parsables: read_records(input)?,
        executables: read_records(input)?,
        update_checks: read_records(input)?,
    })
}

pub fn write_trailer<W: Write + ?Sized>(out: &mut W, trailer: &PackTrailer) -> std::io::Result<()> {
    write_records(out, &trailer.parsables)?;
    write_records(out, &trailer.executables)?;
    write_records(out, &trailer.update_checks)
}

/// Contents of `volumes.info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumesInfo {
    pub volume_count: u32,
    pub base_name: String,
}

impl VolumesInfo {
    pub fn read<R: Read + ?Sized>(input: &mut R) -> Result<Self, FormatError> {
        let volume_count = input.read_u32::<LittleEndian>()?;
        let base_name = get_str(input)?;
        Ok(VolumesInfo { volume_count, base_name })
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.volume_count)?;
        let mut buf = Vec::new();
        put_str(&mut buf, &self.base_name);
        out.write_all(&buf)
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn get_str<R: Read + ?Sized>(input: &mut R) -> Result<String, FormatError> {
    let len = input.read_u32::<LittleEndian>()?;
    if len > MAX_RECORD_LEN {
        return Err(FormatError::UnexpectedEof);
    }
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| FormatError::InvalidString)
}

fn put_opt_str(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            out.push(1);
            put_str(out, v);
        }
        None => out.push(0),
    }
}

fn get_opt_str<R: Read + ?Sized>(input: &mut R) -> Result<Option<String>, FormatError> {
    match input.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(get_str(input)?)),
    }
}

fn put_strs(out: &mut Vec<u8>, values: &[String]) {
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        put_str(out, v);
    }
}

fn get_strs<R: Read + ?Sized>(input: &mut R) -> Result<Vec<String>, FormatError> {
    let count = input.read_u32::<LittleEndian>()?;
    (0..count).map(|_| get_str(input)).collect()
}

fn put_bool(out: &mut Vec<u8>, value: bool) {
    out.push(u8::from(value));
}

fn get_bool<R: Read + ?Sized>(input: &mut R) -> Result<bool, FormatError> {
    Ok(input.read_u8()? != 0)
}

fn put_os(out: &mut Vec<u8>, constraints: &[OsConstraint]) {
    out.extend_from_slice(&(constraints.len() as u32).to_le_bytes());
    for os in constraints {
        put_opt_str(out, os.family.as_deref());
        put_opt_str(out, os.name.as_deref());
        put_opt_str(out, os.version.as_deref());
        put_opt_str(out, os.arch.as_deref());
    }
}

fn get_os<R: Read + ?Sized>(input: &mut R) -> Result<Vec<OsConstraint>, FormatError> {
    let count = input.read_u32::<LittleEndian>()?;
    let mut constraints = Vec::new();
    for _ in 0..count {
        constraints.push(OsConstraint {
            family: get_opt_str(input)?,
            name: get_opt_str(input)?,
            version: get_opt_str(input)?,
            arch: get_opt_str(input)?,
        });
    }
    Ok(constraints)
}

impl Record for PackFile {
    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.target_path);
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.mode.to_le_bytes());
        out.push(self.override_policy.tag());
        out.push(if self.directory { FLAG_DIRECTORY } else { 0 });
        put_os(out, &self.os_constraints);
        put_opt_str(out, self.condition.as_deref());
        match self.back_reference {
            Some(r) => {
                out.push(1);
                out.extend_from_slice(&r.pack.to_le_bytes());
                out.extend_from_slice(&r.file.to_le_bytes());
            }
            None => out.push(0),
        }
        put_opt_str(out, self.loose_source.as_deref());
        out.extend_from_slice(&self.archive_position.to_le_bytes());
    }

    fn decode(body: &mut Cursor<&[u8]>) -> Result<Self, FormatError> {
        let target_path = get_str(body)?;
        let length = body.read_u64::<LittleEndian>()?;
        let mtime = body.read_i64::<LittleEndian>()?;
        let mode = body.read_u32::<LittleEndian>()?;
        let tag = body.read_u8()?;
        let override_policy = OverridePolicy::from_tag(tag)
            .ok_or(FormatError::UnknownTag { kind: "override", tag })?;
        let flags = body.read_u8()?;
        let os_constraints = get_os(body)?;
        let condition = get_opt_str(body)?;
        let back_reference = match body.read_u8()? {
            0 => None,
            _ => Some(BackReference {
                pack: body.read_u32::<LittleEndian>()?,
                file: body.read_u32::<LittleEndian>()?,
            }),
        };
        let loose_source = get_opt_str(body)?;
        let archive_position = body.read_u64::<LittleEndian>()?;
        Ok(PackFile {
            target_path,
            length,
            mtime,
            mode,
            override_policy,
            directory: flags & FLAG_DIRECTORY != 0,
            os_constraints,
            condition,
            back_reference,
            loose_source,
            archive_position,
        })
    }
}

impl Record for ParsableFile {
    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.path);
        put_str(out, &self.substitution_type);
        put_opt_str(out, self.encoding.as_deref());
        put_os(out, &self.os_constraints);
        put_opt_str(out, self.condition.as_deref());
    }

    fn decode(body: &mut Cursor<&[u8]>) -> Result<Self, FormatError> {
        Ok(ParsableFile {
            path: get_str(body)?,
            substitution_type: get_str(body)?,
            encoding: get_opt_str(body)?,
            os_constraints: get_os(body)?,
            condition: get_opt_str(body)?,
        })
    }
}

impl Record for ExecutableFile {
    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.path);
        out.push(match self.kind {
            ExecutableKind::Bin => 0,
            ExecutableKind::Jar => 1,
        });
        put_opt_str(out, self.main_class.as_deref());
        out.push(match self.stage {
            ExecutionStage::PostInstall => 0,
            ExecutionStage::Never => 1,
            ExecutionStage::Uninstall => 2,
        });
        out.push(match self.on_failure {
            FailurePolicy::Abort => 0,
            FailurePolicy::Warn => 1,
            FailurePolicy::Ask => 2,
        });
        put_strs(out, &self.args);
        put_bool(out, self.keep_file);
        put_os(out, &self.os_constraints);
        put_opt_str(out, self.condition.as_deref());
    }

    fn decode(body: &mut Cursor<&[u8]>) -> Result<Self, FormatError> {
        let path = get_str(body)?;
        let kind = match body.read_u8()? {
            0 => ExecutableKind::Bin,
            1 => ExecutableKind::Jar,
            tag => return Err(FormatError::UnknownTag { kind: "executable kind", tag }),
        };
        let main_class = get_opt_str(body)?;
        let stage = match body.read_u8()? {
            0 => ExecutionStage::PostInstall,
            1 => ExecutionStage::Never,
            2 => ExecutionStage::Uninstall,
            tag => return Err(FormatError::UnknownTag { kind: "execution stage", tag }),
        };
        let on_failure = match body.read_u8()? {
            0 => FailurePolicy::Abort,
            1 => FailurePolicy::Warn,
            2 => FailurePolicy::Ask,
            tag => return Err(FormatError::UnknownTag { kind: "failure policy", tag }),
        };
        Ok(ExecutableFile {
            path,
            kind,
            main_class,
            stage,
            on_failure,
            args: get_strs(body)?,
            keep_file: get_bool(body)?,
            os_constraints: get_os(body)?,
            condition: get_opt_str(body)?,
        })
    }
}

impl Record for UpdateCheck {
    fn encode(&self, out: &mut Vec<u8>) {
        put_strs(out, &self.includes);
        put_strs(out, &self.excludes);
        put_bool(out, self.case_sensitive);
    }

    fn decode(body: &mut Cursor<&[u8]>) -> Result<Self, FormatError> {
        Ok(UpdateCheck {
            includes: get_strs(body)?,
            excludes: get_strs(body)?,
            case_sensitive: get_bool(body)?,
        })
    }
}

/// Builders for pack streams used by unpacker tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    #[derive(Default)]
    pub(crate) struct PackStreamBuilder {
        files: Vec<(PackFile, Vec<u8>)>,
        pub(crate) trailer: PackTrailer,
    }

    impl PackStreamBuilder {
        pub(crate) fn file(mut self, pf: PackFile, payload: &[u8]) -> Self {
            self.files.push((pf, payload.to_vec()));
            self
        }

        pub(crate) fn executable(mut self, ef: ExecutableFile) -> Self {
            self.trailer.executables.push(ef);
            self
        }

        pub(crate) fn parsable(mut self, pf: ParsableFile) -> Self {
            self.trailer.parsables.push(pf);
            self
        }

        pub(crate) fn update_check(mut self, uc: UpdateCheck) -> Self {
            self.trailer.update_checks.push(uc);
            self
        }

        /// Serialises the pack; payloads are inlined unless `external` is set.
        pub(crate) fn build(&self, external: bool) -> Vec<u8> {
            let mut out = Vec::new();
            write_header(&mut out, self.files.len() as u32).unwrap();
            for (pf, payload) in &self.files {
                write_record(&mut out, pf).unwrap();
                if !external && pf.has_inline_payload() {
                    out.extend_from_slice(payload);
                }
            }
            write_trailer(&mut out, &self.trailer).unwrap();
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_file_record_preserves_fields() {
        let mut pf = PackFile::new("$INSTALL_PATH/lib/app.jar", 2048);
        pf.mtime = 1_700_000_000_000;
        pf.override_policy = OverridePolicy::AskTrue;
        pf.condition = Some("haveJava".to_string());
        pf.back_reference = Some(BackReference { pack: 0, file: 3 });
        pf.os_constraints.push(OsConstraint {
            family: Some("unix".to_string()),
            ..Default::default()
        });

        let mut buf = Vec::new();
        write_record(&mut buf, &pf).unwrap();
        let decoded: PackFile = read_record(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, pf);
    }

    #[test]
    fn test_reader_ignores_trailing_record_bytes() {
        let uc = UpdateCheck {
            includes: vec!["lib/*.jar".to_string()],
            excludes: vec![],
            case_sensitive: true,
        };
        let mut body = Vec::new();
        uc.encode(&mut body);
        body.extend_from_slice(b"future field");
        let mut buf = (body.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(&body);

        let decoded: UpdateCheck = read_record(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, uc);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let data = b"JAR!\x01\x00\x00\x00\x00\x00";
        assert!(matches!(read_header(&mut &data[..]), Err(FormatError::BadMagic)));
    }

    #[test]
    fn test_truncated_stream_is_unexpected_eof() {
        let mut buf = Vec::new();
        write_header(&mut buf, 1).unwrap();
        write_record(&mut buf, &PackFile::new("a", 10)).unwrap();
        buf.truncate(buf.len() - 3);
        let mut input = buf.as_slice();
        read_header(&mut input).unwrap();
        let result: Result<PackFile, _> = read_record(&mut input);
        assert!(matches!(result, Err(FormatError::UnexpectedEof)));
    }

    #[test]
    fn test_volumes_info() {
        let info = VolumesInfo {
            volume_count: 3,
            base_name: "installer.pak".to_string(),
        };
        let mut buf = Vec::new();
        info.write(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[3, 0, 0, 0]);
        assert_eq!(VolumesInfo::read(&mut buf.as_slice()).unwrap(), info);
    }
}
