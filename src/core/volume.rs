//! A single logical byte stream stored across several volume files.
//!
//! The first volume is `<base>`, the following ones `<base>.1`, `<base>.2`
//! and so on. Every volume starts with the same magic number; the logical
//! stream is the concatenation of the volumes with their magic stripped.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::VolumeError;

pub const MAGIC_NUMBER_LENGTH: usize = 10;

const SKIP_BUFFER: usize = 64 * 1024;

pub struct FileSpanningReader {
    base_path: PathBuf,
    volumes: usize,
    index: usize,
    current: BufReader<File>,
    current_path: PathBuf,
    magic: [u8; MAGIC_NUMBER_LENGTH],
    relocated: Option<PathBuf>,
    file_pointer: u64,
}

impl FileSpanningReader {
    pub fn open(first_volume: &Path, volumes: usize) -> Result<Self, VolumeError> {
        if !first_volume.is_file() {
            return Err(VolumeError::NotFound {
                path: first_volume.to_path_buf(),
            });
        }
        let (current, magic) = open_volume(first_volume, None)?;
        debug!(volume = %first_volume.display(), volumes, "opened first volume");
        Ok(FileSpanningReader {
            base_path: first_volume.to_path_buf(),
            volumes: volumes.max(1),
            index: 0,
            current,
            current_path: first_volume.to_path_buf(),
            magic,
            relocated: None,
            file_pointer: 0,
        })
    }

    /// Logical offset of the next byte to be read.
    pub fn file_pointer(&self) -> u64 {
        self.file_pointer
    }

    pub fn current_volume(&self) -> &Path {
        &self.current_path
    }

    /// Path the next volume will be opened from.
    pub fn next_volume_path(&self) -> PathBuf {
        self.relocated
            .clone()
            .unwrap_or_else(|| volume_path(&self.base_path, self.index + 1))
    }

    /// Points the pending next volume at another file, e.g. a different medium.
    pub fn relocate(&mut self, path: PathBuf) {
        debug!(path = %path.display(), index = self.index + 1, "relocating volume");
        self.relocated = Some(path);
    }

    /// Reads up to `buf.len()` bytes, opening the next volume when the current one is exhausted.
    ///
    /// On error no bytes have been consumed, so the call can be retried after [`relocate`].
    ///
    /// [`relocate`]: FileSpanningReader::relocate
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, VolumeError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let read = self.current.read(buf)?;
            if read > 0 {
                self.file_pointer += read as u64;
                return Ok(read);
            }
            if self.index + 1 >= self.volumes {
                debug!("last volume reached");
                return Ok(0);
            }
            self.open_next_volume()?;
        }
    }

    /// Advances to the logical offset `target`. Seeking backwards is an error.
    pub fn skip_to(&mut self, target: u64) -> Result<(), VolumeError> {
        if target < self.file_pointer {
            return Err(VolumeError::Backwards {
                current: self.file_pointer,
                target,
            });
        }
        let mut scratch = vec![0u8; SKIP_BUFFER];
        while self.file_pointer < target {
            let want = ((target - self.file_pointer) as usize).min(scratch.len());
            if self.read_some(&mut scratch[..want])? == 0 {
                return Err(VolumeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
        Ok(())
    }

    fn open_next_volume(&mut self) -> Result<(), VolumeError> {
        let path = self.next_volume_path();
        if !path.is_file() {
            return Err(VolumeError::NotFound { path });
        }
        let (reader, _) = open_volume(&path, Some(&self.magic))?;
        if let Some(relocated) = self.relocated.take() {
            // Later volumes are looked up next to the relocated one.
            if let (Some(dir), Some(name)) = (relocated.parent(), self.base_path.file_name()) {
                self.base_path = dir.join(name);
            }
        }
        self.index += 1;
        self.current = reader;
        self.current_path = path;
        debug!(volume = %self.current_path.display(), index = self.index, "opened volume");
        Ok(())
    }
}

impl Read for FileSpanningReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_some(buf).map_err(|err| match err {
            VolumeError::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        })
    }
}

pub fn volume_path(base: &Path, index: usize) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn open_volume(
    path: &Path,
    expected: Option<&[u8; MAGIC_NUMBER_LENGTH]>,
) -> Result<(BufReader<File>, [u8; MAGIC_NUMBER_LENGTH]), VolumeError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; MAGIC_NUMBER_LENGTH];
    if reader.read_exact(&mut magic).is_err() {
        return Err(VolumeError::Corrupt {
            path: path.to_path_buf(),
        });
    }
    if let Some(expected) = expected {
        if &magic != expected {
            return Err(VolumeError::Corrupt {
                path: path.to_path_buf(),
            });
        }
    }
    Ok((reader, magic))
}

/// Splits `data` into volumes of at most `volume_size` bytes (magic included).
#[cfg(test)]
pub(crate) fn write_volumes(
    base: &Path,
    data: &[u8],
    volume_size: usize,
    magic: &[u8; MAGIC_NUMBER_LENGTH],
) -> usize {
    let chunk = volume_size - MAGIC_NUMBER_LENGTH;
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![&[][..]]
    } else {
        data.chunks(chunk).collect()
    };
    for (index, part) in chunks.iter().enumerate() {
        let mut file = File::create(volume_path(base, index)).unwrap();
        file.write_all(magic).unwrap();
        file.write_all(part).unwrap();
    }
    chunks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MAGIC: [u8; MAGIC_NUMBER_LENGTH] = *b"0123456789";

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_reads_across_volume_boundaries() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("install.pak");
        let data = sample(100);
        let volumes = write_volumes(&base, &data, 40, &MAGIC);
        assert_eq!(volumes, 4);

        let mut reader = FileSpanningReader::open(&base, volumes).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.file_pointer(), 100);
    }

    #[test]
    fn test_skip_to_is_logical_offset() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("install.pak");
        let data = sample(100);
        let volumes = write_volumes(&base, &data, 40, &MAGIC);

        let mut reader = FileSpanningReader::open(&base, volumes).unwrap();
        reader.skip_to(65).unwrap();
        let mut byte = [0u8; 1];
        reader.read_some(&mut byte).unwrap();
        assert_eq!(byte[0], data[65]);
        assert!(matches!(
            reader.skip_to(10),
            Err(VolumeError::Backwards { current: 66, target: 10 })
        ));
    }

    #[test]
    fn test_missing_volume_keeps_position_and_recovers() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("install.pak");
        let data = sample(90);
        let volumes = write_volumes(&base, &data, 40, &MAGIC);

        let moved = dir.path().join("media2");
        fs::create_dir(&moved).unwrap();
        let second = volume_path(&base, 1);
        let relocated = moved.join("install.pak.1");
        fs::rename(&second, &relocated).unwrap();
        fs::rename(volume_path(&base, 2), moved.join("install.pak.2")).unwrap();

        let mut reader = FileSpanningReader::open(&base, volumes).unwrap();
        let err = reader.skip_to(45).unwrap_err();
        assert!(matches!(err, VolumeError::NotFound { ref path } if *path == second));
        assert_eq!(reader.file_pointer(), 30);

        reader.relocate(relocated);
        reader.skip_to(45).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, &data[45..]);
    }

    #[test]
    fn test_corrupt_volume_is_reported() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("install.pak");
        let data = sample(50);
        let volumes = write_volumes(&base, &data, 40, &MAGIC);
        let second = volume_path(&base, 1);
        let mut bytes = fs::read(&second).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&second, bytes).unwrap();

        let mut reader = FileSpanningReader::open(&base, volumes).unwrap();
        let mut buf = vec![0u8; 50];
        let first = reader.read_some(&mut buf).unwrap();
        assert_eq!(first, 30);
        let err = reader.read_some(&mut buf[first..]).unwrap_err();
        assert!(matches!(err, VolumeError::Corrupt { .. }));
        assert_eq!(reader.file_pointer(), 30);
    }
}
