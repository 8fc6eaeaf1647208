use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("bad magic number, not a pack stream")]
    BadMagic,
    #[error("unsupported pack stream version {0}")]
    UnsupportedVersion(u16),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("invalid UTF-8 in string field")]
    InvalidString,
    #[error("unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::UnexpectedEof
        } else {
            FormatError::Io(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("corrupt volume: {}", path.display())]
    Corrupt { path: PathBuf },
    #[error("cannot seek backwards from {current} to {target}")]
    Backwards { current: u64, target: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VolumeError {
    /// Missing and corrupt volumes can be recovered by pointing the stream at another file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VolumeError::NotFound { .. } | VolumeError::Corrupt { .. })
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unknown pack decoder: {0}")]
    Decoder(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("installer listener failed: {0}")]
    Listener(String),
    #[error("content of back-referenced file {0} is unavailable")]
    BackReferenceUnavailable(String),
    #[error("no volume supplied for {}", .0.display())]
    VolumeAborted(PathBuf),
    #[error("execution of {0} failed")]
    Execution(String),
    #[error("installation interrupted")]
    Interrupted,
}

pub type InstallResult<T> = Result<T, InstallError>;
