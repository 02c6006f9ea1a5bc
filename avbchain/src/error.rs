use std::{
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use thiserror::Error;

use crate::codec::CodecVersion;

#[derive(Debug, Error)]
pub enum Error {
    /// Metadata is malformed or references something that does not exist.
    #[error("Invalid metadata: {0}")]
    Parse(String),
    #[error("Invariant violated: {0}")]
    Invariant(String),
    #[error("Dependency cycle between partitions: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("`{program}` failed with {status}: {stderr}")]
    ExternalTool {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("avbroot version {found} < {required}")]
    VersionMismatch {
        found: CodecVersion,
        required: CodecVersion,
    },
    #[error("I/O error on {}", .0.display())]
    Io(PathBuf, #[source] io::Error),
    #[error("Failed to parse {}", .0.display())]
    TomlDe(PathBuf, #[source] toml::de::Error),
    #[error("Failed to serialize {}", .0.display())]
    TomlSer(PathBuf, #[source] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the path an I/O operation was acting on.
pub(crate) trait IoContext<T> {
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::Io(path.to_path_buf(), e))
    }
}
