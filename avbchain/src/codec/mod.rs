//! Format specific operations on images. Everything that reads or writes the
//! binary AVB, LP and sparse formats, signs or verifies goes through
//! [`ImageCodec`].

use std::{fmt, path::Path, str::FromStr};

use crate::{
    avb::AvbInfo,
    error::{Error, Result},
    store::PartitionImage,
};

mod avbroot;

pub use avbroot::Avbroot;

pub trait ImageCodec {
    fn version(&self) -> Result<CodecVersion>;

    /// Whether `image` carries valid AVB metadata.
    fn probe_valid(&self, image: &Path) -> Result<bool>;

    /// Extracts `image` into `dir` and returns the metadata written there.
    fn unpack(&self, image: &Path, dir: &Path) -> Result<AvbInfo>;

    /// Packs `partition` into `output` signed with `key`. Returns the
    /// metadata with the recomputed digests, sizes and signature.
    fn pack(&self, partition: &PartitionImage, key: &Path, output: &Path) -> Result<AvbInfo>;

    /// Verifies the whole chain starting at `root_image`.
    fn verify_chain(&self, root_image: &Path, public_key: &[u8]) -> Result<()>;

    /// Decodes one sparse chunk into `output`, keeping what other chunks
    /// already wrote there.
    fn sparse_join(&self, chunk: &Path, output: &Path) -> Result<()>;

    fn container_unpack(&self, image: &Path, dir: &Path) -> Result<()>;

    fn container_pack(&self, dir: &Path, output: &Path) -> Result<()>;

    /// AVB encoded public key for the private key at `key`.
    fn encode_public_key(&self, key: &Path) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CodecVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CodecVersion {
    /// Oldest avbroot with the `avb pack --output-info` and sparse
    /// `--preserve` fixes this tool relies on.
    pub const REQUIRED: Self = Self::new(3, 19, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for CodecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for CodecVersion {
    type Err = Error;

    /// Accepts both `3.19.0` and the `avbroot 3.19.0` banner.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let version = s.strip_prefix("avbroot ").unwrap_or(s);
        let bad = || Error::Parse(format!("invalid version: {s:?}"));

        let mut parts = version.split('.').map(|p| p.parse::<u32>().map_err(|_| bad()));
        let major = parts.next().ok_or_else(bad)??;
        let minor = parts.next().unwrap_or(Ok(0))?;
        let patch = parts.next().unwrap_or(Ok(0))?;
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self::new(major, minor, patch))
    }
}

/// Fails unless the codec is at least [`CodecVersion::REQUIRED`].
pub fn check_version(codec: &dyn ImageCodec) -> Result<CodecVersion> {
    let found = codec.version()?;
    if found < CodecVersion::REQUIRED {
        return Err(Error::VersionMismatch {
            found,
            required: CodecVersion::REQUIRED,
        });
    }
    debug!("avbroot version: {found}");
    Ok(found)
}
