//! Dynamic partitions: mapping between the `_a`/`_b` slot images inside the
//! LP super container and standalone per-partition images.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use toml::Table;

use crate::{
    avb::{AVB_TOML, Descriptor, RAW_IMG, synth::synthesize},
    codec::ImageCodec,
    error::{Error, IoContext, Result},
};

/// Manifest written by `avbroot lp unpack`.
pub const LP_TOML: &str = "lp.toml";
/// Directory holding one image per slot partition.
pub const LP_IMAGES: &str = "lp_images";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpInfo {
    pub slots: Vec<LpSlot>,
    #[serde(flatten)]
    pub extra: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpSlot {
    #[serde(default)]
    pub groups: Vec<LpGroup>,
    #[serde(flatten)]
    pub extra: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpGroup {
    #[serde(default)]
    pub partitions: Vec<LpPartition>,
    #[serde(flatten)]
    pub extra: Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpPartition {
    pub name: String,
    #[serde(flatten)]
    pub extra: Table,
}

impl LpInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        toml::from_str(&content).map_err(|e| Error::TomlDe(path.to_path_buf(), e))
    }

    /// Partitions of the first metadata slot. All slots describe the same
    /// layout, so the first one is authoritative.
    pub fn partitions(&self) -> Result<impl Iterator<Item = &LpPartition>> {
        let slot = self
            .slots
            .first()
            .ok_or_else(|| Error::Parse("LP metadata has no slots".to_string()))?;
        Ok(slot.groups.iter().flat_map(|g| g.partitions.iter()))
    }
}

/// A partition inside the super container, by slot suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<'a> {
    /// `<name>_a`, holds the live data.
    Active(&'a str),
    /// `<name>_b`, always empty.
    Inactive(&'a str),
}

impl<'a> Slot<'a> {
    pub fn classify(lp_name: &'a str) -> Result<Self> {
        if let Some(name) = lp_name.strip_suffix("_a") {
            Ok(Self::Active(name))
        } else if let Some(name) = lp_name.strip_suffix("_b") {
            Ok(Self::Inactive(name))
        } else {
            Err(Error::Invariant(format!(
                "Unknown LP partition name: {lp_name}"
            )))
        }
    }
}

/// Moves partition images in and out of the super container.
pub struct DynamicPartitionMapper<'a> {
    codec: &'a dyn ImageCodec,
    name: String,
}

impl<'a> DynamicPartitionMapper<'a> {
    /// `name` is the container's partition name, normally `super`.
    pub fn new(codec: &'a dyn ImageCodec, name: impl Into<String>) -> Self {
        Self {
            codec,
            name: name.into(),
        }
    }

    /// `<dir>/<name>.img`
    pub fn image_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.img", self.name))
    }

    /// `<dir>/<name>`
    pub fn staging_dir(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }

    /// Decodes the sparse chunks in order into a single container image.
    pub fn join(&self, chunks: &[PathBuf], output: &Path) -> Result<()> {
        // Sparse holes keep whatever is already in the file.
        match fs::remove_file(output) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(Error::Io(output.to_path_buf(), e));
            }
            _ => {}
        }

        for chunk in chunks {
            self.codec.sparse_join(chunk, output)?;
        }
        Ok(())
    }

    /// Extracts `container` into `output_dir`, turning every `_a` slot into a
    /// `<output_dir>/<name>/` partition directory. Images without AVB
    /// metadata get a header generated from the descriptor their vbmeta
    /// image holds in `references`.
    ///
    /// The container image is deleted afterwards; the manifest stays in
    /// `<output_dir>/<name>/lp.toml` for [`Self::pack`]. Returns the logical
    /// partition names.
    pub fn unpack(
        &self,
        container: &Path,
        output_dir: &Path,
        references: &BTreeMap<String, Descriptor>,
    ) -> Result<BTreeSet<String>> {
        let super_dir = self.staging_dir(output_dir);
        fs::create_dir_all(&super_dir).with_path(&super_dir)?;

        self.codec.container_unpack(container, &super_dir)?;
        fs::remove_file(container).with_path(container)?;

        let manifest = LpInfo::load(&super_dir.join(LP_TOML))?;
        let images_dir = super_dir.join(LP_IMAGES);
        let mut logical = BTreeSet::new();

        for partition in manifest.partitions()? {
            let lp_image = images_dir.join(format!("{}.img", partition.name));

            let name = match Slot::classify(&partition.name)? {
                Slot::Inactive(_) => {
                    let size = fs::metadata(&lp_image).with_path(&lp_image)?.len();
                    if size != 0 {
                        return Err(Error::Invariant(format!(
                            "{} should be empty, but is {:#}",
                            partition.name,
                            Byte::from_u64(size)
                        )));
                    }
                    continue;
                }
                Slot::Active(name) => name,
            };

            let image_dir = output_dir.join(name);
            fs::create_dir_all(&image_dir).with_path(&image_dir)?;

            if self.codec.probe_valid(&lp_image)? {
                self.codec.unpack(&lp_image, &image_dir)?;
            } else {
                let reference = references.get(name).ok_or_else(|| {
                    Error::Invariant(format!(
                        "{name} has no AVB metadata and no vbmeta descriptor"
                    ))
                })?;
                synthesize(reference)?.save(&image_dir.join(AVB_TOML))?;

                let raw = image_dir.join(RAW_IMG);
                fs::rename(&lp_image, &raw).with_path(&raw)?;
            }

            logical.insert(name.to_string());
        }

        fs::remove_dir_all(&images_dir).with_path(&images_dir)?;
        Ok(logical)
    }

    /// Rebuilds the container from `manifest` and the packed
    /// `<output_dir>/<name>.img` images of its `_a` slots, which are consumed.
    /// Returns the path of the new container image.
    pub fn pack(&self, manifest: &Path, output_dir: &Path) -> Result<PathBuf> {
        let super_dir = self.staging_dir(output_dir);
        let images_dir = super_dir.join(LP_IMAGES);
        fs::create_dir_all(&images_dir).with_path(&images_dir)?;

        let lp_toml = super_dir.join(LP_TOML);
        fs::copy(manifest, &lp_toml).with_path(&lp_toml)?;
        let info = LpInfo::load(&lp_toml)?;

        for partition in info.partitions()? {
            let lp_image = images_dir.join(format!("{}.img", partition.name));

            match Slot::classify(&partition.name)? {
                Slot::Active(name) => {
                    let image = output_dir.join(format!("{name}.img"));
                    fs::rename(&image, &lp_image).with_path(&image)?;
                }
                Slot::Inactive(_) => {
                    fs::File::create(&lp_image).with_path(&lp_image)?;
                }
            }
        }

        let output = self.image_path(output_dir);
        self.codec.container_pack(&super_dir, &output)?;
        fs::remove_dir_all(&super_dir).with_path(&super_dir)?;

        Ok(output)
    }
}
