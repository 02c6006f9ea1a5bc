use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{
    avb::{AVB_TOML, AvbInfo},
    error::{Error, Result},
    utils::glob_sorted,
};

/// One unpacked partition: its directory on disk and its metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionImage {
    pub name: String,
    pub dir: PathBuf,
    pub info: AvbInfo,
}

impl PartitionImage {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, info: AvbInfo) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            info,
        }
    }

    /// Loads `<dir>/avb.toml`. The partition is named after the directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Parse(format!("bad partition directory: {}", dir.display())))?;
        let info = AvbInfo::load(&dir.join(AVB_TOML))?;
        Ok(Self::new(name, dir, info))
    }

    pub fn avb_toml(&self) -> PathBuf {
        self.dir.join(AVB_TOML)
    }

    pub fn save(&self) -> Result<()> {
        self.info.save(&self.avb_toml())
    }
}

/// All partitions of a run, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PartitionSet {
    images: BTreeMap<String, PartitionImage>,
}

impl PartitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `<dir>/*/avb.toml`.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        for avb_toml in glob_sorted(dir, &format!("*/{AVB_TOML}"))? {
            if let Some(image_dir) = avb_toml.parent() {
                set.insert(PartitionImage::load(image_dir)?)?;
            }
        }
        debug!("Found {} partitions in {}", set.len(), dir.display());
        Ok(set)
    }

    pub fn insert(&mut self, image: PartitionImage) -> Result<()> {
        if self.images.contains_key(&image.name) {
            return Err(Error::Parse(format!("duplicate partition: {}", image.name)));
        }
        self.images.insert(image.name.clone(), image);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PartitionImage> {
        self.images.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PartitionImage> {
        self.images.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// `(name, metadata)` pairs, the input of the dependency graph.
    pub fn records(&self) -> impl Iterator<Item = (&str, &AvbInfo)> {
        self.images.values().map(|p| (p.name.as_str(), &p.info))
    }
}

impl FromIterator<PartitionImage> for PartitionSet {
    fn from_iter<T: IntoIterator<Item = PartitionImage>>(iter: T) -> Self {
        Self {
            images: iter.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }
}
