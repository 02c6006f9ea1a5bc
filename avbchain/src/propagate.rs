//! The pack loop. Partitions are packed children first, and each parent
//! vbmeta image picks up the recomputed descriptors and public keys of the
//! children it references before it is packed and signed itself.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    avb::{AvbInfo, Descriptor},
    codec::ImageCodec,
    error::{Error, Result},
    store::{PartitionImage, PartitionSet},
};

/// What a packed partition exposes to the partitions referencing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignedEntry {
    /// The partition's descriptor for itself, after packing.
    pub descriptor: Option<Descriptor>,
    /// Set when the partition is signed.
    pub public_key: Option<String>,
}

/// Results of the partitions packed so far in one run.
#[derive(Debug, Clone, Default)]
pub struct SignedState {
    entries: BTreeMap<String, SignedEntry>,
}

impl SignedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SignedEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records the outcome of packing `name`.
    pub fn record(&mut self, name: &str, info: &AvbInfo) {
        let entry = SignedEntry {
            descriptor: info.descriptor_for(name).cloned(),
            public_key: info
                .is_signed()
                .then(|| info.header.public_key.clone()),
        };
        self.entries.insert(name.to_string(), entry);
    }

    /// Rewrites the descriptors `info` holds for other partitions with what
    /// packing those partitions produced. For a signed child only the public
    /// key of the chain descriptor changes; an unsigned child's hash or hash
    /// tree descriptor replaces the old one entirely.
    pub fn apply(&self, name: &str, info: &mut AvbInfo) -> Result<()> {
        for descriptor in &mut info.header.descriptors {
            let Some(child) = descriptor.partition_name().map(str::to_string) else {
                continue;
            };
            if child == name {
                continue;
            }

            let entry = self.get(&child).ok_or_else(|| {
                Error::Invariant(format!("{name} references {child}, which is not packed yet"))
            })?;

            if let Some(public_key) = &entry.public_key {
                match descriptor {
                    Descriptor::ChainPartition(chain) => chain.public_key = public_key.clone(),
                    other => {
                        return Err(Error::Invariant(format!(
                            "{child} is signed, but {name} has a {} descriptor for it",
                            other.kind()
                        )));
                    }
                }
            } else {
                let recomputed = entry.descriptor.clone().ok_or_else(|| {
                    Error::Invariant(format!("{child} has no descriptor for itself"))
                })?;
                *descriptor = recomputed;
            }
        }

        Ok(())
    }
}

/// Drives the pack phase over an ordered set of partitions.
pub struct Propagator<'a> {
    codec: &'a dyn ImageCodec,
    key: PathBuf,
    output_dir: PathBuf,
    vbmeta_prefix: String,
    state: SignedState,
}

impl<'a> Propagator<'a> {
    pub fn new(codec: &'a dyn ImageCodec, key: &Path, output_dir: &Path) -> Self {
        Self {
            codec,
            key: key.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            vbmeta_prefix: "vbmeta".to_string(),
            state: SignedState::new(),
        }
    }

    /// Partitions whose name starts with `prefix` are treated as vbmeta
    /// images and get their child descriptors refreshed.
    pub fn vbmeta_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.vbmeta_prefix = prefix.into();
        self
    }

    pub fn is_vbmeta(&self, name: &str) -> bool {
        name.starts_with(&self.vbmeta_prefix)
    }

    /// `<output_dir>/<name>.img`
    pub fn output_image(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{name}.img"))
    }

    /// Packs one partition. Everything it references must be packed already.
    pub fn pack_one(&mut self, partition: &mut PartitionImage) -> Result<()> {
        if self.is_vbmeta(&partition.name) {
            self.state.apply(&partition.name, &mut partition.info)?;
        }

        partition.info.header.clear_disabled_flags();

        let output = self.output_image(&partition.name);
        partition.info = self.codec.pack(partition, &self.key, &output)?;

        self.state.record(&partition.name, &partition.info);
        Ok(())
    }

    /// Packs every partition of `order` in turn and returns the state
    /// accumulated along the way.
    pub fn run(mut self, order: &[String], partitions: &mut PartitionSet) -> Result<SignedState> {
        let pb = ProgressBar::new(order.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{pos}/{len}] {msg}") {
            pb.set_style(style);
        }

        for name in order {
            pb.set_message(name.clone());
            let partition = partitions
                .get_mut(name)
                .ok_or_else(|| Error::Parse(format!("partition {name} not found")))?;
            self.pack_one(partition)?;
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(self.state)
    }
}

impl fmt::Debug for Propagator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagator")
            .field("key", &self.key)
            .field("output_dir", &self.output_dir)
            .field("vbmeta_prefix", &self.vbmeta_prefix)
            .field("state", &self.state)
            .finish()
    }
}
