use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use colored::Colorize;

use crate::{
    avb::Descriptor,
    ctx::AppContext,
    error::{Error, IoContext, Result},
    utils::glob_sorted,
};

/// Partitions extracted by [`unpack`], by where they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnpackSummary {
    pub vbmeta: BTreeSet<String>,
    pub dynamic: BTreeSet<String>,
    pub standalone: BTreeSet<String>,
}

impl UnpackSummary {
    pub fn len(&self) -> usize {
        self.vbmeta.len() + self.dynamic.len() + self.standalone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts the vbmeta images of `input_dir`, the dynamic partitions of the
/// super container and every other image the vbmeta images reference, one
/// directory per partition under `output_dir`.
pub fn unpack(ctx: &AppContext, input_dir: &Path, output_dir: &Path) -> Result<UnpackSummary> {
    let codec = ctx.codec();
    let mut summary = UnpackSummary::default();
    fs::create_dir_all(output_dir).with_path(output_dir)?;

    println!("{}", "Unpacking vbmeta images".bold());
    let mut references: BTreeMap<String, Descriptor> = BTreeMap::new();
    let pattern = format!("{}*.img", ctx.config.vbmeta_prefix);
    for image in glob_sorted(input_dir, &pattern)? {
        let Some(name) = image.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let dir = output_dir.join(name);
        fs::create_dir_all(&dir).with_path(&dir)?;

        info!("Unpacking {}", image.display());
        let info = codec.unpack(&image, &dir)?;
        for descriptor in info.header.descriptors {
            if let Some(partition) = descriptor.partition_name() {
                references.insert(partition.to_string(), descriptor.clone());
            }
        }
        summary.vbmeta.insert(name.to_string());
    }

    if summary.vbmeta.is_empty() {
        return Err(Error::Invariant(format!(
            "no {pattern} images in {}",
            input_dir.display()
        )));
    }

    let mapper = ctx.mapper();
    let chunks = glob_sorted(input_dir, &format!("{}.img.*", ctx.config.super_name))?;
    if chunks.is_empty() {
        warn!(
            "No {}.img.* chunks in {}, skipping dynamic partitions",
            ctx.config.super_name,
            input_dir.display()
        );
    } else {
        println!(
            "{}",
            format!("Unpacking {} from {} chunks", ctx.config.super_name, chunks.len()).bold()
        );
        let container = mapper.image_path(output_dir);
        mapper.join(&chunks, &container)?;
        summary.dynamic = mapper.unpack(&container, output_dir, &references)?;
    }

    println!("{}", "Unpacking referenced images".bold());
    for name in references.keys() {
        if summary.vbmeta.contains(name) || summary.dynamic.contains(name) {
            continue;
        }

        let image = input_dir.join(format!("{name}.img"));
        let dir = output_dir.join(name);
        fs::create_dir_all(&dir).with_path(&dir)?;

        info!("Unpacking {}", image.display());
        codec.unpack(&image, &dir)?;
        summary.standalone.insert(name.clone());
    }

    info!(
        "Unpacked {} partitions into {}",
        summary.len(),
        output_dir.display()
    );
    Ok(summary)
}
