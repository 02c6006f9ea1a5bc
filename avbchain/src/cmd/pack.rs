use std::{
    fs,
    path::{Path, PathBuf},
};

use byte_unit::Byte;
use colored::Colorize;

use crate::{
    ctx::AppContext,
    error::{Error, IoContext, Result},
    graph::DependencyGraph,
    lp::LP_TOML,
    propagate::SignedState,
    store::PartitionSet,
};

/// Outcome of [`pack`].
#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Partitions in the order they were packed.
    pub order: Vec<String>,
    pub state: SignedState,
    /// The rebuilt super container, if the input had one.
    pub container: Option<PathBuf>,
}

/// Repacks and re-signs every partition directory of `input_dir` into
/// `<output_dir>/<name>.img`, verifies the chain from the root image and
/// rebuilds the super container.
pub fn pack(ctx: &AppContext, input_dir: &Path, output_dir: &Path, key: &Path) -> Result<PackSummary> {
    let codec = ctx.codec();

    let mut partitions = PartitionSet::scan(input_dir)?;
    if partitions.is_empty() {
        return Err(Error::Parse(format!(
            "no unpacked partitions in {}",
            input_dir.display()
        )));
    }
    if !partitions.contains(&ctx.config.root) {
        return Err(Error::Invariant(format!(
            "root partition {} is not in {}",
            ctx.config.root,
            input_dir.display()
        )));
    }

    fs::create_dir_all(output_dir).with_path(output_dir)?;

    let graph = DependencyGraph::build(partitions.records())?;
    let order = graph.pack_order()?;
    info!("Pack order: {}", order.join(", "));

    println!("{}", format!("Packing {} partitions", order.len()).bold());
    let state = ctx
        .propagator(key, output_dir)
        .run(&order, &mut partitions)?;

    for name in &order {
        let image = output_dir.join(format!("{name}.img"));
        if let Ok(meta) = fs::metadata(&image) {
            debug!("{name}: {:#}", Byte::from_u64(meta.len()));
        }
    }

    println!("{}", "Verifying AVB chain".bold());
    let public_key = codec.encode_public_key(key)?;
    let root = output_dir.join(ctx.config.root_image());
    codec.verify_chain(&root, &public_key)?;

    let mapper = ctx.mapper();
    let manifest = mapper.staging_dir(input_dir).join(LP_TOML);
    let container = if manifest.exists() {
        println!("{}", format!("Packing {}", ctx.config.super_name).bold());
        let image = mapper.pack(&manifest, output_dir)?;
        let size = fs::metadata(&image).with_path(&image)?.len();
        info!("{}: {:#}", image.display(), Byte::from_u64(size));
        Some(image)
    } else {
        None
    };

    Ok(PackSummary {
        order,
        state,
        container,
    })
}
