use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::{CodecVersion, ImageCodec};
use crate::{
    avb::AvbInfo,
    error::{Error, IoContext, Result},
    store::PartitionImage,
    utils::{Command, absolute},
};

/// [`ImageCodec`] backed by the `avbroot` command line tool.
pub struct Avbroot {
    program: PathBuf,
}

impl Avbroot {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, workdir: &Path) -> Command {
        Command::new(&self.program, workdir)
    }

    fn cwd() -> Result<PathBuf> {
        std::env::current_dir().with_path(Path::new("."))
    }
}

impl Default for Avbroot {
    fn default() -> Self {
        Self::new("avbroot")
    }
}

impl ImageCodec for Avbroot {
    fn version(&self) -> Result<CodecVersion> {
        let out = self
            .command(&Self::cwd()?)
            .arg("--version")
            .read_stdout()?;
        String::from_utf8_lossy(&out).parse()
    }

    fn probe_valid(&self, image: &Path) -> Result<bool> {
        self.command(&Self::cwd()?)
            .args(["avb", "info", "--quiet", "--input"])
            .arg(absolute(image)?)
            .succeeds()
    }

    fn unpack(&self, image: &Path, dir: &Path) -> Result<AvbInfo> {
        info!("Unpacking AVB image: {} -> {}", image.display(), dir.display());

        let mut cmd = self.command(dir);
        cmd.args(["avb", "unpack", "--quiet", "--input"])
            .arg(absolute(image)?)
            .arg("--ignore-invalid");
        cmd.run()?;

        AvbInfo::load(&dir.join(crate::avb::AVB_TOML))
    }

    fn pack(&self, partition: &PartitionImage, key: &Path, output: &Path) -> Result<AvbInfo> {
        info!(
            "Packing AVB image: {} -> {}",
            partition.dir.display(),
            output.display()
        );

        let avb_toml = absolute(&partition.avb_toml())?;
        partition.info.save(&avb_toml)?;

        let mut cmd = self.command(&partition.dir);
        cmd.args(["avb", "pack", "--quiet", "--output"])
            .arg(absolute(output)?)
            .arg("--key")
            .arg(absolute(key)?)
            // Written back with the recomputed digests and signature so
            // parents can pick them up.
            .arg("--output-info")
            .arg(&avb_toml);
        // Hash tree images are dynamic partitions whose size follows the data.
        if partition.info.has_hash_tree() {
            cmd.arg("--recompute-size");
        }
        cmd.run()?;

        AvbInfo::load(&avb_toml)
    }

    fn verify_chain(&self, root_image: &Path, public_key: &[u8]) -> Result<()> {
        info!("Verifying AVB signatures: {}", root_image.display());

        let mut key_file = NamedTempFile::new().with_path(&std::env::temp_dir())?;
        key_file.write_all(public_key).with_path(key_file.path())?;
        key_file.flush().with_path(key_file.path())?;

        let mut cmd = self.command(&Self::cwd()?);
        cmd.args(["avb", "verify", "--input"])
            .arg(absolute(root_image)?)
            .arg("--public-key")
            .arg(key_file.path());
        cmd.run()
    }

    fn sparse_join(&self, chunk: &Path, output: &Path) -> Result<()> {
        info!(
            "Unpacking sparse image: {} -> {}",
            chunk.display(),
            output.display()
        );

        let mut cmd = self.command(&Self::cwd()?);
        cmd.args(["sparse", "unpack", "--quiet", "--input"])
            .arg(absolute(chunk)?)
            .arg("--output")
            .arg(absolute(output)?)
            .arg("--preserve");
        cmd.run()
    }

    fn container_unpack(&self, image: &Path, dir: &Path) -> Result<()> {
        info!("Unpacking LP image: {} -> {}", image.display(), dir.display());

        let mut cmd = self.command(dir);
        cmd.args(["lp", "unpack", "--quiet", "--input"])
            .arg(absolute(image)?);
        cmd.run()
    }

    fn container_pack(&self, dir: &Path, output: &Path) -> Result<()> {
        info!("Packing LP image: {} -> {}", dir.display(), output.display());

        let mut cmd = self.command(dir);
        cmd.args(["lp", "pack", "--quiet", "--output"])
            .arg(absolute(output)?);
        cmd.run()
    }

    fn encode_public_key(&self, key: &Path) -> Result<Vec<u8>> {
        let out_file = NamedTempFile::new().with_path(&std::env::temp_dir())?;

        let mut cmd = self.command(&Self::cwd()?);
        cmd.args(["key", "encode-avb", "--key"])
            .arg(absolute(key)?)
            .arg("--output")
            .arg(out_file.path());
        cmd.run()?;

        let public_key = fs::read(out_file.path()).with_path(out_file.path())?;
        if public_key.is_empty() {
            return Err(Error::Parse(format!(
                "no public key encoded from {}",
                key.display()
            )));
        }
        Ok(public_key)
    }
}
