//! An in-memory stand-in for avbroot. "Images" are TOML documents: an AVB
//! image is its `avb.toml`, a super container lists its LP metadata and the
//! contents of every slot image.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use avbchain::{
    Error, Result,
    avb::{
        AVB_TOML, AlgorithmType, AvbInfo, ChainPartitionDescriptor, Descriptor, DigestDescriptor,
        Header, RAW_IMG,
    },
    codec::{CodecVersion, ImageCodec},
    lp::{LP_IMAGES, LP_TOML, LpInfo},
    store::PartitionImage,
};
use serde::{Deserialize, Serialize};
use toml::Table;

pub const KEY: &[u8] = b"test signing key";
pub const OLD_KEY: &str = "0123456789abcdef";
pub const SYSTEM_PAYLOAD: &str = "system payload";

#[derive(Debug, Serialize, Deserialize)]
pub struct FakeContainer {
    pub lp: LpInfo,
    pub images: BTreeMap<String, String>,
}

impl FakeContainer {
    pub fn load(path: &Path) -> Self {
        toml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

#[derive(Clone)]
pub struct FakeCodec {
    version: CodecVersion,
    calls: Rc<RefCell<Vec<String>>>,
    corrupt: Option<String>,
}

impl FakeCodec {
    pub fn new() -> Self {
        Self::with_version(CodecVersion::REQUIRED)
    }

    pub fn with_version(version: CodecVersion) -> Self {
        Self {
            version,
            calls: Rc::default(),
            corrupt: None,
        }
    }

    /// Writes a wrong digest into the packed image of `name`, while still
    /// reporting the right one to the caller.
    pub fn corrupting(mut self, name: &str) -> Self {
        self.corrupt = Some(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Partitions passed to `pack`, in call order.
    pub fn packed(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("pack "))
            .map(str::to_string)
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn verify(&self, image: &Path, public_key: &str) -> Result<()> {
        let info = AvbInfo::load(image)?;
        let name = file_stem(image);

        if info.header.public_key != public_key {
            return Err(Error::Invariant(format!("{name}: public key mismatch")));
        }
        if info.header.flags != 0 {
            return Err(Error::Invariant(format!("{name}: verification disabled")));
        }

        let dir = image.parent().unwrap_or(Path::new("."));
        for descriptor in &info.header.descriptors {
            let Some(child) = descriptor.partition_name() else {
                continue;
            };
            if child == name {
                continue;
            }

            let child_image = dir.join(format!("{child}.img"));
            match descriptor {
                Descriptor::ChainPartition(chain) => self.verify(&child_image, &chain.public_key)?,
                _ => {
                    let child_info = AvbInfo::load(&child_image)?;
                    if child_info.descriptor_for(child) != Some(descriptor) {
                        return Err(Error::Invariant(format!("{child}: digest mismatch")));
                    }
                }
            }
        }
        Ok(())
    }
}

impl ImageCodec for FakeCodec {
    fn version(&self) -> Result<CodecVersion> {
        Ok(self.version)
    }

    fn probe_valid(&self, image: &Path) -> Result<bool> {
        Ok(AvbInfo::load(image).is_ok())
    }

    fn unpack(&self, image: &Path, dir: &Path) -> Result<AvbInfo> {
        self.record(format!("unpack {}", file_stem(image)));
        let info = AvbInfo::load(image)?;
        info.save(&dir.join(AVB_TOML))?;
        Ok(info)
    }

    fn pack(&self, partition: &PartitionImage, key: &Path, output: &Path) -> Result<AvbInfo> {
        self.record(format!("pack {}", partition.name));

        let raw = partition.dir.join(RAW_IMG);
        let payload = if raw.exists() {
            fs::read(&raw).map_err(io_error(&raw))?
        } else {
            Vec::new()
        };
        let digest = fake_digest(&partition.name, &payload);

        let mut info = partition.info.clone();
        for descriptor in &mut info.header.descriptors {
            match descriptor {
                Descriptor::Hash(own) | Descriptor::HashTree(own)
                    if own.partition_name == partition.name =>
                {
                    own.image_size = payload.len() as u64;
                    own.root_digest = digest.clone();
                }
                _ => {}
            }
        }
        if info.is_signed() {
            info.header.public_key = hex(&fs::read(key).map_err(io_error(key))?);
            info.header.signature = "5".repeat(1024);
            info.header.hash = digest;
        }
        info.image_size = Some(payload.len() as u64);

        info.save(&partition.avb_toml())?;
        if self.corrupt.as_deref() == Some(partition.name.as_str()) {
            let mut written = info.clone();
            for descriptor in &mut written.header.descriptors {
                if let Descriptor::Hash(own) | Descriptor::HashTree(own) = descriptor {
                    own.root_digest = "f".repeat(own.root_digest.len());
                }
            }
            written.save(output)?;
        } else {
            info.save(output)?;
        }
        Ok(info)
    }

    fn verify_chain(&self, root_image: &Path, public_key: &[u8]) -> Result<()> {
        self.record(format!("verify {}", file_stem(root_image)));
        self.verify(root_image, &hex(public_key))
    }

    fn sparse_join(&self, chunk: &Path, output: &Path) -> Result<()> {
        self.record(format!("sparse {}", chunk.display()));
        let data = fs::read(chunk).map_err(io_error(chunk))?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .and_then(|mut f| f.write_all(&data))
            .map_err(io_error(output))
    }

    fn container_unpack(&self, image: &Path, dir: &Path) -> Result<()> {
        self.record(format!("lp unpack {}", file_stem(image)));
        let content = fs::read_to_string(image).map_err(io_error(image))?;
        let container: FakeContainer =
            toml::from_str(&content).map_err(|e| Error::Parse(e.to_string()))?;

        let lp = toml::to_string(&container.lp).map_err(|e| Error::Parse(e.to_string()))?;
        let lp_toml = dir.join(LP_TOML);
        fs::write(&lp_toml, lp).map_err(io_error(&lp_toml))?;

        let images_dir = dir.join(LP_IMAGES);
        fs::create_dir_all(&images_dir).map_err(io_error(&images_dir))?;
        for (name, data) in &container.images {
            let path = images_dir.join(format!("{name}.img"));
            fs::write(&path, data).map_err(io_error(&path))?;
        }
        Ok(())
    }

    fn container_pack(&self, dir: &Path, output: &Path) -> Result<()> {
        self.record(format!("lp pack {}", file_stem(output)));
        let lp = LpInfo::load(&dir.join(LP_TOML))?;

        let mut images = BTreeMap::new();
        for partition in lp.partitions()? {
            let path = dir.join(LP_IMAGES).join(format!("{}.img", partition.name));
            let data = fs::read_to_string(&path).map_err(io_error(&path))?;
            images.insert(partition.name.clone(), data);
        }

        let content = toml::to_string(&FakeContainer { lp, images })
            .map_err(|e| Error::Parse(e.to_string()))?;
        fs::write(output, content).map_err(io_error(output))
    }

    fn encode_public_key(&self, key: &Path) -> Result<Vec<u8>> {
        self.record("encode key".to_string());
        fs::read(key).map_err(io_error(key))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |e| Error::Io(path.to_path_buf(), e)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// FNV-1a, widened to the length of a SHA-256 hex digest.
pub fn fake_digest(name: &str, payload: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in name.bytes().chain(payload.iter().copied()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}").repeat(4)
}

pub fn chain(name: &str, location: u32, key: &str) -> Descriptor {
    Descriptor::ChainPartition(ChainPartitionDescriptor {
        partition_name: name.to_string(),
        rollback_index_location: location,
        public_key: key.to_string(),
        extra: Table::new(),
    })
}

fn digest(name: &str, payload: &str) -> DigestDescriptor {
    DigestDescriptor {
        partition_name: name.to_string(),
        image_size: payload.len() as u64,
        root_digest: fake_digest(name, payload.as_bytes()),
        extra: Table::new(),
    }
}

pub fn hash(name: &str, payload: &str) -> Descriptor {
    Descriptor::Hash(digest(name, payload))
}

pub fn hash_tree(name: &str, payload: &str) -> Descriptor {
    Descriptor::HashTree(digest(name, payload))
}

pub fn avb_info(signed: bool, flags: u32, descriptors: Vec<Descriptor>) -> AvbInfo {
    let (algorithm_type, public_key) = if signed {
        (AlgorithmType::Sha256Rsa4096, OLD_KEY.to_string())
    } else {
        (AlgorithmType::None, String::new())
    };

    AvbInfo {
        image_size: None,
        header: Header {
            algorithm_type,
            hash: String::new(),
            signature: String::new(),
            public_key,
            public_key_metadata: String::new(),
            rollback_index: 0,
            flags,
            rollback_index_location: 0,
            descriptors,
            extra: Table::new(),
        },
        footer: None,
        extra: Table::new(),
    }
}

pub fn avb_image(info: &AvbInfo) -> String {
    toml::to_string(info).unwrap()
}

pub fn vbmeta_info() -> AvbInfo {
    avb_info(true, 3, vec![chain("vbmeta_system", 1, OLD_KEY)])
}

pub fn vbmeta_system_info() -> AvbInfo {
    avb_info(
        true,
        0,
        vec![
            hash_tree("system", SYSTEM_PAYLOAD),
            hash_tree("vendor", ""),
            hash("boot", ""),
        ],
    )
}

pub fn vendor_info() -> AvbInfo {
    avb_info(false, 0, vec![hash_tree("vendor", "")])
}

/// Slot images of the default super container: `system` is raw, `vendor`
/// carries its own AVB metadata.
pub fn default_slots() -> Vec<(&'static str, String)> {
    vec![
        ("system_a", SYSTEM_PAYLOAD.to_string()),
        ("vendor_a", avb_image(&vendor_info())),
        ("system_b", String::new()),
        ("vendor_b", String::new()),
    ]
}

/// Writes the vbmeta images, `boot.img` and, if `slots` is given, a super
/// container split into two sparse chunks.
pub fn write_firmware(dir: &Path, slots: Option<Vec<(&str, String)>>) {
    fs::write(dir.join("vbmeta.img"), avb_image(&vbmeta_info())).unwrap();
    fs::write(dir.join("vbmeta_system.img"), avb_image(&vbmeta_system_info())).unwrap();
    fs::write(
        dir.join("boot.img"),
        avb_image(&avb_info(false, 0, vec![hash("boot", "")])),
    )
    .unwrap();

    let Some(slots) = slots else {
        return;
    };

    let mut groups = String::from("[[slots]]\n[[slots.groups]]\nname = \"default\"\n");
    for suffix in ["a", "b"] {
        groups += &format!("\n[[slots.groups]]\nname = \"main_{suffix}\"\n");
        for (name, _) in slots.iter().filter(|(n, _)| n.ends_with(&format!("_{suffix}"))) {
            groups += &format!("\n[[slots.groups.partitions]]\nname = \"{name}\"\n");
        }
    }
    for (name, _) in slots.iter().filter(|(n, _)| !n.ends_with("_a") && !n.ends_with("_b")) {
        groups += &format!("\n[[slots.groups.partitions]]\nname = \"{name}\"\n");
    }

    let container = FakeContainer {
        lp: toml::from_str(&groups).unwrap(),
        images: slots
            .into_iter()
            .map(|(name, data)| (name.to_string(), data))
            .collect(),
    };
    let content = toml::to_string(&container).unwrap();
    let (first, second) = content.split_at(content.len() / 2);
    fs::write(dir.join("super.img.0"), first).unwrap();
    fs::write(dir.join("super.img.1"), second).unwrap();
}

pub fn write_key(dir: &Path) -> PathBuf {
    let key = dir.join("avb.key");
    fs::write(&key, KEY).unwrap();
    key
}
