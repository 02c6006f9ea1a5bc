//! Typed view of the `avb.toml` metadata records produced by `avbroot avb unpack`.
//!
//! Only the fields the signing pipeline reads or rewrites are typed. Everything
//! else is kept in the `extra` tables so that a load/store cycle never loses
//! information the codec needs when packing.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize, Serializer, de::DeserializeOwned};
use toml::Table;

use crate::error::{Error, IoContext, Result};

pub mod synth;

/// File name of the metadata record inside an unpacked partition directory.
pub const AVB_TOML: &str = "avb.toml";
/// File name of the payload of an image that has no AVB footer yet.
pub const RAW_IMG: &str = "raw.img";

pub const FLAG_HASHTREE_DISABLED: u32 = 1 << 0;
pub const FLAG_VERIFICATION_DISABLED: u32 = 1 << 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvbInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
    pub header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<Footer>,
    #[serde(flatten)]
    pub extra: Table,
}

impl AvbInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        toml::from_str(&content).map_err(|e| Error::TomlDe(path.to_path_buf(), e))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string(self).map_err(|e| Error::TomlSer(path.to_path_buf(), e))?;
        fs::write(path, content).with_path(path)
    }

    /// The descriptor whose `partition_name` is `name`, if any.
    pub fn descriptor_for(&self, name: &str) -> Option<&Descriptor> {
        self.header
            .descriptors
            .iter()
            .find(|d| d.partition_name() == Some(name))
    }

    pub fn is_signed(&self) -> bool {
        self.header.algorithm_type.is_signed()
    }

    /// Whether the codec has to recompute the image size when packing.
    pub fn has_hash_tree(&self) -> bool {
        self.header
            .descriptors
            .iter()
            .any(|d| matches!(d, Descriptor::HashTree(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub algorithm_type: AlgorithmType,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub public_key_metadata: String,
    #[serde(default)]
    pub rollback_index: u64,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub rollback_index_location: u32,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Table,
}

impl Header {
    /// Re-enables verification and hash tree checking.
    pub fn clear_disabled_flags(&mut self) {
        self.flags &= !(FLAG_HASHTREE_DISABLED | FLAG_VERIFICATION_DISABLED);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footer {
    #[serde(default)]
    pub original_image_size: u64,
    #[serde(default)]
    pub vbmeta_offset: u64,
    #[serde(default)]
    pub vbmeta_size: u64,
    #[serde(flatten)]
    pub extra: Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlgorithmType {
    None,
    Sha256Rsa4096,
    Other(String),
}

impl AlgorithmType {
    pub fn is_signed(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<String> for AlgorithmType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "None" => Self::None,
            "Sha256Rsa4096" => Self::Sha256Rsa4096,
            _ => Self::Other(value),
        }
    }
}

impl From<AlgorithmType> for String {
    fn from(value: AlgorithmType) -> Self {
        match value {
            AlgorithmType::None => "None".to_string(),
            AlgorithmType::Sha256Rsa4096 => "Sha256Rsa4096".to_string(),
            AlgorithmType::Other(name) => name,
        }
    }
}

/// A descriptor in a vbmeta header, keyed by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Table")]
pub enum Descriptor {
    ChainPartition(ChainPartitionDescriptor),
    HashTree(DigestDescriptor),
    Hash(DigestDescriptor),
    /// Any other variant, passed through untouched.
    Opaque { kind: String, fields: Table },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPartitionDescriptor {
    pub partition_name: String,
    pub rollback_index_location: u32,
    pub public_key: String,
    #[serde(flatten)]
    pub extra: Table,
}

/// Payload shared by hash and hash tree descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestDescriptor {
    pub partition_name: String,
    #[serde(default)]
    pub image_size: u64,
    #[serde(default)]
    pub root_digest: String,
    #[serde(flatten)]
    pub extra: Table,
}

impl Descriptor {
    pub fn kind(&self) -> &str {
        match self {
            Self::ChainPartition(_) => "ChainPartition",
            Self::HashTree(_) => "HashTree",
            Self::Hash(_) => "Hash",
            Self::Opaque { kind, .. } => kind,
        }
    }

    /// Name of the partition this descriptor refers to.
    pub fn partition_name(&self) -> Option<&str> {
        match self {
            Self::ChainPartition(d) => Some(&d.partition_name),
            Self::HashTree(d) | Self::Hash(d) => Some(&d.partition_name),
            Self::Opaque { fields, .. } => fields.get("partition_name").and_then(|v| v.as_str()),
        }
    }
}

impl TryFrom<Table> for Descriptor {
    type Error = Error;

    fn try_from(mut table: Table) -> Result<Self> {
        let kind = match table.remove("type") {
            Some(toml::Value::String(kind)) => kind,
            Some(other) => {
                return Err(Error::Parse(format!(
                    "descriptor type must be a string, got {other}"
                )));
            }
            None => return Err(Error::Parse("descriptor has no `type` field".to_string())),
        };

        let descriptor = match kind.as_str() {
            "ChainPartition" => Self::ChainPartition(decode_fields(&kind, table)?),
            "HashTree" => Self::HashTree(decode_fields(&kind, table)?),
            "Hash" => Self::Hash(decode_fields(&kind, table)?),
            _ => Self::Opaque {
                kind,
                fields: table,
            },
        };

        Ok(descriptor)
    }
}

fn decode_fields<T: DeserializeOwned>(kind: &str, table: Table) -> Result<T> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| Error::Parse(format!("{kind} descriptor: {e}")))
}

impl Serialize for Descriptor {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Tagged<'a, T> {
            r#type: &'a str,
            #[serde(flatten)]
            fields: &'a T,
        }

        match self {
            Self::ChainPartition(fields) => Tagged {
                r#type: self.kind(),
                fields,
            }
            .serialize(serializer),
            Self::HashTree(fields) | Self::Hash(fields) => Tagged {
                r#type: self.kind(),
                fields,
            }
            .serialize(serializer),
            Self::Opaque { kind, fields } => Tagged {
                r#type: kind,
                fields,
            }
            .serialize(serializer),
        }
    }
}
