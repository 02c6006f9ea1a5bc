use toml::{Table, Value};

use super::{AlgorithmType, AvbInfo, Descriptor, Footer, Header};
use crate::error::{Error, Result};

/// Hex length of a SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;
/// Hex length of an RSA-4096 signature.
pub const SIGNATURE_HEX_LEN: usize = 1024;
/// Hex length of an AVB encoded RSA-4096 public key.
pub const PUBLIC_KEY_HEX_LEN: usize = 1032;

const RELEASE_STRING: &str = "avbtool 1.3.0";

/// Builds placeholder metadata for an image that has no AVB footer.
///
/// `reference` is the descriptor the parent vbmeta image holds for this
/// partition. A chain descriptor means the partition signs itself, so the
/// header gets zeroed hash, signature and key fields of the right size. The
/// real values are filled in when the image is packed.
pub fn synthesize(reference: &Descriptor) -> Result<AvbInfo> {
    let name = reference.partition_name().ok_or_else(|| {
        Error::Invariant(format!(
            "cannot generate metadata from a {} descriptor without a partition name",
            reference.kind()
        ))
    })?;
    info!("Generating AVB metadata for: {name}");

    let mut descriptor = reference.clone();
    let (algorithm_type, rollback_index_location) = match &mut descriptor {
        Descriptor::ChainPartition(chain) => {
            (AlgorithmType::Sha256Rsa4096, chain.rollback_index_location)
        }
        Descriptor::HashTree(digest) | Descriptor::Hash(digest) => {
            digest.image_size = 0;
            digest.root_digest = zeros(digest.root_digest.len());
            (AlgorithmType::None, 0)
        }
        Descriptor::Opaque { kind, .. } => {
            return Err(Error::Invariant(format!(
                "cannot generate metadata for {name} from a {kind} descriptor"
            )));
        }
    };

    let signed = algorithm_type.is_signed();
    let placeholder = |len| if signed { zeros(len) } else { String::new() };

    let mut header_extra = Table::new();
    header_extra.insert("required_libavb_version_major".into(), Value::Integer(1));
    header_extra.insert("required_libavb_version_minor".into(), Value::Integer(0));
    header_extra.insert("release_string".into(), Value::String(RELEASE_STRING.into()));
    header_extra.insert("reserved".into(), Value::String(zeros(160)));

    let mut footer_extra = Table::new();
    footer_extra.insert("version_major".into(), Value::Integer(1));
    footer_extra.insert("version_minor".into(), Value::Integer(0));
    footer_extra.insert("reserved".into(), Value::String(zeros(56)));

    Ok(AvbInfo {
        image_size: Some(0),
        header: Header {
            algorithm_type,
            hash: placeholder(HASH_HEX_LEN),
            signature: placeholder(SIGNATURE_HEX_LEN),
            public_key: placeholder(PUBLIC_KEY_HEX_LEN),
            public_key_metadata: String::new(),
            rollback_index: 0,
            flags: 0,
            rollback_index_location,
            descriptors: vec![descriptor],
            extra: header_extra,
        },
        footer: Some(Footer {
            original_image_size: 0,
            vbmeta_offset: 0,
            vbmeta_size: 0,
            extra: footer_extra,
        }),
        extra: Table::new(),
    })
}

fn zeros(len: usize) -> String {
    "0".repeat(len)
}
