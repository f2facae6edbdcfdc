//! Package envelope codec.
//!
//! A package is a JSON mapping with three keys: `bpf_object` (base64 of a
//! zlib-compressed object), `bpf_object_size` (inflated length in bytes) and
//! `meta` (the nested meta document).

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::meta::ObjectMeta;

/// Slack allowed on top of the declared object size while inflating, so a
/// slightly off producer fails the length check instead of a short read.
const INFLATE_SLACK: usize = 256;

#[derive(Deserialize)]
struct Envelope {
    bpf_object: String,
    bpf_object_size: u64,
    meta: Value,
}

/// A decoded package: raw object bytes plus the parsed meta document.
///
/// The codec owns the decoded bytes for the life of the skeleton built from
/// them.
#[derive(Debug, Clone)]
pub struct Package {
    pub object: Vec<u8>,
    pub meta: ObjectMeta,
}

impl Package {
    /// Decode a full package envelope.
    pub fn from_package_text(pkg: &str) -> Result<Self> {
        let (object, meta_text) = split_package(pkg)?;
        Self::from_parts(&meta_text, object)
    }

    /// Build a package from meta text and object bytes already at hand,
    /// skipping decode and inflate. Used by integration tests and by
    /// embedding hosts that keep the object on disk.
    pub fn from_parts(meta_json: &str, object: Vec<u8>) -> Result<Self> {
        let meta = ObjectMeta::from_json_str(meta_json)?;
        Ok(Self { object, meta })
    }
}

/// Split a package envelope into inflated object bytes and compact meta text.
pub fn split_package(pkg: &str) -> Result<(Vec<u8>, String)> {
    let envelope: Envelope =
        serde_json::from_str(pkg).map_err(|e| Error::MalformedPackage(format!("bad envelope: {e}")))?;
    let compressed = BASE64
        .decode(envelope.bpf_object.as_bytes())
        .map_err(|e| Error::MalformedPackage(format!("bad base64 object: {e}")))?;
    let declared = usize::try_from(envelope.bpf_object_size)
        .map_err(|_| Error::MalformedPackage("object size does not fit in memory".to_string()))?;

    let limit = declared + INFLATE_SLACK;
    let mut object = Vec::with_capacity(limit.min(1 << 24));
    let mut decoder = ZlibDecoder::new(&compressed[..]).take(limit as u64);
    decoder
        .read_to_end(&mut object)
        .map_err(|e| Error::MalformedPackage(format!("failed to inflate object: {e}")))?;
    if object.len() != declared {
        return Err(Error::MalformedPackage(format!(
            "inflated object is {} bytes but the envelope declares {}",
            object.len(),
            declared
        )));
    }

    let meta_text = serde_json::to_string(&envelope.meta)
        .map_err(|e| Error::MalformedPackage(e.to_string()))?;
    Ok((object, meta_text))
}
