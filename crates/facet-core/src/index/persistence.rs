//! Index file envelope: magic, format revision, bincode payload, CRC32 footer.
//!
//! Layout: `[magic 4][revision u32 LE][payload][b"FCRC"][crc32 u32 BE]`.
//! Writes go to a temp file that is renamed over the target.

use crate::error::{FacetError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const DENSE_MAGIC: &[u8; 4] = b"FCXD";
pub(crate) const DYNAMIC_MAGIC: &[u8; 4] = b"FCXY";
const FORMAT_REVISION: u32 = 1;
const CRC_MAGIC: &[u8; 4] = b"FCRC";
const HEADER_LEN: usize = 8;
const FOOTER_LEN: usize = 8;

fn kind_name(magic: &[u8]) -> &'static str {
    if magic == DENSE_MAGIC {
        "dense"
    } else if magic == DYNAMIC_MAGIC {
        "dynamic"
    } else {
        "unknown"
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

pub(crate) fn write_index_file<T: Serialize>(path: &Path, magic: &[u8; 4], value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let crc = crc32fast::hash(&payload);

    let mut output = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    output.extend_from_slice(magic);
    output.extend_from_slice(&FORMAT_REVISION.to_le_bytes());
    output.extend_from_slice(&payload);
    output.extend_from_slice(CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, &output)?;
    fs::rename(&tmp, path)?;

    tracing::info!(
        path = %path.display(),
        kind = kind_name(magic),
        bytes = output.len(),
        crc = format_args!("{crc:#010x}"),
        "saved index"
    );
    Ok(())
}

pub(crate) fn read_index_file<T: DeserializeOwned>(path: &Path, magic: &[u8; 4]) -> Result<T> {
    let raw = fs::read(path)?;
    if raw.len() < HEADER_LEN + FOOTER_LEN {
        return Err(FacetError::corrupted(format!(
            "{} is too short to be an index file",
            path.display()
        )));
    }

    let found = &raw[..4];
    if found != magic {
        return Err(FacetError::corrupted(format!(
            "{} holds a {} index, expected {}",
            path.display(),
            kind_name(found),
            kind_name(magic)
        )));
    }
    let revision = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if revision != FORMAT_REVISION {
        return Err(FacetError::corrupted(format!(
            "unsupported index format revision {revision}"
        )));
    }

    let footer = &raw[raw.len() - FOOTER_LEN..];
    if &footer[..4] != CRC_MAGIC {
        return Err(FacetError::corrupted("index file has no checksum footer"));
    }
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let payload = &raw[HEADER_LEN..raw.len() - FOOTER_LEN];
    let computed = crc32fast::hash(payload);
    if computed != stored {
        return Err(FacetError::corrupted(format!(
            "index CRC32 mismatch: expected {stored:#010x}, got {computed:#010x}"
        )));
    }
    tracing::debug!(path = %path.display(), crc = format_args!("{stored:#010x}"), "index checksum verified");

    Ok(bincode::deserialize(payload)?)
}
