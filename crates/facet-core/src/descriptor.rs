//! Face descriptors: fixed-length embeddings tagged with a model version.

use crate::codec;
use crate::error::{FacetError, Result};
use crate::metric;
use serde::{Deserialize, Serialize};

const DESCRIPTOR_MAGIC: &[u8; 4] = b"FCDS";
const HEADER_LEN: usize = 12;

/// Binary layout used by [`Descriptor::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Header (magic, version, dimension), values, and a trailing signature.
    #[default]
    Default,
    /// Raw little-endian `f32` values only.
    NoSignature,
}

/// Face descriptor produced by an extractor for a given model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    version: u32,
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(version: u32, values: Vec<f32>) -> Self {
        Self { version, values }
    }

    /// An unpopulated descriptor, to be filled by [`load`](Self::load).
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            values: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrite the vector in place. The version tag is kept.
    pub fn set_values(&mut self, values: Vec<f32>) {
        self.values = values;
    }

    /// Unit-length copy of the values.
    pub fn normalized(&self) -> Vec<f32> {
        metric::l2_normalize(&self.values)
    }

    /// Fail unless `self` can be compared against data of the given version and dimension.
    pub(crate) fn ensure_compatible(&self, version: u32, dimension: Option<usize>) -> Result<()> {
        if self.is_empty() {
            return Err(FacetError::invalid_input("descriptor is empty"));
        }
        if metric::is_zero(&self.values) {
            return Err(FacetError::invalid_input("descriptor has zero norm"));
        }
        if self.version != version {
            return Err(FacetError::VersionMismatch {
                expected: version,
                actual: self.version,
            });
        }
        match dimension {
            Some(expected) if expected != self.dimension() => Err(FacetError::DimensionMismatch {
                expected,
                actual: self.dimension(),
            }),
            _ => Ok(()),
        }
    }

    /// Serialize the descriptor.
    pub fn save(&self, mode: SaveMode) -> Vec<u8> {
        match mode {
            SaveMode::Default => {
                let mut buf = Vec::with_capacity(
                    HEADER_LEN + self.values.len() * 4 + codec::SIGNATURE_LEN,
                );
                buf.extend_from_slice(DESCRIPTOR_MAGIC);
                codec::put_u32(&mut buf, self.version);
                codec::put_u32(&mut buf, self.values.len() as u32);
                codec::put_f32s(&mut buf, &self.values);
                codec::sign(&mut buf);
                buf
            }
            SaveMode::NoSignature => {
                let mut buf = Vec::with_capacity(self.values.len() * 4);
                codec::put_f32s(&mut buf, &self.values);
                buf
            }
        }
    }

    /// Populate this descriptor from bytes written by [`save`](Self::save).
    ///
    /// Signed blobs restore both version and values. Unsigned blobs keep the
    /// current version and, if the descriptor is already populated, must
    /// match its dimension. A raw vector whose first value happens to encode
    /// the signed magic is still read as raw values unless its bytes also form
    /// a well-formed signed header; use [`load_with_mode`](Self::load_with_mode)
    /// when the layout is known.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        if !bytes.starts_with(DESCRIPTOR_MAGIC) {
            return self.load_raw(bytes);
        }
        match decode_signed(bytes) {
            Ok((version, values)) => {
                self.version = version;
                self.values = values;
                Ok(())
            }
            Err(err) if self.reads_as_raw(bytes) => {
                tracing::debug!(
                    bytes = bytes.len(),
                    %err,
                    "magic-prefixed blob is not signed, reading raw values"
                );
                self.load_raw(bytes)
            }
            Err(err) => Err(err),
        }
    }

    /// Populate this descriptor from bytes in a known layout.
    pub fn load_with_mode(&mut self, bytes: &[u8], mode: SaveMode) -> Result<()> {
        match mode {
            SaveMode::Default => {
                let (version, values) = decode_signed(bytes)?;
                self.version = version;
                self.values = values;
                Ok(())
            }
            SaveMode::NoSignature => self.load_raw(bytes),
        }
    }

    /// Decode a signed blob into a new descriptor.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(DESCRIPTOR_MAGIC) {
            return Err(FacetError::corrupted(
                "missing descriptor signature; load unsigned data into an existing descriptor",
            ));
        }
        let (version, values) = decode_signed(bytes)?;
        Ok(Self { version, values })
    }

    fn load_raw(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(FacetError::invalid_input("no descriptor data"));
        }
        let values = codec::read_f32s(bytes)?;
        if !self.is_empty() && values.len() != self.dimension() {
            return Err(FacetError::DimensionMismatch {
                expected: self.dimension(),
                actual: values.len(),
            });
        }
        self.values = values;
        Ok(())
    }

    /// Whether a magic-prefixed blob that failed signed decoding can be taken as raw values.
    fn reads_as_raw(&self, bytes: &[u8]) -> bool {
        if bytes.len() % 4 != 0 {
            return false;
        }
        if !self.is_empty() {
            return bytes.len() / 4 == self.dimension();
        }
        // A header that fits the blob length means a damaged signed blob.
        signed_len(bytes) != Some(bytes.len())
    }
}

/// Total blob length implied by the dimension in a signed header.
fn signed_len(bytes: &[u8]) -> Option<usize> {
    let dimension = codec::read_u32(bytes, 8).ok()? as usize;
    dimension
        .checked_mul(4)?
        .checked_add(HEADER_LEN + codec::SIGNATURE_LEN)
}

fn decode_signed(bytes: &[u8]) -> Result<(u32, Vec<f32>)> {
    if !bytes.starts_with(DESCRIPTOR_MAGIC) {
        return Err(FacetError::corrupted("missing descriptor magic"));
    }
    let payload = codec::verify(bytes)?;
    let version = codec::read_u32(payload, 4)?;
    let dimension = codec::read_u32(payload, 8)? as usize;
    let body = payload
        .get(HEADER_LEN..)
        .ok_or_else(|| FacetError::corrupted("truncated descriptor header"))?;
    if Some(body.len()) != dimension.checked_mul(4) {
        return Err(FacetError::corrupted(format!(
            "header declares {dimension} values, body holds {} bytes",
            body.len()
        )));
    }
    Ok((version, codec::read_f32s(body)?))
}
