//! Capacity-bounded collections of same-version descriptors.

use crate::codec;
use crate::descriptor::{Descriptor, SaveMode};
use crate::error::{FacetError, Result};

const BATCH_MAGIC: &[u8; 4] = b"FCDB";
const HEADER_LEN: usize = 20;

/// Ordered batch of descriptors sharing one model version and dimension.
///
/// Values are kept in a single contiguous arena; the dimension is fixed by
/// the first descriptor pushed.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorBatch {
    version: u32,
    dimension: Option<usize>,
    capacity: usize,
    len: usize,
    values: Vec<f32>,
}

impl DescriptorBatch {
    pub fn new(capacity: usize, version: u32) -> Self {
        Self {
            version,
            dimension: None,
            capacity,
            len: 0,
            values: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Dimension of the members, or `None` while the batch has never held one.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Append a descriptor, returning its position.
    pub fn push(&mut self, descriptor: &Descriptor) -> Result<usize> {
        descriptor.ensure_compatible(self.version, self.dimension)?;
        if self.is_full() {
            return Err(FacetError::BatchFull {
                capacity: self.capacity,
            });
        }
        self.dimension = Some(descriptor.dimension());
        self.values.extend_from_slice(descriptor.values());
        self.len += 1;
        Ok(self.len - 1)
    }

    /// Values of the descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        if index >= self.len {
            return None;
        }
        Some(&self.values[index * dim..(index + 1) * dim])
    }

    /// Owned copy of the descriptor at `index`.
    pub fn descriptor(&self, index: usize) -> Result<Descriptor> {
        self.get(index)
            .map(|values| Descriptor::new(self.version, values.to_vec()))
            .ok_or_else(|| self.out_of_range(index))
    }

    /// Remove by moving the last descriptor into `index`. O(1); breaks order.
    pub fn remove_fast(&mut self, index: usize) -> Result<()> {
        let dim = self.checked_dimension(index)?;
        let last = self.len - 1;
        if index != last {
            let (head, tail) = self.values.split_at_mut(last * dim);
            head[index * dim..(index + 1) * dim].copy_from_slice(&tail[..dim]);
        }
        self.values.truncate(last * dim);
        self.len = last;
        Ok(())
    }

    /// Remove and shift the following descriptors down. O(n); keeps order.
    pub fn remove_slow(&mut self, index: usize) -> Result<()> {
        let dim = self.checked_dimension(index)?;
        self.values.drain(index * dim..(index + 1) * dim);
        self.len -= 1;
        Ok(())
    }

    /// Drop every member. The dimension is released as well.
    pub fn clear(&mut self) {
        self.values.clear();
        self.len = 0;
        self.dimension = None;
    }

    /// Iterate member values in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks_exact(self.dimension.unwrap_or(1).max(1))
    }

    fn checked_dimension(&self, index: usize) -> Result<usize> {
        match self.dimension {
            Some(dim) if index < self.len => Ok(dim),
            _ => Err(self.out_of_range(index)),
        }
    }

    fn out_of_range(&self, index: usize) -> FacetError {
        FacetError::invalid_input(format!(
            "batch index {index} out of range (len {})",
            self.len
        ))
    }

    /// Serialize the batch; `NoSignature` omits the trailing signature only.
    pub fn save(&self, mode: SaveMode) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.values.len() * 4 + codec::SIGNATURE_LEN);
        buf.extend_from_slice(BATCH_MAGIC);
        codec::put_u32(&mut buf, self.version);
        codec::put_u32(&mut buf, self.dimension.unwrap_or(0) as u32);
        codec::put_u32(&mut buf, self.capacity as u32);
        codec::put_u32(&mut buf, self.len as u32);
        codec::put_f32s(&mut buf, &self.values);
        if mode == SaveMode::Default {
            codec::sign(&mut buf);
        }
        buf
    }

    /// Decode a batch written by [`save`](Self::save) in either mode.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(BATCH_MAGIC) {
            return Err(FacetError::corrupted("not a descriptor batch"));
        }
        let version = codec::read_u32(bytes, 4)?;
        let dimension = codec::read_u32(bytes, 8)? as usize;
        let capacity = codec::read_u32(bytes, 12)? as usize;
        let len = codec::read_u32(bytes, 16)? as usize;
        let unsigned_len = dimension
            .checked_mul(len)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN + codec::SIGNATURE_LEN))
            .map(|n| n - codec::SIGNATURE_LEN)
            .ok_or_else(|| FacetError::corrupted("batch header declares an impossible size"))?;

        let payload = if bytes.len() == unsigned_len {
            tracing::debug!(len, "loading unsigned descriptor batch");
            bytes
        } else if bytes.len() == unsigned_len + codec::SIGNATURE_LEN {
            codec::verify(bytes)?
        } else {
            return Err(FacetError::corrupted(format!(
                "batch header declares {len}x{dimension} values, blob holds {} bytes",
                bytes.len()
            )));
        };
        if len > capacity || (len > 0 && dimension == 0) {
            return Err(FacetError::corrupted("batch header is inconsistent"));
        }

        Ok(Self {
            version,
            dimension: (dimension > 0).then_some(dimension),
            capacity,
            len,
            values: codec::read_f32s(&payload[HEADER_LEN..])?,
        })
    }
}
