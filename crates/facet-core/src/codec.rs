//! Little-endian encoding helpers for the descriptor and batch blobs.

use crate::error::{FacetError, Result};
use sha2::{Digest, Sha256};

/// Bytes of truncated SHA-256 appended to signed blobs.
pub(crate) const SIGNATURE_LEN: usize = 8;

pub(crate) fn signature(data: &[u8]) -> [u8; SIGNATURE_LEN] {
    let digest = Sha256::digest(data);
    let mut sig = [0u8; SIGNATURE_LEN];
    sig.copy_from_slice(&digest[..SIGNATURE_LEN]);
    sig
}

/// Append the signature of everything currently in `buf`.
pub(crate) fn sign(buf: &mut Vec<u8>) {
    let sig = signature(buf);
    buf.extend_from_slice(&sig);
}

/// Verify and strip a trailing signature, returning the signed payload.
pub(crate) fn verify(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < SIGNATURE_LEN {
        return Err(FacetError::corrupted("blob shorter than its signature"));
    }
    let (payload, stored) = bytes.split_at(bytes.len() - SIGNATURE_LEN);
    if signature(payload) != stored {
        return Err(FacetError::SignatureMismatch);
    }
    Ok(payload)
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| FacetError::corrupted(format!("truncated header at byte {offset}")))
}

pub(crate) fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    buf.reserve(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decode packed `f32` values. Bit patterns (NaN payloads included) are kept as-is.
pub(crate) fn read_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(FacetError::corrupted(format!(
            "vector payload of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let mut buf = b"payload".to_vec();
        sign(&mut buf);
        assert_eq!(buf.len(), 7 + SIGNATURE_LEN);
        assert_eq!(verify(&buf).unwrap(), b"payload");
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut buf = b"payload".to_vec();
        sign(&mut buf);
        buf[0] ^= 0xff;
        assert!(matches!(verify(&buf), Err(FacetError::SignatureMismatch)));
    }

    #[test]
    fn test_read_u32_truncated() {
        assert!(read_u32(&[1, 2, 3], 0).is_err());
        assert_eq!(read_u32(&[0, 1, 0, 0, 0], 1).unwrap(), 1);
    }

    #[test]
    fn test_f32_bits_preserved() {
        let values = [f32::from_bits(0x7fc0_1234), -0.0, 1.5];
        let mut buf = Vec::new();
        put_f32s(&mut buf, &values);
        let back = read_f32s(&buf).unwrap();
        for (a, b) in values.iter().zip(back.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_read_f32s_rejects_ragged() {
        assert!(read_f32s(&[0u8; 5]).is_err());
    }
}
