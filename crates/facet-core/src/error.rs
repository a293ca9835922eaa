//! Error type shared by descriptors, batches, matchers and indexes.

use thiserror::Error;

/// Coarse classification of a [`FacetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    /// Operands carry different model versions or dimensions.
    IncompatibleDescriptors,
    BufferIsFull,
    InvalidSerializedObject,
    Io,
}

#[derive(Error, Debug)]
pub enum FacetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("descriptor version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("batch is full (capacity {capacity})")]
    BatchFull { capacity: usize },
    #[error("invalid serialized object: {0}")]
    InvalidSerializedObject(String),
    #[error("signature mismatch: data is corrupted or was not written by facet")]
    SignatureMismatch,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl FacetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FacetError::InvalidInput(_) => ErrorKind::InvalidInput,
            FacetError::VersionMismatch { .. } | FacetError::DimensionMismatch { .. } => {
                ErrorKind::IncompatibleDescriptors
            }
            FacetError::BatchFull { .. } => ErrorKind::BufferIsFull,
            FacetError::InvalidSerializedObject(_) | FacetError::SignatureMismatch => {
                ErrorKind::InvalidSerializedObject
            }
            FacetError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        FacetError::InvalidInput(reason.into())
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        FacetError::InvalidSerializedObject(reason.into())
    }
}

impl From<bincode::Error> for FacetError {
    fn from(e: bincode::Error) -> Self {
        FacetError::InvalidSerializedObject(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FacetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FacetError::invalid_input("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            FacetError::VersionMismatch { expected: 1, actual: 2 }.kind(),
            ErrorKind::IncompatibleDescriptors
        );
        assert_eq!(
            FacetError::DimensionMismatch { expected: 4, actual: 3 }.kind(),
            ErrorKind::IncompatibleDescriptors
        );
        assert_eq!(FacetError::BatchFull { capacity: 2 }.kind(), ErrorKind::BufferIsFull);
        assert_eq!(FacetError::SignatureMismatch.kind(), ErrorKind::InvalidSerializedObject);
    }

    #[test]
    fn test_reason_is_human_readable() {
        let err = FacetError::VersionMismatch { expected: 54, actual: 59 };
        assert_eq!(err.to_string(), "descriptor version mismatch: expected 54, got 59");
    }
}
