//! Error types for FluxStore

use thiserror::Error;

/// Result type alias for FluxStore operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// FluxStore error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// The merge was stopped on request.
    ///
    /// Returned as is by every merge entry point, never wrapped in another variant.
    #[error("forcibly stopped")]
    ForciblyStopped,

    /// Merge of several block streams failed
    #[error("cannot merge {streams} streams: {source}")]
    Merge {
        streams: usize,
        #[source]
        source: Box<StoreError>,
    },

    /// Search over partition parts failed
    #[error("cannot search {parts} parts: {source}")]
    Search {
        parts: usize,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io(_) => true,
            StoreError::Merge { source, .. } | StoreError::Search { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::Corruption(_) | StoreError::ChecksumMismatch { .. } => true,
            StoreError::Merge { source, .. } | StoreError::Search { source, .. } => {
                source.is_corruption()
            }
            _ => false,
        }
    }

    /// Check if the error is the stop sentinel
    pub fn is_forcibly_stopped(&self) -> bool {
        matches!(self, StoreError::ForciblyStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_corruption_is_detected() {
        let err = StoreError::Merge {
            streams: 3,
            source: Box::new(StoreError::ChecksumMismatch {
                expected: 1,
                actual: 2,
            }),
        };
        assert!(err.is_corruption());
        assert!(!err.is_forcibly_stopped());
        assert_eq!(
            err.to_string(),
            "cannot merge 3 streams: Checksum mismatch: expected 1, got 2"
        );
    }

    #[test]
    fn test_stop_sentinel() {
        let err = StoreError::ForciblyStopped;
        assert!(err.is_forcibly_stopped());
        assert!(!err.is_retryable());
    }
}
