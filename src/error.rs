//! Unified error handling for the NPU driver
//!
//! Every fallible driver operation surfaces exactly one of these variants;
//! there is no exception propagation and no retry logic at this layer.
//! The C-callable surface flattens errors into stable negative status codes
//! via [`NpuError::status`] (0 is success). Remediation such as retrying or
//! falling back to another device belongs to the caller.

use thiserror::Error;

/// Status codes returned by the `eva_npu_*` C surface.
///
/// `SUCCESS` is 0; every error class has its own negative code so callers
/// can branch on the failure kind without parsing strings.
///
/// cbindgen:ignore
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const NOT_INITIALIZED: i32 = -1;
    pub const ALREADY_INITIALIZED: i32 = -2;
    pub const OUT_OF_MEMORY: i32 = -3;
    pub const INVALID_HANDLE: i32 = -4;
    pub const SIZE_MISMATCH: i32 = -5;
    pub const BACKEND_FAILURE: i32 = -6;
    pub const INTERNAL: i32 = -7;
}

/// Unified error type for the NPU driver
#[derive(Error, Debug, Clone)]
pub enum NpuError {
    /// Operation attempted while the device context is not in the ready state
    #[error("device not initialized")]
    NotInitialized,

    /// Duplicate init without an intervening shutdown
    #[error("device already initialized")]
    AlreadyInitialized,

    /// Allocation cannot satisfy the requested size
    #[error("device memory exhausted: requested {requested} bytes, {available} available")]
    ResourceExhausted { requested: u64, available: u64 },

    /// Buffer or blob reference is null, stale, or unrecognized
    #[error("invalid device handle: {0}")]
    InvalidHandle(String),

    /// Copy or execute size/count constraints violated
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// Underlying execution failed for reasons opaque to this layer
    #[error("backend failure: {0}")]
    Backend(String),

    /// Internal lock poisoned - indicates a bug
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl NpuError {
    /// Map this error to its stable C status code.
    pub fn status(&self) -> i32 {
        match self {
            NpuError::NotInitialized => status::NOT_INITIALIZED,
            NpuError::AlreadyInitialized => status::ALREADY_INITIALIZED,
            NpuError::ResourceExhausted { .. } => status::OUT_OF_MEMORY,
            NpuError::InvalidHandle(_) => status::INVALID_HANDLE,
            NpuError::SizeMismatch(_) => status::SIZE_MISMATCH,
            NpuError::Backend(_) => status::BACKEND_FAILURE,
            NpuError::LockPoisoned(_) => status::INTERNAL,
        }
    }

    /// Check if this error indicates a driver bug rather than a caller error.
    pub fn is_internal(&self) -> bool {
        matches!(self, NpuError::LockPoisoned(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for NpuError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        NpuError::LockPoisoned(format!("lock poisoned: {}", err))
    }
}

/// Result type for driver operations
pub type NpuResult<T> = Result<T, NpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct() {
        let codes = [
            NpuError::NotInitialized.status(),
            NpuError::AlreadyInitialized.status(),
            NpuError::ResourceExhausted {
                requested: 1,
                available: 0,
            }
            .status(),
            NpuError::InvalidHandle("x".to_string()).status(),
            NpuError::SizeMismatch("x".to_string()).status(),
            NpuError::Backend("x".to_string()).status(),
            NpuError::LockPoisoned("x".to_string()).status(),
        ];

        for (i, a) in codes.iter().enumerate() {
            assert!(*a < status::SUCCESS, "error codes must be negative");
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b, "status codes must be distinct");
            }
        }
    }

    #[test]
    fn test_error_display() {
        let err = NpuError::ResourceExhausted {
            requested: 4096,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "device memory exhausted: requested 4096 bytes, 1024 available"
        );

        let err = NpuError::NotInitialized;
        assert_eq!(err.to_string(), "device not initialized");
    }

    #[test]
    fn test_poison_error_conversion() {
        use std::sync::PoisonError;

        fn convert<T>(err: PoisonError<T>) -> NpuError {
            NpuError::from(err)
        }

        let _ = convert::<i32> as fn(PoisonError<i32>) -> NpuError;
    }

    #[test]
    fn test_is_internal() {
        assert!(NpuError::LockPoisoned("bug".to_string()).is_internal());
        assert!(!NpuError::NotInitialized.is_internal());
        assert!(!NpuError::Backend("opaque".to_string()).is_internal());
    }
}
