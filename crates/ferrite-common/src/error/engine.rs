//! Engine error types.
//!
//! All fallible operations in the engine return a [`FerriteError`] through
//! the [`FerriteResult`] alias. Every error maps to a stable
//! [`ErrorCode`] identifier that callers can use for programmatic
//! classification, most importantly the transaction retry loop which must
//! tell transient aborts apart from fatal conditions.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type FerriteResult<T> = Result<T, FerriteError>;

/// Stable error code identifiers.
///
/// These codes are stable across versions and are the contract the retry
/// loop and external tooling program against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Success. Never carried by an error value; exists so the code space
    /// has an explicit zero.
    Ok = 0x0000,

    // Memory errors (0x0100 - 0x01FF)
    /// The page pool has no free pages left.
    MemoryNoFreePages = 0x0100,
    /// A page was released that would overflow the free ring (double free).
    MemoryDuplicatePage = 0x0101,

    // Transaction errors (0x0200 - 0x02FF)
    /// The transaction lost a race and must retry.
    XctRaceAbort = 0x0200,
    /// The transaction's page-version set is full.
    XctPageVersionSetOverflow = 0x0201,
    /// The transaction's pointer set is full.
    XctPointerSetOverflow = 0x0202,
    /// The transaction's read set is full.
    XctReadSetOverflow = 0x0203,
    /// The transaction's write set is full.
    XctWriteSetOverflow = 0x0204,

    // Storage errors (0x0300 - 0x03FF)
    /// The key already exists in the storage.
    StrKeyAlreadyExists = 0x0300,
    /// The key was not found in the storage.
    StrKeyNotFound = 0x0301,

    // Filesystem errors (0x0400 - 0x04FF)
    /// Creating a directory failed.
    FsMkdirFailed = 0x0400,
    /// General I/O error.
    Io = 0x0401,

    // Engine errors (0x0500 - 0x05FF)
    /// A module this module depends on was not initialized first.
    DependentModuleUnavailableInit = 0x0500,
    /// A module this module depends on was uninitialized first.
    DependentModuleUnavailableUninit = 0x0501,
    /// Invalid configuration.
    InvalidConfig = 0x0502,
    /// The operation was cancelled.
    Cancelled = 0x0503,
    /// Internal error; indicates a bug.
    Internal = 0x0504,
    /// Metadata file serialization or deserialization failed.
    Metadata = 0x0505,

    /// User-defined error raised by an embedded task.
    UserDefined = 0x0600,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Memory",
            0x02 => "Transaction",
            0x03 => "Storage",
            0x04 => "Filesystem",
            0x05 => "Engine",
            0x06 => "User",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for the ferrite engine.
///
/// Each variant carries the context needed to act on the error; the
/// retry-relevant classification is exposed through [`code`],
/// [`is_race_abort`], [`is_set_overflow`], and [`is_key_already_exists`].
///
/// [`code`]: FerriteError::code
/// [`is_race_abort`]: FerriteError::is_race_abort
/// [`is_set_overflow`]: FerriteError::is_set_overflow
/// [`is_key_already_exists`]: FerriteError::is_key_already_exists
#[derive(Debug, Error)]
pub enum FerriteError {
    // ==========================================================================
    // Memory Errors
    // ==========================================================================
    /// The page pool ran out of free pages.
    #[error("no free pages left in the page pool")]
    MemoryNoFreePages,

    /// Releasing pages would overflow the free ring. A pool in this state
    /// is inconsistent; callers must not attempt recovery.
    #[error("page pool free ring would overflow: count {count} + release {release} > capacity {capacity}")]
    MemoryDuplicatePage {
        /// Free pages currently in the ring.
        count: u64,
        /// Pages the caller attempted to release.
        release: u64,
        /// Ring capacity.
        capacity: u64,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// The transaction lost a race to a concurrent transaction.
    #[error("transaction hit a race abort")]
    XctRaceAbort,

    /// The transaction observed more page versions than it can track.
    #[error("page-version set overflow: capacity {capacity}")]
    XctPageVersionSetOverflow {
        /// Configured set capacity.
        capacity: usize,
    },

    /// The transaction followed more pointers than it can track.
    #[error("pointer set overflow: capacity {capacity}")]
    XctPointerSetOverflow {
        /// Configured set capacity.
        capacity: usize,
    },

    /// The transaction read more records than it can track.
    #[error("read set overflow: capacity {capacity}")]
    XctReadSetOverflow {
        /// Configured set capacity.
        capacity: usize,
    },

    /// The transaction wrote more records than it can track.
    #[error("write set overflow: capacity {capacity}")]
    XctWriteSetOverflow {
        /// Configured set capacity.
        capacity: usize,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// An insert found the key already present.
    #[error("key already exists")]
    StrKeyAlreadyExists,

    /// A read or update addressed a missing key.
    #[error("key not found")]
    StrKeyNotFound,

    // ==========================================================================
    // Filesystem Errors
    // ==========================================================================
    /// A directory could not be created.
    #[error("failed to create directory {}: {source}", .path.display())]
    FsMkdirFailed {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    // ==========================================================================
    // Engine Errors
    // ==========================================================================
    /// A required module was not yet initialized.
    #[error("dependent module '{module}' is not initialized")]
    DependentModuleUnavailableInit {
        /// Name of the missing module.
        module: &'static str,
    },

    /// A required module was already uninitialized.
    #[error("dependent module '{module}' is already uninitialized")]
    DependentModuleUnavailableUninit {
        /// Name of the missing module.
        module: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The operation was cancelled by a stop request.
    #[error("operation was cancelled")]
    Cancelled,

    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Metadata file serialization or deserialization failed.
    #[error("metadata error: {reason}")]
    Metadata {
        /// Description of the failure.
        reason: String,
    },

    /// User-defined error raised by an embedded task.
    #[error("user-defined error: {message}")]
    UserDefined {
        /// Error message.
        message: String,
    },
}

impl FerriteError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MemoryNoFreePages => ErrorCode::MemoryNoFreePages,
            Self::MemoryDuplicatePage { .. } => ErrorCode::MemoryDuplicatePage,
            Self::XctRaceAbort => ErrorCode::XctRaceAbort,
            Self::XctPageVersionSetOverflow { .. } => ErrorCode::XctPageVersionSetOverflow,
            Self::XctPointerSetOverflow { .. } => ErrorCode::XctPointerSetOverflow,
            Self::XctReadSetOverflow { .. } => ErrorCode::XctReadSetOverflow,
            Self::XctWriteSetOverflow { .. } => ErrorCode::XctWriteSetOverflow,
            Self::StrKeyAlreadyExists => ErrorCode::StrKeyAlreadyExists,
            Self::StrKeyNotFound => ErrorCode::StrKeyNotFound,
            Self::FsMkdirFailed { .. } => ErrorCode::FsMkdirFailed,
            Self::Io { .. } => ErrorCode::Io,
            Self::DependentModuleUnavailableInit { .. } => {
                ErrorCode::DependentModuleUnavailableInit
            }
            Self::DependentModuleUnavailableUninit { .. } => {
                ErrorCode::DependentModuleUnavailableUninit
            }
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Internal { .. } => ErrorCode::Internal,
            Self::Metadata { .. } => ErrorCode::Metadata,
            Self::UserDefined { .. } => ErrorCode::UserDefined,
        }
    }

    /// Returns true for a race abort.
    #[must_use]
    pub const fn is_race_abort(&self) -> bool {
        matches!(self, Self::XctRaceAbort)
    }

    /// Returns true when any transaction-local set overflowed.
    #[must_use]
    pub const fn is_set_overflow(&self) -> bool {
        matches!(
            self,
            Self::XctPageVersionSetOverflow { .. }
                | Self::XctPointerSetOverflow { .. }
                | Self::XctReadSetOverflow { .. }
                | Self::XctWriteSetOverflow { .. }
        )
    }

    /// Returns true when an insert collided with an existing key.
    #[must_use]
    pub const fn is_key_already_exists(&self) -> bool {
        matches!(self, Self::StrKeyAlreadyExists)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    #[must_use]
    pub fn metadata(reason: impl Into<String>) -> Self {
        Self::Metadata {
            reason: reason.into(),
        }
    }

    /// Creates a user-defined error.
    #[must_use]
    pub fn user_defined(message: impl Into<String>) -> Self {
        Self::UserDefined {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            FerriteError::MemoryNoFreePages.code(),
            ErrorCode::MemoryNoFreePages
        );
        assert_eq!(FerriteError::XctRaceAbort.code(), ErrorCode::XctRaceAbort);
        assert_eq!(
            FerriteError::StrKeyAlreadyExists.code(),
            ErrorCode::StrKeyAlreadyExists
        );
        assert_eq!(
            FerriteError::DependentModuleUnavailableInit { module: "log" }.code(),
            ErrorCode::DependentModuleUnavailableInit
        );
    }

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::MemoryNoFreePages.category(), "Memory");
        assert_eq!(ErrorCode::XctRaceAbort.category(), "Transaction");
        assert_eq!(ErrorCode::StrKeyAlreadyExists.category(), "Storage");
        assert_eq!(ErrorCode::FsMkdirFailed.category(), "Filesystem");
        assert_eq!(ErrorCode::Ok.category(), "General");
    }

    #[test]
    fn test_retry_classification() {
        assert!(FerriteError::XctRaceAbort.is_race_abort());
        assert!(FerriteError::XctReadSetOverflow { capacity: 16 }.is_set_overflow());
        assert!(FerriteError::XctPointerSetOverflow { capacity: 16 }.is_set_overflow());
        assert!(FerriteError::StrKeyAlreadyExists.is_key_already_exists());
        assert!(!FerriteError::StrKeyNotFound.is_race_abort());
        assert!(!FerriteError::Cancelled.is_set_overflow());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FerriteError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }

    #[test]
    fn test_error_display() {
        let err = FerriteError::XctReadSetOverflow { capacity: 1024 };
        assert_eq!(err.to_string(), "read set overflow: capacity 1024");
    }
}
