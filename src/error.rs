//! Defines the [`ArenaError`] type.

use std::io;

use thiserror::Error;

/// Errors reported by arena lifecycle and key/value operations.
///
/// Allocation paths that can only run out of space ([`Arena::allocate`])
/// report failure as `None` instead; everything that can fail for more than
/// one reason goes through this enum. Nothing is retried internally.
///
/// [`Arena::allocate`]: crate::Arena::allocate
#[derive(Debug, Error)]
pub enum ArenaError {
    /// A caller-supplied argument was rejected before the region was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The backing file could not be opened, sized, or mapped.
    #[error("backing storage failure: {0}")]
    Storage(#[from] io::Error),

    /// The mapped file does not begin with the arena identity tag.
    #[error("not an arena: identity tag mismatch")]
    BadMagic,

    /// The arena was written by an incompatible format version.
    /// There is no migration path; the attach fails closed.
    #[error("unsupported arena format v{found}, expected v{expected}")]
    VersionMismatch { found: i32, expected: i32 },

    /// The bump cursor would pass the end of the region.
    #[error("arena capacity exhausted")]
    Exhausted,
}

pub type Result<T> = std::result::Result<T, ArenaError>;
