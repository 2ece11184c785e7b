use thiserror::Error;

/// Construction-time validation and allocation failures.
///
/// Hot-path conditions (full, empty, lost reservation race) are reported
/// through return values, never through this type.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("index-ring capacity must be greater than zero")]
    ZeroCapacity,

    #[error("byte-arena size must be greater than zero")]
    ZeroArena,

    #[error("alignment must be a power of two, got {0}")]
    BadAlignment(usize),

    #[error("max concurrent readers must be greater than zero")]
    ZeroReaders,

    #[error("allocator failed to provide {bytes} bytes (align {align})")]
    AllocationFailed { bytes: usize, align: usize },
}
