use thiserror::Error;

/// Error returned by descriptor building, chip selection and the bound runtime.
///
/// None of these are retryable. They describe a contract violation between the
/// compiler and the hardware layout rules, so the top level init boundary is
/// expected to treat them as fatal.
#[derive(Debug, Error)]
#[error("{status:?}: {context}")]
pub struct BackendError {
    pub status: ErrorStatus,
    pub context: Box<str>,
}

impl BackendError {
    pub fn new(status: ErrorStatus, context: impl Into<Box<str>>) -> Self {
        Self { status, context: context.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Dynamic library is missing one of the required entry points
    SymbolNotFound,
    /// Runtime initialization failure
    Initialization,
    /// Runtime deinitialization failure
    Deinitialization,
    /// Chip identifier does not name a supported family
    UnsupportedChip,
    /// Storage type has no hardware element type
    UnsupportedDType,
    /// Tensor has more dimensions than a descriptor can hold
    ShapeOverflow,
    /// Operation called in the wrong lifecycle state
    InvalidState,
    /// Data movement and compute channels got out of step
    ChannelDesync,
    /// Backend config could not be read
    Config,
}
