//! Device error taxonomy.

use vgfb_memory::AllocationError;

/// Errors returned by device operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(AllocationError),

    #[error("Device busy: {0}")]
    Busy(&'static str),

    #[error("Wait for resize interrupted")]
    Interrupted,

    #[error("Wait for resize timed out")]
    TimedOut,

    #[error("No such device")]
    NoDevice,

    #[error("Device is not running")]
    NotRunning,

    #[error("Screen memory unavailable")]
    NoScreenMemory,
}

impl From<AllocationError> for DeviceError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::ZeroSized { .. } => Self::InvalidGeometry(err.to_string()),
            AllocationError::SizeOverflow { .. } | AllocationError::OutOfMemory { .. } => {
                Self::OutOfMemory(err)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
