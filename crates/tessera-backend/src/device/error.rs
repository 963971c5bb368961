/// Failure kinds reported by device-facing operations.
///
/// All of them are recoverable: the failing object is left empty or drawable,
/// never holding a half-initialized native resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No device is attached, or it has been shut down.
    #[error("graphics device is unavailable")]
    DeviceUnavailable,

    /// The device could not satisfy a buffer allocation.
    #[error("failed to allocate {size} byte buffer: {reason}")]
    AllocationFailed { size: u64, reason: String },

    /// The device could not map a buffer range for reading or writing.
    #[error("failed to lock buffer: {0}")]
    LockFailed(String),

    /// The device rejected a draw call.
    #[error("draw call rejected: {0}")]
    DrawFailed(String),

    /// The device rejected a vertex layout declaration.
    #[error("vertex layout rejected: {0}")]
    LayoutFailed(String),

    /// The device rejected a viewport, scissor, clear or render-state change.
    #[error("device state change rejected: {0}")]
    StateFailed(String),
}
