use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriterError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UmdError>;

/// Unified error type for device/encoder operations.
///
/// Validation failures ([`UmdError::InvalidArg`], [`UmdError::NotImpl`]) are
/// scoped to the call that raised them and never corrupt device state: either
/// nothing was appended to the command stream, or (for documented best-effort
/// paths such as viewport collapsing) a deterministic packet was still
/// emitted before the error was reported.
#[derive(Debug, Error)]
pub enum UmdError {
    /// The caller supplied a value outside the accepted range (bad enum
    /// value, unknown flag bit, stale object id, mismatched sizes).
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// The configuration is expressible in the guest API but has no wire
    /// encoding (per-render-target blend divergence, dual-source factors,
    /// multiple distinct viewports).
    #[error("not representable in the wire protocol: {0}")]
    NotImpl(&'static str),

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    /// A `DO_NOT_WAIT` map found the resource still referenced by an
    /// unretired submission.
    #[error("resource is still in use by the GPU")]
    StillDrawing,

    /// The guest allocation collaborator failed.
    #[error("guest backing store failure: {0}")]
    Backing(String),

    /// The submission collaborator failed.
    #[error("submission failed: {0}")]
    Submission(String),

    #[error("command stream append failed: {0}")]
    Encode(#[from] AerogpuCmdWriterError),
}
