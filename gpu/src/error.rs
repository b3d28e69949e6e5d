//! Error taxonomy for buffer allocation, pipeline creation and dispatch.
//!
//! Configuration and precondition errors are returned synchronously from the
//! call that violates them. Execution faults never show up here directly:
//! they arrive through a `Failed` completion token and are converted with
//! [`TokenStatus::into_result`](crate::completion::TokenStatus::into_result).

use std::fmt;

/// Errors raised by the stager, the dispatcher and the device backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The device could not satisfy a buffer allocation.
    Allocation { requested: usize, reason: String },

    /// The device rejected the kernel, or its binding layout is unusable.
    PipelineBuild { kernel: String, reason: String },

    /// The number of buffers passed to a dispatch differs from the layout.
    BindingMismatch {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    /// Grid or thread-group dimensions the device cannot run.
    InvalidDispatchConfiguration(String),

    /// The dispatch ran but the device reported a fault.
    DeviceExecutionFailure { submission: u64, reason: String },

    /// The backend refused to encode or enqueue a command.
    Submission(String),

    /// No compute device could be opened.
    DeviceUnavailable(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Allocation { requested, reason } => {
                write!(f, "allocation of {} bytes failed: {}", requested, reason)
            }
            DispatchError::PipelineBuild { kernel, reason } => {
                write!(f, "pipeline build for kernel '{}' failed: {}", kernel, reason)
            }
            DispatchError::BindingMismatch {
                kernel,
                expected,
                actual,
            } => write!(
                f,
                "kernel '{}' declares {} bindings but {} buffers were supplied",
                kernel, expected, actual
            ),
            DispatchError::InvalidDispatchConfiguration(message) => {
                write!(f, "invalid dispatch configuration: {}", message)
            }
            DispatchError::DeviceExecutionFailure { submission, reason } => {
                write!(f, "submission {} faulted on the device: {}", submission, reason)
            }
            DispatchError::Submission(message) => write!(f, "submission failed: {}", message),
            DispatchError::DeviceUnavailable(message) => {
                write!(f, "no compute device available: {}", message)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
