//! Error type shared by configuration and execution.
//!
//! Every failure is surfaced synchronously to the caller of `configure`
//! or `run`; nothing is retried and nothing is silently downgraded.

use crate::ops::dispatch::DispatchKey;
use crate::tensors::{DataType, TensorShape};
use crate::window::Window;

/// Errors reported by the subtraction kernel and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// An input tensor was handed over without shape or data type.
    #[error("{tensor} has no shape or data type set")]
    MissingMetadata { tensor: &'static str },

    /// `run` was called on a kernel that has not been configured.
    #[error("kernel has not been configured")]
    NotConfigured,

    /// `configure` was called a second time on the same kernel.
    #[error("kernel is already configured")]
    AlreadyConfigured,

    /// The window passed to `run` is not a sub-window of the configured one.
    #[error("window {window} is not a valid sub-window of {configured}")]
    InvalidSubWindow { window: Window, configured: Window },

    /// A scheduler was asked to split along a dimension windows do not have.
    #[error("cannot split a window along dimension {dim}")]
    InvalidSplitDimension { dim: usize },

    #[error("shape mismatch: input1 {input1}, input2 {input2}, output {output}")]
    ShapeMismatch {
        input1: TensorShape,
        input2: TensorShape,
        output: TensorShape,
    },

    #[error("{tensor} has unsupported data type {data_type}")]
    UnsupportedDataType {
        tensor: &'static str,
        data_type: DataType,
    },

    #[error("output can only be U8 if both inputs are U8 (got {input1} and {input2})")]
    InvalidNarrowing { input1: DataType, input2: DataType },

    #[error(
        "fixed-point tensors must share type and position: {input1}/{pos1}, {input2}/{pos2}, {output}/{pos_out}"
    )]
    FixedPointMismatch {
        input1: DataType,
        pos1: u8,
        input2: DataType,
        pos2: u8,
        output: DataType,
        pos_out: u8,
    },

    /// The dispatch key has no entry in the dispatch matrix.
    #[error("unsupported type combination: {0}")]
    UnsupportedCombination(DispatchKey),

    /// The routine exists but the build/target cannot execute it.
    #[error("{0} requires half-precision vector arithmetic, which is not available")]
    CapabilityUnavailable(DispatchKey),

    #[error("invalid tensor metadata: {0}")]
    InvalidTensorInfo(&'static str),

    #[error("expected {expected} elements, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },

    #[error("element type {requested} does not match tensor data type {actual}")]
    ElementTypeMismatch {
        requested: DataType,
        actual: DataType,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, KernelError>;
