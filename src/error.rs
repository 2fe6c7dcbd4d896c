use crate::tensor::DType;
use thiserror::Error;

/// Coarse classification of a [`TransposeConvError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shapes, types, or parameters are inconsistent with each other.
    Configuration,
    /// The host did not provide a buffer of the size the sizing query reported.
    Allocation,
    /// The element type has no kernel.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum TransposeConvError {
    #[error("{operand} must be rank {expected}, got rank {actual}")]
    Rank {
        operand: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("output shape descriptor must hold 4 elements, got {0}")]
    DescriptorLength(usize),

    #[error("output shape descriptor must be int32, got {0}")]
    DescriptorType(DType),

    #[error("output shape descriptor entry {index} is negative ({value})")]
    NegativeExtent { index: usize, value: i64 },

    #[error("{operand} type {actual} does not match input type {expected}")]
    TypeMismatch {
        operand: &'static str,
        expected: DType,
        actual: DType,
    },

    #[error("input has {input} channels but filter expects {filter}")]
    ChannelMismatch { input: usize, filter: usize },

    #[error("{dim} of output ({output}) does not match {source_name} ({expected})")]
    OutputDimMismatch {
        dim: &'static str,
        output: usize,
        source_name: &'static str,
        expected: usize,
    },

    #[error("output buffer shape {actual:?} does not match requested shape {expected:?}")]
    OutputShape {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("{operand} holds {actual} elements, shape requires {expected}")]
    DataLength {
        operand: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{operand} of shape {dims:?} exceeds the addressable size")]
    SizeOverflow { operand: &'static str, dims: Vec<usize> },

    #[error("{axis} stride must be at least 1")]
    ZeroStride { axis: &'static str },

    #[error(
        "no non-negative {axis} padding maps output extent {output} back through \
         filter {filter} at stride {stride}"
    )]
    InfeasiblePadding {
        axis: &'static str,
        stride: usize,
        filter: usize,
        output: usize,
    },

    #[error("missing quantization parameters for {0}")]
    MissingQuantization(&'static str),

    #[error("invalid scale {scale} for {operand}")]
    InvalidScale { operand: &'static str, scale: f32 },

    #[error("zero point {zero_point} for {operand} is outside the uint8 range")]
    InvalidZeroPoint { operand: &'static str, zero_point: i32 },

    #[error("real multiplier {0} cannot be represented as a fixed-point multiplier")]
    InvalidMultiplier(f64),

    #[error("{buffer} buffer holds {provided} elements, {required} required")]
    Allocation {
        buffer: &'static str,
        required: usize,
        provided: usize,
    },

    #[error("element type {0} is not supported")]
    Unsupported(DType),
}

impl TransposeConvError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransposeConvError::Allocation { .. } => ErrorKind::Allocation,
            TransposeConvError::Unsupported(_) => ErrorKind::Unsupported,
            _ => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransposeConvError>;
