//! Transposed (fractionally-strided) 2D convolution over NHWC buffers, with
//! float32 and uint8-quantized kernels.
//!
//! [`kernels`] holds the free-function kernels operating on borrowed
//! [`tensor::TensorView`]s; [`op::TransposeConv`] wraps them with the
//! validation, memoization and buffer sizing a host runtime needs.

pub mod error;
pub mod kernels;
pub mod op;
pub mod tensor;

pub use error::{ErrorKind, Result, TransposeConvError};
pub use kernels::{KernelType, Padding, PaddingValues};
pub use op::{BufferRequirements, BufferSpec, Preparation, TransposeConv, TransposeConvParams, Workspace};
pub use tensor::{DType, Operand, OperandMut, QuantParams, TensorView};
