//! The transpose convolution operator as seen by a host runtime.
//!
//! A host binds four buffers per call: the int32 output-shape descriptor,
//! the filter, the input, and the output. [`TransposeConv::prepare`]
//! validates the bindings once at configuration time,
//! [`TransposeConv::required_buffers`] reports the intermediate buffers the
//! host must allocate, and [`TransposeConv::eval`] runs the kernels.
//!
//! Padding, the requantization multiplier and buffer sizing are memoized
//! against the inputs that determine them, so a shape change only
//! recomputes the values that depend on shape.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransposeConvError};
use crate::kernels::im2col::im2col_shape;
use crate::kernels::padding::{compute_padding, Padding, PaddingValues};
use crate::kernels::quantization::{quantize_multiplier, real_multiplier, QuantizedMultiplier, RequantParams};
use crate::kernels::transpose_conv::{self as kernels, KernelType};
use crate::kernels::utils::{self, checked_num_elements, num_elements};
use crate::tensor::{DType, Element, Operand, OperandMut, QuantParams, TensorView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransposeConvParams {
    pub stride_height: usize,
    pub stride_width: usize,
    pub padding: Padding,
}

impl Default for TransposeConvParams {
    fn default() -> Self {
        Self {
            stride_height: 1,
            stride_width: 1,
            padding: Padding::Same,
        }
    }
}

/// Validated extents of one binding of the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedShapes {
    pub dtype: DType,
    pub input: [usize; 4],
    pub filter: [usize; 4],
    pub output: [usize; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    pub dtype: DType,
    pub shape: [usize; 4],
}

impl BufferSpec {
    pub fn elements(&self) -> usize {
        num_elements(&self.shape)
    }
    pub fn bytes(&self) -> usize {
        self.elements() * self.dtype.size_in_bytes()
    }
}

/// Answer to the sizing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub output: BufferSpec,
    /// Present when the configured strategy builds an im2col matrix.
    pub im2col: Option<BufferSpec>,
    /// i32 accumulators; present for uint8 operands.
    pub scratch: Option<BufferSpec>,
}

/// Outcome of [`TransposeConv::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preparation {
    /// Resolved when the output-shape descriptor is constant, deferred otherwise.
    pub requirements: Option<BufferRequirements>,
    /// Requantization constants for uint8 operands.
    pub requant: Option<RequantParams>,
}

/// Host-owned intermediate buffers.
///
/// The operator never grows these itself; a host calls
/// [`Workspace::allocate`] with the sizing query's answer, or fills the
/// vectors by other means.
#[derive(Debug, Default)]
pub struct Workspace {
    pub im2col_f32: Vec<f32>,
    pub im2col_u8: Vec<u8>,
    pub scratch: Vec<i32>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, requirements: &BufferRequirements) {
        if let Some(spec) = requirements.im2col {
            match spec.dtype {
                DType::Float32 => utils::ensure_capacity(&mut self.im2col_f32, spec.elements()),
                DType::UInt8 => utils::ensure_capacity(&mut self.im2col_u8, spec.elements()),
                _ => {}
            }
        }
        if let Some(spec) = requirements.scratch {
            utils::ensure_capacity(&mut self.scratch, spec.elements());
        }
    }
}

fn take_buffer<'b, T>(buf: &'b mut [T], required: usize, buffer: &'static str) -> Result<&'b mut [T]> {
    if buf.len() < required {
        return Err(TransposeConvError::Allocation {
            buffer,
            required,
            provided: buf.len(),
        });
    }
    Ok(&mut buf[..required])
}

/// Single-entry cache of a pure function of `K`.
#[derive(Debug)]
struct Memo<K, V> {
    name: &'static str,
    entry: Option<(K, V)>,
    misses: usize,
}

impl<K: PartialEq + Copy + Debug, V: Copy> Memo<K, V> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entry: None,
            misses: 0,
        }
    }

    fn get_or_try_compute(&mut self, key: K, compute: impl FnOnce() -> Result<V>) -> Result<V> {
        if let Some((cached, value)) = &self.entry {
            if *cached == key {
                return Ok(*value);
            }
        }
        self.misses += 1;
        log::debug!("recomputing {} for {:?} (miss {})", self.name, key, self.misses);
        let value = compute()?;
        self.entry = Some((key, value));
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PaddingKey {
    input_hw: [usize; 2],
    filter_hw: [usize; 2],
    output_hw: [usize; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequantKey {
    input_scale: u32,
    filter_scale: u32,
    output_scale: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferKey {
    dtype: DType,
    input: [usize; 4],
    filter: [usize; 4],
    output: [usize; 4],
}

/// Reads the int32 `[N, OutH, OutW, Cout]` descriptor.
pub fn output_dims(descriptor: &Operand<'_>) -> Result<[usize; 4]> {
    if descriptor.rank() != 1 {
        return Err(TransposeConvError::Rank {
            operand: "output shape descriptor",
            expected: 1,
            actual: descriptor.rank(),
        });
    }
    let values = <i32 as Element>::unwrap(&descriptor.data).ok_or(TransposeConvError::DescriptorType(descriptor.dtype()))?;
    if values.len() != 4 {
        return Err(TransposeConvError::DescriptorLength(values.len()));
    }
    let mut dims = [0usize; 4];
    for (index, (&value, dim)) in values.iter().zip(dims.iter_mut()).enumerate() {
        *dim = usize::try_from(value).map_err(|_| TransposeConvError::NegativeExtent {
            index,
            value: value as i64,
        })?;
    }
    Ok(dims)
}

fn dims4(operand: &Operand<'_>, name: &'static str) -> Result<[usize; 4]> {
    if operand.rank() != 4 {
        return Err(TransposeConvError::Rank {
            operand: name,
            expected: 4,
            actual: operand.rank(),
        });
    }
    let dims = [operand.shape[0], operand.shape[1], operand.shape[2], operand.shape[3]];
    let expected = checked_size(name, &dims, 1)?;
    if operand.data.len() != expected {
        return Err(TransposeConvError::DataLength {
            operand: name,
            expected,
            actual: operand.data.len(),
        });
    }
    Ok(dims)
}

/// Element count of `dims`, checked so that `elem_bytes` per element stays addressable.
fn checked_size(operand: &'static str, dims: &[usize], elem_bytes: usize) -> Result<usize> {
    checked_num_elements(dims)
        .filter(|&n| n.checked_mul(elem_bytes).is_some())
        .ok_or_else(|| TransposeConvError::SizeOverflow {
            operand,
            dims: dims.to_vec(),
        })
}

/// Validates ranks, element types and channel agreement of a binding.
pub fn resolve_shapes(output_shape: &Operand<'_>, filter: &Operand<'_>, input: &Operand<'_>) -> Result<ResolvedShapes> {
    let input_dims = dims4(input, "input")?;
    let filter_dims = dims4(filter, "filter")?;
    let dtype = input.dtype();
    if !matches!(dtype, DType::Float32 | DType::UInt8) {
        return Err(TransposeConvError::Unsupported(dtype));
    }
    if filter.dtype() != dtype {
        return Err(TransposeConvError::TypeMismatch {
            operand: "filter",
            expected: dtype,
            actual: filter.dtype(),
        });
    }
    if input_dims[3] != filter_dims[3] {
        return Err(TransposeConvError::ChannelMismatch {
            input: input_dims[3],
            filter: filter_dims[3],
        });
    }
    let output = output_dims(output_shape)?;
    if output[0] != input_dims[0] {
        return Err(TransposeConvError::OutputDimMismatch {
            dim: "batch",
            output: output[0],
            source_name: "input",
            expected: input_dims[0],
        });
    }
    if output[3] != filter_dims[0] {
        return Err(TransposeConvError::OutputDimMismatch {
            dim: "channels",
            output: output[3],
            source_name: "filter",
            expected: filter_dims[0],
        });
    }
    // i32 scratch is the widest per-element buffer shaped like the output
    checked_size("output", &output, DType::Int32.size_in_bytes())?;
    Ok(ResolvedShapes {
        dtype,
        input: input_dims,
        filter: filter_dims,
        output,
    })
}

fn check_quant(operand: &'static str, quant: Option<QuantParams>) -> Result<QuantParams> {
    let q = quant.ok_or(TransposeConvError::MissingQuantization(operand))?;
    if !(q.scale.is_finite() && q.scale > 0.0) {
        return Err(TransposeConvError::InvalidScale {
            operand,
            scale: q.scale,
        });
    }
    if !(u8::MIN as i32..=u8::MAX as i32).contains(&q.zero_point) {
        return Err(TransposeConvError::InvalidZeroPoint {
            operand,
            zero_point: q.zero_point,
        });
    }
    Ok(q)
}

fn check_output_type(expected: DType, actual: DType) -> Result<()> {
    if actual != expected {
        return Err(TransposeConvError::TypeMismatch {
            operand: "output",
            expected,
            actual,
        });
    }
    Ok(())
}

fn typed<'b, T: Element>(operand: &'b Operand<'_>, name: &'static str) -> Result<TensorView<'b, T>> {
    operand.view::<T>().ok_or(TransposeConvError::TypeMismatch {
        operand: name,
        expected: T::DTYPE,
        actual: operand.dtype(),
    })
}

/// A configured transpose convolution.
#[derive(Debug)]
pub struct TransposeConv {
    params: TransposeConvParams,
    kernel_type: KernelType,
    padding: Memo<PaddingKey, PaddingValues>,
    requant: Memo<RequantKey, QuantizedMultiplier>,
    buffers: Memo<BufferKey, BufferRequirements>,
}

impl TransposeConv {
    pub fn new(params: TransposeConvParams, kernel_type: KernelType) -> Self {
        Self {
            params,
            kernel_type,
            padding: Memo::new("padding"),
            requant: Memo::new("output multiplier"),
            buffers: Memo::new("buffer requirements"),
        }
    }

    pub fn params(&self) -> &TransposeConvParams {
        &self.params
    }

    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type
    }

    /// Padding for `shapes`, recomputed only when a spatial extent changes.
    pub fn padding_for(&mut self, shapes: &ResolvedShapes) -> Result<PaddingValues> {
        let key = PaddingKey {
            input_hw: [shapes.input[1], shapes.input[2]],
            filter_hw: [shapes.filter[1], shapes.filter[2]],
            output_hw: [shapes.output[1], shapes.output[2]],
        };
        let params = self.params;
        self.padding.get_or_try_compute(key, || {
            compute_padding(
                params.stride_height,
                params.stride_width,
                key.filter_hw[0],
                key.filter_hw[1],
                key.input_hw[0],
                key.input_hw[1],
                key.output_hw[0],
                key.output_hw[1],
                params.padding,
            )
        })
    }

    /// Output multiplier for a scale triple, recomputed only when a scale changes.
    pub fn output_multiplier(
        &mut self,
        input: &QuantParams,
        filter: &QuantParams,
        output: &QuantParams,
    ) -> Result<QuantizedMultiplier> {
        let key = RequantKey {
            input_scale: input.scale.to_bits(),
            filter_scale: filter.scale.to_bits(),
            output_scale: output.scale.to_bits(),
        };
        self.requant
            .get_or_try_compute(key, || quantize_multiplier(real_multiplier(input, filter, output)))
    }

    fn requirements_for(&mut self, shapes: &ResolvedShapes) -> Result<BufferRequirements> {
        let key = BufferKey {
            dtype: shapes.dtype,
            input: shapes.input,
            filter: shapes.filter,
            output: shapes.output,
        };
        let kernel_type = self.kernel_type;
        self.buffers.get_or_try_compute(key, || {
            let im2col = match kernel_type {
                KernelType::Reference => None,
                KernelType::GenericOptimized => {
                    let rows_and_cols = [
                        key.output[0],
                        key.output[1],
                        key.output[2],
                        key.filter[1],
                        key.filter[2],
                        key.input[3],
                    ];
                    checked_size("im2col", &rows_and_cols, key.dtype.size_in_bytes())?;
                    let shape = im2col_shape(&key.output, &key.filter, key.input[3]);
                    Some(BufferSpec {
                        dtype: key.dtype,
                        shape,
                    })
                }
            };
            let scratch = (key.dtype == DType::UInt8).then_some(BufferSpec {
                dtype: DType::Int32,
                shape: key.output,
            });
            Ok(BufferRequirements {
                output: BufferSpec {
                    dtype: key.dtype,
                    shape: key.output,
                },
                im2col,
                scratch,
            })
        })
    }

    /// Sizing query: the buffers a call with these bindings needs.
    pub fn required_buffers(
        &mut self,
        output_shape: &Operand<'_>,
        filter: &Operand<'_>,
        input: &Operand<'_>,
    ) -> Result<BufferRequirements> {
        let shapes = resolve_shapes(output_shape, filter, input)?;
        self.padding_for(&shapes)?;
        self.requirements_for(&shapes)
    }

    fn requant_params(&mut self, input: &Operand<'_>, filter: &Operand<'_>, output: Option<QuantParams>) -> Result<RequantParams> {
        let input_q = check_quant("input", input.quant)?;
        let filter_q = check_quant("filter", filter.quant)?;
        let output_q = check_quant("output", output)?;
        let multiplier = self.output_multiplier(&input_q, &filter_q, &output_q)?;
        Ok(RequantParams::new(&input_q, &filter_q, &output_q, multiplier))
    }

    /// Configuration-time validation.
    ///
    /// Buffer sizing is resolved here when the descriptor is constant and
    /// deferred to [`TransposeConv::eval`] otherwise.
    pub fn prepare(
        &mut self,
        output_shape: &Operand<'_>,
        filter: &Operand<'_>,
        input: &Operand<'_>,
        output_type: DType,
        output_quant: Option<QuantParams>,
    ) -> Result<Preparation> {
        let shapes = resolve_shapes(output_shape, filter, input)?;
        check_output_type(shapes.dtype, output_type)?;
        let requirements = if output_shape.constant {
            self.padding_for(&shapes)?;
            Some(self.requirements_for(&shapes)?)
        } else {
            None
        };
        let requant = if shapes.dtype == DType::UInt8 {
            Some(self.requant_params(input, filter, output_quant)?)
        } else {
            None
        };
        Ok(Preparation { requirements, requant })
    }

    /// Computes the output. Every check runs before any buffer is written.
    pub fn eval(
        &mut self,
        output_shape: &Operand<'_>,
        filter: &Operand<'_>,
        input: &Operand<'_>,
        output: &mut OperandMut<'_>,
        workspace: &mut Workspace,
    ) -> Result<()> {
        let shapes = resolve_shapes(output_shape, filter, input)?;
        check_output_type(shapes.dtype, output.dtype())?;
        if output.shape.as_ref() != shapes.output.as_slice() {
            return Err(TransposeConvError::OutputShape {
                expected: shapes.output,
                actual: output.shape.to_vec(),
            });
        }
        let out_len = num_elements(&shapes.output);
        if output.data.len() != out_len {
            return Err(TransposeConvError::DataLength {
                operand: "output",
                expected: out_len,
                actual: output.data.len(),
            });
        }
        let padding = self.padding_for(&shapes)?;
        let requirements = self.requirements_for(&shapes)?;
        let stride = (self.params.stride_height, self.params.stride_width);
        log::trace!(
            "transpose conv {:?} {}: input {:?} filter {:?} output {:?}",
            self.kernel_type,
            shapes.dtype,
            shapes.input,
            shapes.filter,
            shapes.output
        );

        match shapes.dtype {
            DType::Float32 => {
                let input = typed::<f32>(input, "input")?;
                let filter = typed::<f32>(filter, "filter")?;
                let im2col = match requirements.im2col {
                    Some(spec) => Some(take_buffer(workspace.im2col_f32.as_mut_slice(), spec.elements(), "im2col")?),
                    None => None,
                };
                let out = output.slice_mut::<f32>().ok_or(TransposeConvError::TypeMismatch {
                    operand: "output",
                    expected: DType::Float32,
                    actual: shapes.dtype,
                })?;
                match im2col {
                    Some(im2col) => kernels::transpose_conv_optimized_into(
                        &input,
                        &filter,
                        stride,
                        &padding,
                        &shapes.output,
                        im2col,
                        out,
                    ),
                    None => kernels::transpose_conv_reference_into(&input, &filter, stride, &padding, &shapes.output, out),
                }
            }
            DType::UInt8 => {
                let params = self.requant_params(input, filter, output.quant)?;
                let input = typed::<u8>(input, "input")?;
                let filter = typed::<u8>(filter, "filter")?;
                let scratch = take_buffer(workspace.scratch.as_mut_slice(), out_len, "scratch")?;
                let im2col = match requirements.im2col {
                    Some(spec) => Some(take_buffer(workspace.im2col_u8.as_mut_slice(), spec.elements(), "im2col")?),
                    None => None,
                };
                let out = output.slice_mut::<u8>().ok_or(TransposeConvError::TypeMismatch {
                    operand: "output",
                    expected: DType::UInt8,
                    actual: shapes.dtype,
                })?;
                match im2col {
                    Some(im2col) => kernels::transpose_conv_u8_optimized_into(
                        &input,
                        &filter,
                        stride,
                        &padding,
                        &params,
                        &shapes.output,
                        im2col,
                        scratch,
                        out,
                    ),
                    None => kernels::transpose_conv_u8_reference_into(
                        &input,
                        &filter,
                        stride,
                        &padding,
                        &params,
                        &shapes.output,
                        scratch,
                        out,
                    ),
                }
            }
            other => return Err(TransposeConvError::Unsupported(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones_u8(shape: &[usize]) -> Operand<'static> {
        let len = shape.iter().product();
        Operand::quantized(
            TensorView::from_owned(vec![1u8; len], shape.to_vec()),
            QuantParams::new(1.0, 0),
        )
    }

    fn misses(op: &TransposeConv) -> (usize, usize, usize) {
        (op.padding.misses, op.requant.misses, op.buffers.misses)
    }

    fn run(op: &mut TransposeConv, dims: [usize; 4], output_scale: f32, workspace: &mut Workspace) {
        let descriptor = Operand::shape_descriptor(&dims.map(|d| d as i32));
        let filter = ones_u8(&[1, 3, 3, 1]);
        let input = ones_u8(&[1, 2, 2, 1]);
        workspace.allocate(&op.required_buffers(&descriptor, &filter, &input).unwrap());
        let mut out = vec![0u8; num_elements(&dims)];
        let mut output = OperandMut::quantized(&mut out, &dims, QuantParams::new(output_scale, 0));
        op.eval(&descriptor, &filter, &input, &mut output, workspace).unwrap();
    }

    #[test]
    fn test_scale_change_recomputes_only_the_multiplier() {
        let mut op = TransposeConv::new(TransposeConvParams::default(), KernelType::GenericOptimized);
        let mut workspace = Workspace::new();

        run(&mut op, [1, 4, 4, 1], 1.0, &mut workspace);
        assert_eq!(misses(&op), (1, 1, 1));
        run(&mut op, [1, 4, 4, 1], 1.0, &mut workspace);
        assert_eq!(misses(&op), (1, 1, 1));

        run(&mut op, [1, 4, 4, 1], 0.5, &mut workspace);
        assert_eq!(misses(&op), (1, 2, 1));
    }

    #[test]
    fn test_shape_change_keeps_the_multiplier() {
        let mut op = TransposeConv::new(TransposeConvParams::default(), KernelType::Reference);
        let mut workspace = Workspace::new();

        run(&mut op, [1, 4, 4, 1], 0.5, &mut workspace);
        assert_eq!(misses(&op), (1, 1, 1));

        run(&mut op, [1, 2, 2, 1], 0.5, &mut workspace);
        assert_eq!(misses(&op), (2, 1, 2));
        run(&mut op, [1, 2, 2, 1], 0.5, &mut workspace);
        assert_eq!(misses(&op), (2, 1, 2));
    }
}
