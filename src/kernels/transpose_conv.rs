use crate::kernels::gemm::{gemm_nt, gemm_nt_u8};
use crate::kernels::im2col::{im2col_shape, transpose_im2col};
use crate::kernels::padding::PaddingValues;
use crate::kernels::quantization::RequantParams;
use crate::kernels::utils::{self, in_bounds, num_elements, offset4};
use crate::tensor::TensorView;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Evaluation strategy, fixed when the operator is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    /// Direct scatter of every input element through the filter.
    Reference,
    /// Transpose im2col followed by a dense GEMM.
    #[default]
    GenericOptimized,
}

fn check_shapes(in_dims: &[usize; 4], filter_dims: &[usize; 4], output_dims: &[usize; 4], out_len: usize) {
    assert_eq!(
        in_dims[3], filter_dims[3],
        "TransposeConv: input has {} channels, filter expects {}",
        in_dims[3], filter_dims[3]
    );
    assert_eq!(output_dims[0], in_dims[0], "TransposeConv: batch mismatch");
    assert_eq!(output_dims[3], filter_dims[0], "TransposeConv: output channel mismatch");
    assert_eq!(out_len, num_elements(output_dims), "TransposeConv: output buffer size mismatch");
}

/// Scatter-accumulates one batch of `input` into `out`, which must already be zeroed.
///
/// Generic over the accumulator so the float and quantized paths share the
/// index arithmetic; `mac` adds one (input, filter) product into an accumulator.
#[allow(clippy::too_many_arguments)]
#[inline]
fn scatter_batch<I, A>(
    batch: usize,
    input: &[I],
    in_dims: &[usize; 4],
    filter: &[I],
    filter_dims: &[usize; 4],
    stride: (usize, usize),
    padding: &PaddingValues,
    output_dims: &[usize; 4],
    mac: impl Fn(&mut A, I, I),
    out: &mut [A],
) where
    I: Copy,
{
    let [_, input_height, input_width, input_depth] = *in_dims;
    let [_, filter_height, filter_width, _] = *filter_dims;
    let [_, output_height, output_width, output_depth] = *output_dims;
    let batch_out_dims = [1, output_height, output_width, output_depth];
    let (stride_height, stride_width) = stride;

    for in_y in 0..input_height {
        let out_y_origin = (in_y * stride_height) as isize - padding.height as isize;
        for in_x in 0..input_width {
            let out_x_origin = (in_x * stride_width) as isize - padding.width as isize;
            for in_channel in 0..input_depth {
                let input_value = input[offset4(in_dims, batch, in_y, in_x, in_channel)];
                for filter_y in 0..filter_height {
                    let Some(out_y) = in_bounds(out_y_origin + filter_y as isize, output_height) else {
                        continue;
                    };
                    for filter_x in 0..filter_width {
                        let Some(out_x) = in_bounds(out_x_origin + filter_x as isize, output_width) else {
                            continue;
                        };
                        let out_base = offset4(&batch_out_dims, 0, out_y, out_x, 0);
                        for out_channel in 0..output_depth {
                            let filter_value =
                                filter[offset4(filter_dims, out_channel, filter_y, filter_x, in_channel)];
                            mac(&mut out[out_base + out_channel], input_value, filter_value);
                        }
                    }
                }
            }
        }
    }
}

/// Transpose convolution by direct scatter.
///
/// Input `[N, H, W, Cin]`, filter `[Cout, FH, FW, Cin]`, output
/// `[N, OutH, OutW, Cout]`. Every input element adds
/// `input * filter` into the output pixel at
/// `(y * stride - pad + fy, x * stride - pad + fx)` when that pixel lies in
/// bounds. Output pixels nothing reaches stay zero.
pub fn transpose_conv_reference_into(
    input: &TensorView<'_, f32>,
    filter: &TensorView<'_, f32>,
    stride: (usize, usize),
    padding: &PaddingValues,
    output_dims: &[usize; 4],
    out: &mut [f32],
) {
    let in_dims = input.dims4();
    let filter_dims = filter.dims4();
    check_shapes(&in_dims, &filter_dims, output_dims, out.len());
    if out.is_empty() {
        return;
    }
    let batch_len = output_dims[1] * output_dims[2] * output_dims[3];
    let input_data: &[f32] = &input.data;
    let filter_data: &[f32] = &filter.data;
    out.par_chunks_mut(batch_len)
        .enumerate()
        .for_each(|(batch, out_b)| {
            out_b.fill(0.0);
            scatter_batch(
                batch,
                input_data,
                &in_dims,
                filter_data,
                &filter_dims,
                stride,
                padding,
                output_dims,
                |acc: &mut f32, x: f32, w: f32| *acc += x * w,
                out_b,
            );
        });
}

/// Transpose convolution as im2col + GEMM.
///
/// `im2col` must hold `N * OutH * OutW * FH * FW * Cin` elements; see
/// [`im2col_shape`]. Produces the same sums as
/// [`transpose_conv_reference_into`], reordered.
pub fn transpose_conv_optimized_into(
    input: &TensorView<'_, f32>,
    filter: &TensorView<'_, f32>,
    stride: (usize, usize),
    padding: &PaddingValues,
    output_dims: &[usize; 4],
    im2col: &mut [f32],
    out: &mut [f32],
) {
    let in_dims = input.dims4();
    let filter_dims = filter.dims4();
    check_shapes(&in_dims, &filter_dims, output_dims, out.len());

    transpose_im2col(input, &filter_dims, stride, padding, output_dims, 0.0, im2col);

    let rows = output_dims[1] * output_dims[2];
    let k = filter_dims[1] * filter_dims[2] * in_dims[3];
    let n = output_dims[3];
    if out.is_empty() {
        return;
    }
    if k == 0 {
        out.fill(0.0);
        return;
    }
    let filter_data: &[f32] = &filter.data;
    out.par_chunks_mut(rows * n)
        .zip(im2col.par_chunks(rows * k))
        .for_each(|(out_b, cols_b)| gemm_nt(cols_b, filter_data, rows, k, n, out_b));
}

/// Runs either strategy into a growable output buffer.
#[allow(clippy::too_many_arguments)]
pub fn transpose_conv<'a>(
    input: &TensorView<'_, f32>,
    filter: &TensorView<'_, f32>,
    stride: (usize, usize),
    padding: &PaddingValues,
    output_dims: &[usize; 4],
    kernel_type: KernelType,
    im2col: &mut Vec<f32>,
    out: &'a mut Vec<f32>,
) -> TensorView<'a, f32> {
    utils::ensure_capacity(out, num_elements(output_dims));
    match kernel_type {
        KernelType::Reference => {
            transpose_conv_reference_into(input, filter, stride, padding, output_dims, out);
        }
        KernelType::GenericOptimized => {
            let shape = im2col_shape(output_dims, &filter.dims4(), input.dims4()[3]);
            utils::ensure_capacity(im2col, num_elements(&shape));
            transpose_conv_optimized_into(input, filter, stride, padding, output_dims, im2col, out);
        }
    }
    TensorView {
        data: Cow::Borrowed(out),
        shape: Cow::Owned(output_dims.to_vec()),
    }
}

/// Requantizes every accumulator into `out`.
pub fn requantize(scratch: &[i32], params: &RequantParams, out: &mut [u8]) {
    assert_eq!(scratch.len(), out.len(), "Requantize: scratch/output size mismatch");
    out.par_iter_mut()
        .zip(scratch.par_iter())
        .for_each(|(o, &acc)| *o = params.requantize(acc));
}

/// Quantized transpose convolution by direct scatter.
///
/// Accumulates `(input - input_zp) * (filter - filter_zp)` in i32 into
/// `scratch` (shaped like the output), then requantizes each accumulator
/// once every contribution has landed.
#[allow(clippy::too_many_arguments)]
pub fn transpose_conv_u8_reference_into(
    input: &TensorView<'_, u8>,
    filter: &TensorView<'_, u8>,
    stride: (usize, usize),
    padding: &PaddingValues,
    params: &RequantParams,
    output_dims: &[usize; 4],
    scratch: &mut [i32],
    out: &mut [u8],
) {
    let in_dims = input.dims4();
    let filter_dims = filter.dims4();
    check_shapes(&in_dims, &filter_dims, output_dims, out.len());
    assert_eq!(scratch.len(), out.len(), "TransposeConv: scratch buffer size mismatch");
    if out.is_empty() {
        return;
    }
    let batch_len = output_dims[1] * output_dims[2] * output_dims[3];
    let input_data: &[u8] = &input.data;
    let filter_data: &[u8] = &filter.data;
    let (input_offset, filter_offset) = (params.input_offset, params.filter_offset);
    scratch
        .par_chunks_mut(batch_len)
        .enumerate()
        .for_each(|(batch, acc_b)| {
            acc_b.fill(0);
            scatter_batch(
                batch,
                input_data,
                &in_dims,
                filter_data,
                &filter_dims,
                stride,
                padding,
                output_dims,
                |acc: &mut i32, x: u8, w: u8| {
                    let product = (x as i32 + input_offset).wrapping_mul(w as i32 + filter_offset);
                    *acc = acc.wrapping_add(product);
                },
                acc_b,
            );
        });
    requantize(scratch, params, out);
}

/// Quantized transpose convolution as im2col + integer GEMM.
///
/// Unreached im2col slots hold the input zero-point, so they contribute
/// nothing once offset. Bit-identical to [`transpose_conv_u8_reference_into`].
#[allow(clippy::too_many_arguments)]
pub fn transpose_conv_u8_optimized_into(
    input: &TensorView<'_, u8>,
    filter: &TensorView<'_, u8>,
    stride: (usize, usize),
    padding: &PaddingValues,
    params: &RequantParams,
    output_dims: &[usize; 4],
    im2col: &mut [u8],
    scratch: &mut [i32],
    out: &mut [u8],
) {
    let in_dims = input.dims4();
    let filter_dims = filter.dims4();
    check_shapes(&in_dims, &filter_dims, output_dims, out.len());
    assert_eq!(scratch.len(), out.len(), "TransposeConv: scratch buffer size mismatch");
    assert!(
        (0..=u8::MAX as i32).contains(&-params.input_offset),
        "TransposeConv: input zero point {} outside uint8 range",
        -params.input_offset
    );
    let zero_byte = (-params.input_offset) as u8;

    transpose_im2col(input, &filter_dims, stride, padding, output_dims, zero_byte, im2col);

    let rows = output_dims[1] * output_dims[2];
    let k = filter_dims[1] * filter_dims[2] * in_dims[3];
    let n = output_dims[3];
    if out.is_empty() {
        return;
    }
    if k == 0 {
        scratch.fill(0);
    } else {
        let filter_data: &[u8] = &filter.data;
        scratch
            .par_chunks_mut(rows * n)
            .zip(im2col.par_chunks(rows * k))
            .for_each(|(acc_b, cols_b)| {
                gemm_nt_u8(
                    cols_b,
                    params.input_offset,
                    filter_data,
                    params.filter_offset,
                    rows,
                    k,
                    n,
                    acc_b,
                )
            });
    }
    requantize(scratch, params, out);
}

/// Runs either quantized strategy into growable buffers.
#[allow(clippy::too_many_arguments)]
pub fn transpose_conv_u8<'a>(
    input: &TensorView<'_, u8>,
    filter: &TensorView<'_, u8>,
    stride: (usize, usize),
    padding: &PaddingValues,
    params: &RequantParams,
    output_dims: &[usize; 4],
    kernel_type: KernelType,
    im2col: &mut Vec<u8>,
    scratch: &mut Vec<i32>,
    out: &'a mut Vec<u8>,
) -> TensorView<'a, u8> {
    let len = num_elements(output_dims);
    utils::ensure_capacity(out, len);
    utils::ensure_capacity(scratch, len);
    match kernel_type {
        KernelType::Reference => transpose_conv_u8_reference_into(
            input,
            filter,
            stride,
            padding,
            params,
            output_dims,
            scratch,
            out,
        ),
        KernelType::GenericOptimized => {
            let shape = im2col_shape(output_dims, &filter.dims4(), input.dims4()[3]);
            utils::ensure_capacity(im2col, num_elements(&shape));
            transpose_conv_u8_optimized_into(
                input,
                filter,
                stride,
                padding,
                params,
                output_dims,
                im2col,
                scratch,
                out,
            )
        }
    }
    TensorView {
        data: Cow::Borrowed(out),
        shape: Cow::Owned(output_dims.to_vec()),
    }
}
