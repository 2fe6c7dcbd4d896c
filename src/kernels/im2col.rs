use crate::kernels::padding::PaddingValues;
use crate::kernels::utils::{in_bounds, offset4};
use crate::tensor::TensorView;
use rayon::prelude::*;

/// Shape `[N, OutH, OutW, Cin * FH * FW]` of the transpose im2col buffer.
pub fn im2col_shape(output_dims: &[usize; 4], filter_dims: &[usize; 4], input_depth: usize) -> [usize; 4] {
    [
        output_dims[0],
        output_dims[1],
        output_dims[2],
        input_depth * filter_dims[1] * filter_dims[2],
    ]
}

/// Builds the transpose im2col matrix.
///
/// Rows are output pixels in `(batch, y, x)` order; columns are
/// `(filter_y, filter_x, in_channel)`. Row `r`, column `(fy, fx, ·)` holds
/// the channels of the single input pixel that scatters into output pixel
/// `r` through filter tap `(fy, fx)`, or `fill` when no input pixel does.
/// Multiplying by the filter reshaped to `[Cout, FH * FW * Cin]` then
/// reproduces the scatter sum.
///
/// Built by scattering: every slot starts as `fill`, and each input pixel
/// copies its channels into every slot it reaches.
pub fn transpose_im2col<T>(
    input: &TensorView<'_, T>,
    filter_dims: &[usize; 4],
    stride: (usize, usize),
    padding: &PaddingValues,
    output_dims: &[usize; 4],
    fill: T,
    im2col: &mut [T],
) where
    T: Copy + Send + Sync,
{
    let in_dims = input.dims4();
    let [batches, input_height, input_width, input_depth] = in_dims;
    let [_, filter_height, filter_width, _] = *filter_dims;
    let [_, output_height, output_width, _] = *output_dims;
    let (stride_height, stride_width) = stride;

    let col_dims = [1, filter_height, filter_width, input_depth];
    let cols = filter_height * filter_width * input_depth;
    let batch_len = output_height * output_width * cols;
    assert_eq!(im2col.len(), batches * batch_len, "im2col buffer size mismatch");

    im2col.fill(fill);
    if batch_len == 0 || input_depth == 0 {
        return;
    }

    let input_data = &input.data;
    im2col
        .par_chunks_mut(batch_len)
        .enumerate()
        .for_each(|(batch, dst)| {
            for in_y in 0..input_height {
                let out_y_origin = (in_y * stride_height) as isize - padding.height as isize;
                for in_x in 0..input_width {
                    let out_x_origin = (in_x * stride_width) as isize - padding.width as isize;
                    let src_start = offset4(&in_dims, batch, in_y, in_x, 0);
                    let src = &input_data[src_start..src_start + input_depth];
                    for filter_y in 0..filter_height {
                        let Some(out_y) = in_bounds(out_y_origin + filter_y as isize, output_height) else {
                            continue;
                        };
                        for filter_x in 0..filter_width {
                            let Some(out_x) = in_bounds(out_x_origin + filter_x as isize, output_width) else {
                                continue;
                            };
                            let row = out_y * output_width + out_x;
                            let col = offset4(&col_dims, 0, filter_y, filter_x, 0);
                            let start = row * cols + col;
                            dst[start..start + input_depth].copy_from_slice(src);
                        }
                    }
                }
            }
        });
}
