use crate::error::{Result, TransposeConvError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Same,
    Valid,
}

/// Symmetric padding for a transpose convolution.
///
/// `height`/`width` are the leading pads the kernels subtract from each
/// scattered coordinate. The `*_offset` fields hold the odd unit of total
/// padding that lands on the trailing edge, so the forward convolution that
/// maps the output back onto the input sees `2 * pad + offset` in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaddingValues {
    pub height: usize,
    pub width: usize,
    pub height_offset: usize,
    pub width_offset: usize,
}

/// Extent a forward convolution over `image_size` produces under `padding`.
pub fn forward_out_size(padding: Padding, image_size: usize, filter_size: usize, stride: usize) -> Option<usize> {
    match padding {
        Padding::Same => Some((image_size + stride - 1) / stride),
        Padding::Valid => {
            if image_size < filter_size {
                None
            } else {
                Some((image_size - filter_size) / stride + 1)
            }
        }
    }
}

/// Total padding along one axis, or `None` if no padding reduces `out_size`.
///
/// A forward pass that already fits inside the output with room to spare
/// needs no padding; the uncovered trailing rows are simply never read.
fn total_padding(padding: Padding, stride: usize, filter_size: usize, out_size: usize) -> Option<usize> {
    let reduced = forward_out_size(padding, out_size, filter_size, stride)?;
    if reduced == 0 {
        return Some(0);
    }
    let covered = (reduced - 1) * stride + filter_size;
    Some(covered.saturating_sub(out_size))
}

fn axis_padding(
    axis: &'static str,
    padding: Padding,
    stride: usize,
    filter_size: usize,
    in_size: usize,
    out_size: usize,
) -> Result<(usize, usize)> {
    if stride == 0 {
        return Err(TransposeConvError::ZeroStride { axis });
    }
    let total = total_padding(padding, stride, filter_size, out_size).ok_or(
        TransposeConvError::InfeasiblePadding {
            axis,
            stride,
            filter: filter_size,
            output: out_size,
        },
    )?;
    let reduced = (out_size + total).saturating_sub(filter_size) / stride + 1;
    if reduced != in_size {
        log::debug!(
            "transpose conv {axis}: output {out_size} reduces to {reduced}, input is {in_size}; \
             output is cropped or extended"
        );
    }
    Ok((total / 2, total % 2))
}

/// Derives the padding for a transpose convolution producing an
/// `out_height x out_width` map from an `in_height x in_width` input.
///
/// The requested output is treated as the input of the equivalent forward
/// convolution; the padding is the smallest non-negative amount that lets
/// that forward pass reach the output's trailing edge under `stride` and
/// `padding`. Only a `Valid` output narrower than the filter has none.
#[allow(clippy::too_many_arguments)]
pub fn compute_padding(
    stride_height: usize,
    stride_width: usize,
    filter_height: usize,
    filter_width: usize,
    in_height: usize,
    in_width: usize,
    out_height: usize,
    out_width: usize,
    padding: Padding,
) -> Result<PaddingValues> {
    let (height, height_offset) =
        axis_padding("height", padding, stride_height, filter_height, in_height, out_height)?;
    let (width, width_offset) =
        axis_padding("width", padding, stride_width, filter_width, in_width, out_width)?;
    Ok(PaddingValues {
        height,
        width,
        height_offset,
        width_offset,
    })
}
