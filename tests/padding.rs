use transconv::kernels::{compute_padding, forward_out_size, Padding, PaddingValues};
use transconv::{ErrorKind, TransposeConvError};

/// Output extent of the forward convolution over `out_size` with the given total padding.
fn forward_extent(out_size: usize, total_pad: usize, filter: usize, stride: usize) -> usize {
    (out_size + total_pad - filter) / stride + 1
}

fn pad_1d(stride: usize, filter: usize, in_size: usize, out_size: usize, mode: Padding) -> PaddingValues {
    compute_padding(stride, 1, filter, 1, in_size, 1, out_size, 1, mode).unwrap()
}

#[test]
fn test_same_padding_round_trips_to_input() {
    for stride in 1..=4 {
        for filter in 1..=5 {
            for in_size in 1..=6 {
                let out_size = in_size * stride;
                let p = pad_1d(stride, filter, in_size, out_size, Padding::Same);
                let total = 2 * p.height + p.height_offset;
                assert_eq!(
                    forward_extent(out_size, total, filter, stride),
                    in_size,
                    "stride {} filter {} in {}",
                    stride,
                    filter,
                    in_size
                );
            }
        }
    }
}

#[test]
fn test_valid_padding_round_trips_to_input() {
    for stride in 1..=4 {
        for filter in 1..=5 {
            for in_size in 1..=6 {
                // every output the forward pass reduces back to `in_size`
                let smallest = (in_size - 1) * stride + filter;
                for out_size in smallest..smallest + stride {
                    let p = pad_1d(stride, filter, in_size, out_size, Padding::Valid);
                    assert_eq!(p, PaddingValues::default());
                    assert_eq!(
                        forward_extent(out_size, 0, filter, stride),
                        in_size,
                        "stride {} filter {} in {} out {}",
                        stride,
                        filter,
                        in_size,
                        out_size
                    );
                }
            }
        }
    }
}

#[test]
fn test_same_padding_values() {
    // 2x2 input, 3x3 filter, stride 1, 4x4 output
    let p = compute_padding(1, 1, 3, 3, 2, 2, 4, 4, Padding::Same).unwrap();
    assert_eq!((p.height, p.width), (1, 1));
    assert_eq!((p.height_offset, p.width_offset), (0, 0));

    // stride 2, 3x3 filter, 2x2 -> 4x4: one unit of padding on the trailing edge
    let p = compute_padding(2, 2, 3, 3, 2, 2, 4, 4, Padding::Same).unwrap();
    assert_eq!((p.height, p.width), (0, 0));
    assert_eq!((p.height_offset, p.width_offset), (1, 1));
}

#[test]
fn test_forward_out_size() {
    assert_eq!(forward_out_size(Padding::Same, 7, 3, 2), Some(4));
    assert_eq!(forward_out_size(Padding::Valid, 7, 3, 2), Some(3));
    assert_eq!(forward_out_size(Padding::Valid, 2, 3, 1), None);
}

#[test]
fn test_untiled_outputs_need_no_padding() {
    // (6 - 3) is not a multiple of stride 2; the trailing row is never read
    let p = compute_padding(2, 1, 3, 1, 2, 1, 6, 1, Padding::Valid).unwrap();
    assert_eq!(p, PaddingValues::default());

    // 1x1 stride-2 upsampling
    let p = compute_padding(2, 2, 1, 1, 2, 2, 4, 4, Padding::Same).unwrap();
    assert_eq!(p, PaddingValues::default());

    let p = compute_padding(1, 3, 1, 1, 1, 1, 1, 3, Padding::Same).unwrap();
    assert_eq!(p, PaddingValues::default());
}

#[test]
fn test_valid_output_narrower_than_filter_is_rejected() {
    let err = compute_padding(1, 1, 3, 3, 1, 1, 2, 2, Padding::Valid).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(matches!(
        err,
        TransposeConvError::InfeasiblePadding {
            axis: "height",
            stride: 1,
            filter: 3,
            output: 2
        }
    ));

    let err = compute_padding(2, 2, 1, 4, 2, 1, 4, 3, Padding::Valid).unwrap_err();
    assert!(matches!(err, TransposeConvError::InfeasiblePadding { axis: "width", .. }));
}

#[test]
fn test_zero_stride_is_rejected() {
    let err = compute_padding(0, 1, 3, 3, 2, 2, 4, 4, Padding::Same).unwrap_err();
    assert!(matches!(err, TransposeConvError::ZeroStride { axis: "height" }));
}
