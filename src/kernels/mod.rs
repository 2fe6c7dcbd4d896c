pub mod gemm;
pub mod im2col;
pub mod padding;
pub mod quantization;
pub mod transpose_conv;
pub mod utils;
pub use gemm::{gemm_nt, gemm_nt_u8};
pub use im2col::{im2col_shape, transpose_im2col};
pub use padding::{compute_padding, forward_out_size, Padding, PaddingValues};
pub use quantization::*;
pub use transpose_conv::*;
