use matrixmultiply::sgemm;

/// `out[M×N] = a[M×K] × bᵀ` where `b` is row-major `[N, K]`.
///
/// The transpose is folded into the strides handed to `sgemm`, so the
/// filter is consumed in its stored `[Cout, FH·FW·Cin]` layout.
pub fn gemm_nt(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
    assert_eq!(a.len(), m * k, "Gemm lhs size mismatch");
    assert_eq!(b.len(), n * k, "Gemm rhs size mismatch");
    assert_eq!(out.len(), m * n, "Gemm output size mismatch");
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        out.fill(0.0);
        return;
    }
    unsafe {
        sgemm(
            m,
            k,
            n,
            1.0,
            a.as_ptr(),
            k as isize,
            1,
            b.as_ptr(),
            1,
            k as isize,
            0.0,
            out.as_mut_ptr(),
            n as isize,
            1,
        );
    }
}

/// Integer GEMM with zero-point offsets:
/// `out[i, j] = Σ_k (a[i, k] + a_offset) * (b[j, k] + b_offset)`.
///
/// `b` is row-major `[N, K]`. Accumulates in i32, wrapping on overflow like
/// the scatter kernel so both strategies stay bit-identical.
#[allow(clippy::too_many_arguments)]
pub fn gemm_nt_u8(
    a: &[u8],
    a_offset: i32,
    b: &[u8],
    b_offset: i32,
    m: usize,
    k: usize,
    n: usize,
    out: &mut [i32],
) {
    assert_eq!(a.len(), m * k, "Gemm lhs size mismatch");
    assert_eq!(b.len(), n * k, "Gemm rhs size mismatch");
    assert_eq!(out.len(), m * n, "Gemm output size mismatch");

    // Offset the rhs once; it is reused by every row.
    let b_adj: Vec<i32> = b.iter().map(|&v| v as i32 + b_offset).collect();
    let mut a_row = vec![0i32; k];
    for i in 0..m {
        for (dst, &v) in a_row.iter_mut().zip(&a[i * k..(i + 1) * k]) {
            *dst = v as i32 + a_offset;
        }
        let o_row = &mut out[i * n..(i + 1) * n];
        for (j, o) in o_row.iter_mut().enumerate() {
            let w_row = &b_adj[j * k..(j + 1) * k];
            *o = a_row
                .iter()
                .zip(w_row)
                .fold(0i32, |acc, (&x, &w)| acc.wrapping_add(x.wrapping_mul(w)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemm_nt_simple() {
        // a = [[1, 2, 3], [4, 5, 6]], b = [[7, 9, 11], [8, 10, 12]]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        let mut out = [0.0f32; 4];
        gemm_nt(&a, &b, 2, 3, 2, &mut out);
        assert_eq!(out, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_gemm_nt_u8_offsets() {
        let a = [10u8, 12, 14];
        let b = [1u8, 2, 3, 3, 3, 3];
        let mut out = [0i32; 2];
        gemm_nt_u8(&a, -10, &b, -3, 1, 3, 2, &mut out);
        // (0, 2, 4) · (-2, -1, 0) and (0, 2, 4) · (0, 0, 0)
        assert_eq!(out, [-2, 0]);
    }

    #[test]
    fn test_gemm_nt_u8_deep_reduction_wraps() {
        let k = 40_000;
        let a = vec![255u8; k];
        let b = vec![255u8; k];
        let mut out = [0i32; 1];
        gemm_nt_u8(&a, 0, &b, 0, 1, k, 1, &mut out);
        assert_eq!(out[0], (255i64 * 255 * k as i64) as i32);
    }

    #[test]
    fn test_gemm_nt_empty_inner_dim() {
        let mut out = [7.0f32; 2];
        gemm_nt(&[], &[], 1, 0, 2, &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }
}
