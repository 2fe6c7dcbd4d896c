pub fn ensure_capacity<T: Copy + Default>(v: &mut Vec<T>, len: usize) {
    if v.len() != len {
        v.clear();
        v.resize(len, T::default());
    }
}
/// Row-major offset of `(n, y, x, c)` in a buffer of extents `dims`.
#[inline(always)]
pub fn offset4(dims: &[usize; 4], n: usize, y: usize, x: usize, c: usize) -> usize {
    ((n * dims[1] + y) * dims[2] + x) * dims[3] + c
}
/// Maps a scattered output coordinate into `[0, extent)`, or `None` if it falls outside.
#[inline(always)]
pub fn in_bounds(pos: isize, extent: usize) -> Option<usize> {
    if pos >= 0 && (pos as usize) < extent {
        Some(pos as usize)
    } else {
        None
    }
}
pub fn num_elements(dims: &[usize]) -> usize {
    dims.iter().product()
}
/// Element count of `dims`, or `None` if it overflows `usize`.
pub fn checked_num_elements(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}
