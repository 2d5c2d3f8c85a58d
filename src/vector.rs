/// Squared Euclidean distance between two equal-length vectors.
///
/// Returns the SQUARED distance to avoid a sqrt() per candidate; ordering
/// is preserved, callers take the root once when building results.
///
/// Unrolling 8 lanes lets LLVM pack the accumulation into AVX2 YMM
/// registers without exhausting register pressure on older hardware.
///
/// Callers must check dimensions first; slices of unequal length are a
/// contract violation (debug-asserted, never partially compared).
#[inline(always)]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut sum = 0.0;

    let chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let remainder_start = a.len() - a.len() % 8;

    for (ac, bc) in chunks.zip(b_chunks) {
        let d0 = ac[0] - bc[0];
        let d1 = ac[1] - bc[1];
        let d2 = ac[2] - bc[2];
        let d3 = ac[3] - bc[3];
        let d4 = ac[4] - bc[4];
        let d5 = ac[5] - bc[5];
        let d6 = ac[6] - bc[6];
        let d7 = ac[7] - bc[7];

        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3
            + d4 * d4 + d5 * d5 + d6 * d6 + d7 * d7;
    }

    for i in remainder_start..a.len() {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }

    sum
}

/// L2 norm of a vector.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
