//! Hand-vectorized single-precision kernels for the ALS trainer core.
//!
//! Everything operates on 32-byte-aligned, row-padded storage ([`AVec`],
//! [`AMat`]): rows are padded to a multiple of [`WIDTH`] lanes so kernels
//! always load full SIMD chunks, and a single masked chunk handles the
//! `n % 8` tail of each dimension. Kernels must not observe padding lanes,
//! and must not write non-zero values into them.
#![feature(portable_simd, test)]

mod buffer;
mod matrix;
mod vector;

pub use buffer::{stride, AMat, AVec};
pub use matrix::{
    add_eye, gather_rows, invert, prod_vector, sub_prod_vector, syrk_transpose, transpose,
    SingularMatrix,
};
pub use vector::{diff_norm2, dot, weighted_add};

use std::simd::prelude::*;

/// The number of f32 lanes in one SIMD chunk (a 256-bit vector).
pub const WIDTH: usize = 8;

/// One SIMD chunk of f32 lanes.
pub type S = Simd<f32, WIDTH>;

/// The mask type matching one chunk of f32 lanes.
pub type M8 = Mask<i32, WIDTH>;

/// Lane indices `0..8`, compared against bounds to build masks.
const LANE_IDX: Simd<i32, WIDTH> = Simd::from_array([0, 1, 2, 3, 4, 5, 6, 7]);

/// Mask of lanes `j` with `base + j < len`.
///
/// The one place tail masks are made; every kernel's final partial chunk goes
/// through here.
#[inline(always)]
pub fn lane_mask(base: usize, len: usize) -> M8 {
    (LANE_IDX + Simd::splat(base as i32)).simd_lt(Simd::splat(len as i32))
}

/// Mask for the final chunk of a length-`len` dimension.
#[inline(always)]
pub fn tail_mask(len: usize) -> M8 {
    lane_mask(len / WIDTH * WIDTH, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_mask_all_residues() {
        // Every `len % 8` class, with the chunk base both at and below the end.
        for len in 0..=2 * WIDTH + 1 {
            for base in (0..=len).step_by(WIDTH) {
                let m = lane_mask(base, len);
                for j in 0..WIDTH {
                    assert_eq!(m.test(j), base + j < len, "len={len} base={base} lane={j}");
                }
            }
        }
    }

    #[test]
    fn tail_mask_matches_lane_mask() {
        for len in 0..=3 * WIDTH {
            let base = len / WIDTH * WIDTH;
            assert_eq!(tail_mask(len), lane_mask(base, len), "len={len}");
        }
        // A dimension ending exactly on a chunk boundary leaves nothing for
        // the masked chunk; kernels skip it in that case.
        assert!(!tail_mask(WIDTH).any());
        assert!(!tail_mask(0).any());
    }
}

#[cfg(test)]
mod bench {
    extern crate test;
    use crate::*;
    use test::Bencher;

    fn vec_of(n: usize) -> AVec {
        let mut v = AVec::zeroed(n);
        for (i, x) in v.as_mut_slice()[..n].iter_mut().enumerate() {
            *x = (i % 17) as f32 * 0.25 - 2.0;
        }
        v
    }

    fn mat_of(rows: usize, cols: usize) -> AMat {
        let mut m = AMat::zeroed(rows, cols);
        for i in 0..rows {
            for (j, x) in m.row_mut(i)[..cols].iter_mut().enumerate() {
                *x = ((i * 31 + j) % 13) as f32 * 0.125 - 0.75;
            }
        }
        m
    }

    #[bench]
    fn dot_1024(bench: &mut Bencher) {
        let a = vec_of(1024);
        let b = vec_of(1024);
        bench.iter(|| dot(&a, &b, 1024));
    }

    #[bench]
    fn prod_vector_256x256(bench: &mut Bencher) {
        let m = mat_of(256, 256);
        let v = vec_of(256);
        let mut out = AVec::zeroed(256);
        bench.iter(|| prod_vector(&m, &v, &mut out));
    }

    #[bench]
    fn syrk_64x256(bench: &mut Bencher) {
        let m = mat_of(64, 256);
        let mut out = AMat::zeroed(64, 64);
        bench.iter(|| syrk_transpose(&m, &mut out));
    }

    #[bench]
    fn transpose_256x100(bench: &mut Bencher) {
        let m = mat_of(256, 100);
        let mut out = AMat::zeroed(100, 256);
        bench.iter(|| transpose(&m, &mut out));
    }
}
