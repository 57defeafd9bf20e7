//! 2-D kernels: transpose, row gather, matrix·vector, the symmetric product
//! and the dense reference inverse.
//!
//! All kernels work on an 8×8 block/tile grid. Boundary tiles read zeros for
//! out-of-range lanes; where a full-width store would cross the logical edge
//! it either targets padding (which is specified to hold zeros) or goes
//! through a mask.

use crate::vector::dot_lanes;
use crate::{lane_mask, tail_mask, AMat, AVec, M8, S, WIDTH};
use itertools::izip;
use rayon::prelude::*;
use std::array::from_fn;
use std::simd::Select;
use std::simd::StdFloat;

/// Transpose an 8×8 tile held in registers.
///
/// Three rounds of the perfect-shuffle network: each round rotates one row
/// bit into the lane index and one lane bit out, so after three rounds the
/// row and lane indices have traded places.
#[inline(always)]
fn transpose8x8(v: [S; WIDTH]) -> [S; WIDTH] {
    let mut v = v;
    for _ in 0..3 {
        let mut w = [S::splat(0.0); WIDTH];
        for i in 0..WIDTH / 2 {
            let (lo, hi) = v[i].interleave(v[i + WIDTH / 2]);
            w[2 * i] = lo;
            w[2 * i + 1] = hi;
        }
        v = w;
    }
    v
}

/// Horizontal sums of 8 accumulators at once: lane `j` of the result is the
/// sum of the lanes of `v[j]`.
#[inline(always)]
fn hsum8(v: [S; WIDTH]) -> S {
    transpose8x8(v).into_iter().fold(S::splat(0.0), |acc, x| acc + x)
}

/// `dst = srcᵀ`.
///
/// Tiles are transposed in registers; boundary tiles read zeros for
/// out-of-range input lanes and write only in-range output lanes.
pub fn transpose(src: &AMat, dst: &mut AMat) {
    assert_eq!(src.rows(), dst.cols());
    assert_eq!(src.cols(), dst.rows());
    let (rows, cols) = (src.rows(), src.cols());
    for br in (0..rows).step_by(WIDTH) {
        let out_mask = lane_mask(br, rows);
        for bc in (0..cols).step_by(WIDTH) {
            let in_mask = lane_mask(bc, cols);
            let tile: [S; WIDTH] = from_fn(|i| {
                if br + i < rows {
                    in_mask.select(S::from_array(src.row_lanes(br + i)[bc / WIDTH]), S::splat(0.0))
                } else {
                    S::splat(0.0)
                }
            });
            let t = transpose8x8(tile);
            for (i, lanes) in t.iter().enumerate().take(cols - bc) {
                let out = &mut dst.row_lanes_mut(bc + i)[br / WIDTH];
                *out = out_mask.select(*lanes, S::from_array(*out)).to_array();
            }
        }
    }
}

/// Copy rows `f[idx[k]]` into `dst[k]`, full stride width (padding included).
///
/// Out-of-range indices are a caller error; the kernel does not validate
/// beyond the slice bounds check.
pub fn gather_rows(f: &AMat, idx: &[u32], dst: &mut AMat) {
    assert_eq!(dst.rows(), idx.len());
    assert_eq!(dst.cols(), f.cols());
    for (k, &i) in idx.iter().enumerate() {
        dst.row_mut(k).copy_from_slice(f.row(i as usize));
    }
}

/// `out = M·v`.
///
/// Rows go 8 at a time: 8 FMA accumulators run over the column chunks with a
/// masked final chunk, then the accumulator block is transposed in registers
/// and summed, producing the 8 outputs as one aligned store. In the last row
/// group that store spills zeros into `out`'s padding.
pub fn prod_vector(m: &AMat, v: &AVec, out: &mut AVec) {
    assert_eq!(m.cols(), v.len());
    assert_eq!(m.rows(), out.len());
    let (rows, cols) = (m.rows(), m.cols());
    let full = cols / WIDTH;
    let vl = v.lanes();
    for br in (0..rows).step_by(WIDTH) {
        let rlim = WIDTH.min(rows - br);
        let mut acc = [S::splat(0.0); WIDTH];
        for c in 0..full {
            let vc = S::from_array(vl[c]);
            for i in 0..rlim {
                acc[i] = S::from_array(m.row_lanes(br + i)[c]).mul_add(vc, acc[i]);
            }
        }
        if cols % WIDTH != 0 {
            let mask = tail_mask(cols);
            let vc = mask.select(S::from_array(vl[full]), S::splat(0.0));
            for i in 0..rlim {
                let mc = mask.select(S::from_array(m.row_lanes(br + i)[full]), S::splat(0.0));
                acc[i] = mc.mul_add(vc, acc[i]);
            }
        }
        out.lanes_mut()[br / WIDTH] = hsum8(acc).to_array();
    }
}

/// `out = s − M·v`, the residual form the CG loop starts from.
pub fn sub_prod_vector(s: &AVec, m: &AMat, v: &AVec, out: &mut AVec) {
    assert_eq!(m.cols(), v.len());
    assert_eq!(m.rows(), s.len());
    assert_eq!(m.rows(), out.len());
    let cols = m.cols();
    for i in 0..m.rows() {
        let p = dot_lanes(m.row_lanes(i), v.lanes(), cols);
        out.as_mut_slice()[i] = s.as_slice()[i] - p;
    }
}

/// Output base shared across the syrk workers.
///
/// Sound: the task for block `(bi, bj)`, `bj ≤ bi`, writes only blocks
/// `(bi, bj)` and `(bj, bi)`, and each block is written by exactly one task.
struct OutBase(*mut f32);
unsafe impl Send for OutBase {}
unsafe impl Sync for OutBase {}

impl OutBase {
    /// Store one 8-lane group at `(row, col)`; `col` must be chunk-aligned.
    #[inline(always)]
    unsafe fn store(&self, row: usize, col: usize, stride: usize, v: S) {
        unsafe { (self.0.add(row * stride + col) as *mut [f32; WIDTH]).write(v.to_array()) }
    }
}

/// `out = M·Mᵀ`, exactly symmetric.
///
/// The output is an 8×8 block grid; only blocks on or below the diagonal are
/// computed, and each off-diagonal block is mirrored with an in-register
/// transpose, so `out[i][j]` and `out[j][i]` hold the same bits. The blocks
/// are independent and are fanned out over the worker pool with dynamic
/// scheduling.
pub fn syrk_transpose(m: &AMat, out: &mut AMat) {
    assert_eq!(out.rows(), m.rows());
    assert_eq!(out.cols(), m.rows());
    let n = m.rows();
    if n == 0 {
        return;
    }
    let nb = n.div_ceil(WIDTH);
    let ostride = out.stride();
    let base = OutBase(out.as_mut_slice().as_mut_ptr());
    (0..nb * nb).into_par_iter().for_each(|l| {
        let (bi, bj) = (l / nb, l % nb);
        if bj <= bi {
            syrk_block(m, bi, bj, &base, ostride);
        }
    });
}

fn syrk_block(m: &AMat, bi: usize, bj: usize, out: &OutBase, ostride: usize) {
    let n = m.rows();
    let cols = m.cols();
    let full = cols / WIDTH;
    let (ri, rj) = (bi * WIDTH, bj * WIDTH);
    let ilim = WIDTH.min(n - ri);
    let jlim = WIDTH.min(n - rj);

    // One 8-row group of column chunk `c`; missing rows and masked-out lanes
    // read as zero.
    let load = |base: usize, lim: usize, c: usize, mask: Option<M8>| -> [S; WIDTH] {
        from_fn(|i| {
            if i >= lim {
                return S::splat(0.0);
            }
            let v = S::from_array(m.row_lanes(base + i)[c]);
            match mask {
                Some(mk) => mk.select(v, S::splat(0.0)),
                None => v,
            }
        })
    };

    // d[i] lane j = ⟨row ri+i, row rj+j⟩.
    let mut d = [S::splat(0.0); WIDTH];
    let mut accumulate = |a: [S; WIDTH], b: [S; WIDTH]| {
        for i in 0..WIDTH {
            let prod = from_fn(|j| a[i] * b[j]);
            d[i] += hsum8(prod);
        }
    };
    for c in 0..full {
        accumulate(load(ri, ilim, c, None), load(rj, jlim, c, None));
    }
    if cols % WIDTH != 0 {
        let mk = tail_mask(cols);
        accumulate(load(ri, ilim, full, Some(mk)), load(rj, jlim, full, Some(mk)));
    }

    // Lanes past the logical edge are zero in `d`, so the full-width stores
    // only ever put zeros into padding.
    unsafe {
        for i in 0..ilim {
            out.store(ri + i, rj, ostride, d[i]);
        }
        if bi != bj {
            let t = transpose8x8(d);
            for j in 0..jlim {
                out.store(rj + j, ri, ostride, t[j]);
            }
        }
    }
}

/// `m[i][i] += v`.
pub fn add_eye(m: &mut AMat, v: f32) {
    assert_eq!(m.rows(), m.cols());
    for i in 0..m.rows() {
        m.row_mut(i)[i] += v;
    }
}

/// Inversion failure: no usable pivot.
#[derive(Debug, thiserror::Error)]
#[error("matrix is singular to working precision")]
pub struct SingularMatrix;

/// `out = M⁻¹` by Gauss-Jordan elimination with partial pivoting.
///
/// Reference path for small K×K systems when a direct solve is preferred
/// over CG; scalar on purpose. On a singular input returns an error and
/// leaves `out` unspecified.
pub fn invert(m: &AMat, out: &mut AMat) -> Result<(), SingularMatrix> {
    let n = m.rows();
    assert_eq!(m.cols(), n);
    assert_eq!(out.rows(), n);
    assert_eq!(out.cols(), n);
    let mut a = m.clone();
    out.as_mut_slice().fill(0.0);
    for i in 0..n {
        out.row_mut(i)[i] = 1.0;
    }
    let mut apiv = vec![0.0f32; a.stride()];
    let mut opiv = vec![0.0f32; out.stride()];
    for col in 0..n {
        // Largest magnitude on or below the diagonal.
        let pivot = (col..n)
            .max_by(|&r, &s| a.row(r)[col].abs().total_cmp(&a.row(s)[col].abs()))
            .unwrap();
        if a.row(pivot)[col] == 0.0 {
            return Err(SingularMatrix);
        }
        a.swap_rows(col, pivot);
        out.swap_rows(col, pivot);
        let inv = 1.0 / a.row(col)[col];
        for x in a.row_mut(col) {
            *x *= inv;
        }
        for x in out.row_mut(col) {
            *x *= inv;
        }
        apiv.copy_from_slice(a.row(col));
        opiv.copy_from_slice(out.row(col));
        for r in 0..n {
            if r == col {
                continue;
            }
            let f = a.row(r)[col];
            if f == 0.0 {
                continue;
            }
            for (x, &p) in izip!(a.row_mut(r), &apiv) {
                *x -= f * p;
            }
            for (x, &p) in izip!(out.row_mut(r), &opiv) {
                *x -= f * p;
            }
        }
    }
    Ok(())
}
