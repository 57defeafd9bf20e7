//! 1-D kernels over aligned, tail-padded storage.
//!
//! Each kernel runs over full 8-lane chunks and finishes with one masked
//! chunk for the `n % 8` tail, so padded slots never contribute, not even
//! when a caller has left garbage in them.

use crate::{tail_mask, AVec, S, WIDTH};
use itertools::izip;
use std::simd::prelude::*;
use std::simd::StdFloat;

/// Dot product over the first `n` lanes of `a` and `b`.
///
/// Accumulation is lane-parallel FMA followed by a horizontal tree
/// reduction, not strict left-to-right.
pub fn dot(a: &AVec, b: &AVec, n: usize) -> f32 {
    assert!(n <= a.len() && n <= b.len());
    dot_lanes(a.lanes(), b.lanes(), n)
}

/// `dot` on raw lane groups; shared with the row-wise matrix kernels.
#[inline(always)]
pub(crate) fn dot_lanes(a: &[[f32; WIDTH]], b: &[[f32; WIDTH]], n: usize) -> f32 {
    let full = n / WIDTH;
    let mut sum = S::splat(0.0);
    for (ca, cb) in izip!(&a[..full], &b[..full]) {
        sum = S::from_array(*ca).mul_add(S::from_array(*cb), sum);
    }
    if n % WIDTH != 0 {
        // Both operands masked: a poisoned tail lane of either side would
        // otherwise leak NaN through the product.
        let m = tail_mask(n);
        let ca = m.select(S::from_array(a[full]), S::splat(0.0));
        let cb = m.select(S::from_array(b[full]), S::splat(0.0));
        sum = ca.mul_add(cb, sum);
    }
    sum.reduce_sum()
}

/// Σ (aᵢ − bᵢ)² over the first `n` lanes. Same accumulation semantics as [`dot`].
pub fn diff_norm2(a: &AVec, b: &AVec, n: usize) -> f32 {
    assert!(n <= a.len() && n <= b.len());
    let full = n / WIDTH;
    let (al, bl) = (a.lanes(), b.lanes());
    let mut sum = S::splat(0.0);
    for (ca, cb) in izip!(&al[..full], &bl[..full]) {
        let d = S::from_array(*ca) - S::from_array(*cb);
        sum = d.mul_add(d, sum);
    }
    if n % WIDTH != 0 {
        let m = tail_mask(n);
        let ca = m.select(S::from_array(al[full]), S::splat(0.0));
        let cb = m.select(S::from_array(bl[full]), S::splat(0.0));
        let d = ca - cb;
        sum = d.mul_add(d, sum);
    }
    sum.reduce_sum()
}

/// `a = wa·a + wb·b` over the first `n` lanes, in place.
///
/// The in-place form is what CG needs everywhere (`x += α·p`, `r −= α·t`,
/// `p ← β·p + r`); the scaled operand is always the mutated one, so the
/// caller cannot get the recurrence's operand order wrong. The tail chunk is
/// written through a mask and `a`'s padding keeps whatever it held.
pub fn weighted_add(a: &mut AVec, wa: f32, b: &AVec, wb: f32, n: usize) {
    assert!(n <= a.len() && n <= b.len());
    let full = n / WIDTH;
    let has_tail = n % WIDTH != 0;
    let (wa, wb) = (S::splat(wa), S::splat(wb));
    let bl = b.lanes();
    for (ca, cb) in izip!(&mut a.lanes_mut()[..full], &bl[..full]) {
        let r = wa * S::from_array(*ca) + wb * S::from_array(*cb);
        *ca = r.to_array();
    }
    if has_tail {
        let m = tail_mask(n);
        let ca = S::from_array(a.lanes()[full]);
        let cb = S::from_array(bl[full]);
        let r = wa * ca + wb * cb;
        a.lanes_mut()[full] = m.select(r, ca).to_array();
    }
}
