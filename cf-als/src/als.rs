//! The per-row ALS solve: densify a row's observations, build the
//! regularized normal system, solve it by CG.

use crate::cg::{cg_solve_with, CgScratch};
use crate::embedding::Obs;
use cf_simd::{add_eye, gather_rows, prod_vector, stride, syrk_transpose, transpose, AMat, AVec};
use itertools::izip;
use serde::{Deserialize, Serialize};

/// Flat parameters for a training run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AlsParams {
    /// Ridge term added to the Gram diagonal. Must be positive: it is both
    /// the model's regularizer and what makes the normal system SPD.
    pub lambda: f32,

    /// Squared-residual tolerance for the per-row CG solves.
    #[serde(default = "default_eps")]
    pub eps: f32,
}

fn default_eps() -> f32 {
    1e-8
}

impl Default for AlsParams {
    fn default() -> Self {
        Self {
            lambda: 0.01,
            eps: default_eps(),
        }
    }
}

/// Per-worker buffers for row solves, sized once for the worst row of the
/// half-iteration and reshaped per row, so the hot loop does not allocate.
pub struct Scratch {
    idx: Vec<u32>,
    x: AMat,
    xt: AMat,
    ratings: AVec,
    gram: AMat,
    rhs: AVec,
    y: AVec,
    cg: CgScratch,
}

impl Scratch {
    /// Scratch for rows with up to `max_m` observations at latent dimension `k`.
    pub fn new(max_m: usize, k: usize) -> Self {
        Self {
            idx: Vec::with_capacity(max_m),
            x: AMat::zeroed(max_m, k),
            xt: AMat::zeroed(k, max_m),
            ratings: AVec::zeroed(max_m),
            gram: AMat::zeroed(k, k),
            rhs: AVec::zeroed(k),
            y: AVec::zeroed(k),
            cg: CgScratch::new(k),
        }
    }
}

/// Re-solve one row of the active factor against the fixed partner factor.
///
/// `row` is the padded factor row (stride width); its current value warm
/// starts CG. The observations' partner rows are gathered into the dense
/// design matrix `X` and the ratings into `r`; the normal system
/// `A = XᵀX + λI`, `b = Xᵀr` is then built from the transposed design
/// matrix, and `A·y = b` is solved in place of the row.
///
/// A row with no observations reduces to `A = λI`, `b = 0` and comes back as
/// the zero vector.
pub fn als_update_row(
    row: &mut [f32],
    partner: &AMat,
    obs: &[Obs],
    params: &AlsParams,
    s: &mut Scratch,
) {
    let k = partner.cols();
    assert_eq!(row.len(), stride(k));
    let m = obs.len();

    s.idx.clear();
    s.idx.extend(obs.iter().map(|o| o.partner));
    s.x.reset(m, k);
    gather_rows(partner, &s.idx, &mut s.x);
    s.ratings.reset(m);
    for (slot, o) in izip!(&mut s.ratings.as_mut_slice()[..m], obs) {
        *slot = o.rating;
    }

    s.xt.reset(k, m);
    transpose(&s.x, &mut s.xt);
    s.gram.reset(k, k);
    syrk_transpose(&s.xt, &mut s.gram);
    add_eye(&mut s.gram, params.lambda);
    s.rhs.reset(k);
    prod_vector(&s.xt, &s.ratings, &mut s.rhs);

    s.y.as_mut_slice().copy_from_slice(row);
    cg_solve_with(&s.gram, &mut s.y, &s.rhs, params.eps, &mut s.cg);
    row.copy_from_slice(s.y.as_slice());
}
