//! Fan-out of the per-row solves over the worker pool.

use crate::als::{als_update_row, AlsParams, Scratch};
use crate::embedding::Embedding;
use rayon::prelude::*;

const DEBUG: bool = false;

/// Set the process-wide worker-pool size.
///
/// One-shot initialization-time setting: call it before the first parallel
/// region; once the pool is live it errors. Without it the pool defaults to
/// hardware concurrency.
pub fn set_worker_count(threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()
}

/// One half-iteration: re-solve every row of `active` against the fixed
/// `partner` factor.
///
/// Workers receive disjoint `&mut` row slices, so the no-locking row
/// partition is enforced by the borrow checker; the partner factor is shared
/// read-only. Scheduling is dynamic work-stealing with one [`Scratch`] per
/// worker split. Returns only after every row is done; that return is the
/// barrier the next half-iteration relies on.
pub fn update(active: &mut Embedding, partner: &Embedding, params: &AlsParams) {
    let k = active.k();
    assert_eq!(k, partner.k());
    let max_m = active.max_obs();
    let g = partner.factors();
    let (f, obs) = active.parts_mut();
    let stride = f.stride();
    if DEBUG {
        eprintln!("half-iteration: {} rows, k={k}, max_m={max_m}", obs.len());
    }
    f.as_mut_slice()
        .par_chunks_exact_mut(stride)
        .zip(obs.par_iter())
        .for_each_init(
            || Scratch::new(max_m, k),
            |scratch, (row, obs)| als_update_row(row, g, obs, params, scratch),
        );
}
