//! Factor arenas and their observation lists.

use cf_simd::AMat;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One observed rating for a row: the partner row it was rated against and
/// the rating itself. Partner rows are plain indices into the other side's
/// arena; no pointers between the two sides are ever materialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obs {
    pub partner: u32,
    pub rating: f32,
}

/// One side of the factorization: latent vectors for `n` entities plus, per
/// entity, the list of ratings observed against the partner side.
///
/// Observation lists are append-only during ingestion and read-only once
/// training starts; the factor matrix is the only thing training mutates.
pub struct Embedding {
    factors: AMat,
    obs: Vec<Vec<Obs>>,
    k: usize,
}

impl Embedding {
    /// `n` zero-initialized factor rows of latent dimension `k`.
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            factors: AMat::zeroed(n, k),
            obs: vec![Vec::new(); n],
            k,
        }
    }

    pub fn len(&self) -> usize {
        self.obs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Record that `row` was rated `rating` against partner row `partner`.
    pub fn add_rated(&mut self, row: usize, partner: u32, rating: f32) {
        self.obs[row].push(Obs { partner, rating });
    }

    pub fn obs(&self, row: usize) -> &[Obs] {
        &self.obs[row]
    }

    /// The longest observation list, which sizes per-worker scratch.
    pub fn max_obs(&self) -> usize {
        self.obs.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Seeded uniform init of the factor values; padding lanes stay zero.
    pub fn init_random(&mut self, seed: u64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let k = self.k;
        for i in 0..self.factors.rows() {
            for x in &mut self.factors.row_mut(i)[..k] {
                *x = rng.gen_range(0.0..1.0);
            }
        }
    }

    pub fn factors(&self) -> &AMat {
        &self.factors
    }

    pub fn factors_mut(&mut self) -> &mut AMat {
        &mut self.factors
    }

    /// Split borrow for the half-iteration driver: mutable factors, shared
    /// observation lists.
    pub fn parts_mut(&mut self) -> (&mut AMat, &[Vec<Obs>]) {
        (&mut self.factors, &self.obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_keep_ingestion_order() {
        let mut e = Embedding::new(2, 3);
        e.add_rated(0, 5, 1.0);
        e.add_rated(0, 2, 4.0);
        e.add_rated(1, 0, 3.0);
        assert_eq!(
            e.obs(0),
            &[Obs { partner: 5, rating: 1.0 }, Obs { partner: 2, rating: 4.0 }]
        );
        assert_eq!(e.max_obs(), 2);
    }

    #[test]
    fn init_random_is_seeded_and_keeps_padding() {
        let mut a = Embedding::new(3, 5);
        let mut b = Embedding::new(3, 5);
        a.init_random(9);
        b.init_random(9);
        assert_eq!(a.factors().as_slice(), b.factors().as_slice());
        for i in 0..3 {
            assert!(a.factors().row(i)[..5].iter().all(|&x| (0.0..1.0).contains(&x)));
            assert!(a.factors().row(i)[5..].iter().all(|&x| x == 0.0));
        }
    }
}
