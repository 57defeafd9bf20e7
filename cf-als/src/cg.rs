//! Conjugate gradients for the K×K normal systems.

use cf_simd::{dot, prod_vector, sub_prod_vector, weighted_add, AMat, AVec};

/// Work vectors for one CG solve, reused across row solves.
pub struct CgScratch {
    r: AVec,
    p: AVec,
    t: AVec,
}

impl CgScratch {
    pub fn new(n: usize) -> Self {
        Self {
            r: AVec::zeroed(n),
            p: AVec::zeroed(n),
            t: AVec::zeroed(n),
        }
    }
}

/// Solve `A·x = b` in place in `x`, for symmetric positive-definite `A`.
///
/// `x` is the starting guess; the row solver passes the previous embedding
/// row to warm start. `eps` is a squared-residual tolerance: the loop exits
/// once `⟨r,r⟩ ≤ eps`. A non-SPD `A` violates the contract and gives
/// meaningless results.
pub fn cg_solve(a: &AMat, x: &mut AVec, b: &AVec, eps: f32) {
    cg_solve_with(a, x, b, eps, &mut CgScratch::new(a.rows()))
}

/// [`cg_solve`] with caller-owned work vectors.
pub fn cg_solve_with(a: &AMat, x: &mut AVec, b: &AVec, eps: f32, s: &mut CgScratch) {
    let n = a.rows();
    assert_eq!(a.cols(), n);
    assert_eq!(x.len(), n);
    assert_eq!(b.len(), n);
    assert_eq!(s.r.len(), n);

    sub_prod_vector(b, a, x, &mut s.r);
    s.p.as_mut_slice().copy_from_slice(s.r.as_slice());
    let mut rho = dot(&s.r, &s.r, n);

    // In exact arithmetic CG lands on the solution within n steps; the cap
    // turns a non-SPD or zero-tolerance call into a bounded one.
    for _ in 0..n {
        if rho <= eps {
            break;
        }
        prod_vector(a, &s.p, &mut s.t);
        let alpha = rho / dot(&s.p, &s.t, n);
        weighted_add(x, 1.0, &s.p, alpha, n);
        weighted_add(&mut s.r, 1.0, &s.t, -alpha, n);
        let next = dot(&s.r, &s.r, n);
        let beta = next / rho;
        // p ← r + β·p: scale the old direction, keep the residual whole.
        weighted_add(&mut s.p, beta, &s.r, 1.0, n);
        rho = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_simd::{add_eye, syrk_transpose};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn solves_2x2() {
        let a = AMat::from_fn(2, 2, |i, j| [[4., 1.], [1., 3.]][i][j]);
        let b = AVec::from_slice(&[1., 2.]);
        let mut x = AVec::zeroed(2);
        cg_solve(&a, &mut x, &b, 1e-12);
        assert!((x.as_slice()[0] - 1.0 / 11.0).abs() <= 1e-5, "{:?}", x.as_slice());
        assert!((x.as_slice()[1] - 7.0 / 11.0).abs() <= 1e-5, "{:?}", x.as_slice());
    }

    #[test]
    fn exact_within_n_iterations() {
        let rng = &mut ChaCha8Rng::seed_from_u64(6283);
        for n in [2, 3, 8, 16, 33, 64] {
            // SPD by construction: B·Bᵀ + I.
            let m = AMat::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
            let mut a = AMat::zeroed(n, n);
            syrk_transpose(&m, &mut a);
            add_eye(&mut a, 1.0);
            let b = AVec::from_slice(&(0..n).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<_>>());
            let mut x = AVec::zeroed(n);
            // ε = 0 runs the full n capped steps.
            cg_solve(&a, &mut x, &b, 0.0);
            let mut r = AVec::zeroed(n);
            sub_prod_vector(&b, &a, &x, &mut r);
            let res = dot(&r, &r, n);
            let bb = dot(&b, &b, n);
            assert!(res <= 1e-4 * bb, "n={n}: |r|²={res} |b|²={bb}");
        }
    }

    #[test]
    fn zero_rhs_zero_guess_exits_immediately() {
        let mut a = AMat::zeroed(3, 3);
        add_eye(&mut a, 2.0);
        let b = AVec::zeroed(3);
        let mut x = AVec::zeroed(3);
        cg_solve(&a, &mut x, &b, 0.0);
        assert!(x.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn solved_warm_start_is_untouched() {
        let mut a = AMat::zeroed(2, 2);
        add_eye(&mut a, 2.0);
        let b = AVec::from_slice(&[2.0, 4.0]);
        let mut x = AVec::from_slice(&[1.0, 2.0]);
        cg_solve(&a, &mut x, &b, 1e-10);
        assert_eq!(&x.as_slice()[..2], &[1.0, 2.0]);
    }
}
