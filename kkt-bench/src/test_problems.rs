//! Synthetic MPC problems for timing the kernel.

use kkt_core::MpcProblem;
use nalgebra::DMatrix;

/// Simple LCG random number generator in [0, 1).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((self.0 >> 33) as f64) / (u32::MAX as f64)
    }
}

/// Linearized hover model: 12 states, 4 rotor inputs, input box constraints.
pub fn quadrotor(horizon: usize) -> MpcProblem {
    let (nx, nu, dt) = (12, 4, 0.02);

    let mut a = DMatrix::identity(nx, nx);
    for i in 0..6 {
        a[(i, i + 6)] = dt;
    }
    // small-angle coupling of attitude into horizontal acceleration
    a[(6, 4)] = 9.81 * dt;
    a[(7, 3)] = -9.81 * dt;

    let mix = DMatrix::from_row_slice(
        4,
        4,
        &[
            1.0, 1.0, 1.0, 1.0, //
            -1.0, 1.0, -1.0, 1.0, //
            1.0, -1.0, -1.0, 1.0, //
            0.5, 0.5, -0.5, -0.5,
        ],
    );
    let mut b = DMatrix::zeros(nx, nu);
    b.view_mut((8, 0), (4, 4)).copy_from(&(mix * dt));

    let mut q = DMatrix::identity(nx, nx);
    for i in 0..3 {
        q[(i, i)] = 100.0;
    }

    MpcProblem {
        horizon,
        Qf: Some(&q * 10.0),
        Q: q,
        R: DMatrix::from_diagonal_element(nu, nu, 0.1),
        A: a,
        B: b,
        Gx: DMatrix::zeros(2 * nu, nx),
        Gu: box_rows(nu),
    }
}

/// Random stable system with box constraints on every input and on the
/// first half of the states.
pub fn random_mpc(nx: usize, nu: usize, horizon: usize, seed: u64) -> MpcProblem {
    let mut rng = Lcg(seed);

    // diagonal-dominant A keeps the system well conditioned
    let a = DMatrix::from_fn(nx, nx, |i, j| {
        let v = 0.2 * (rng.next() - 0.5);
        if i == j {
            0.9 + v
        } else if rng.next() < 0.3 {
            v
        } else {
            0.0
        }
    });
    let b = DMatrix::from_fn(nx, nu, |_, _| if rng.next() < 0.5 { rng.next() - 0.5 } else { 0.0 });

    let q_diag: Vec<f64> = (0..nx).map(|_| 0.5 + rng.next()).collect();
    let q = DMatrix::from_fn(nx, nx, |i, j| if i == j { q_diag[i] } else { 0.0 });
    let r = DMatrix::from_diagonal_element(nu, nu, 0.1 + rng.next());

    let bounded = nx / 2;
    let ni = 2 * nu + 2 * bounded;
    let mut gx = DMatrix::zeros(ni, nx);
    let mut gu = DMatrix::zeros(ni, nu);
    gu.view_mut((0, 0), (2 * nu, nu)).copy_from(&box_rows(nu));
    for i in 0..bounded {
        gx[(2 * nu + i, i)] = 1.0;
        gx[(2 * nu + bounded + i, i)] = -1.0;
    }

    MpcProblem {
        horizon,
        Q: q,
        R: r,
        Qf: None,
        A: a,
        B: b,
        Gx: gx,
        Gu: gu,
    }
}

/// `[I; -I]`
fn box_rows(n: usize) -> DMatrix<f64> {
    let mut g = DMatrix::zeros(2 * n, n);
    for i in 0..n {
        g[(i, i)] = 1.0;
        g[(n + i, i)] = -1.0;
    }
    g
}

/// Interior-point weights for a given iteration, all strictly positive.
pub fn weights(len: usize, iteration: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg(seed ^ (iteration as u64).wrapping_mul(0x9E3779B97F4A7C15));
    // weights spread out as the method approaches the boundary
    let spread = 1.0 + iteration as f64;
    (0..len).map(|_| (spread * (2.0 * rng.next() - 1.0)).exp()).collect()
}

/// Right-hand side in natural order.
pub fn rhs(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg(seed.wrapping_add(17));
    (0..n).map(|_| 2.0 * rng.next() - 1.0).collect()
}
