//! Convolutional basis pursuit denoising: sparse coding of a signal
//! against a bank of convolutional dictionary atoms.

use ndarray::{ArrayD, Axis, IxDyn, Zip};
use rustfft::num_complex::Complex;

use crate::{
    error::{ConfigError, SolverError},
    linalg::{
        Precision, embed_at_origin, fftn, from_f64, ifftn_real, l1_norm, norm2, rel_residual_c,
        soft_threshold,
    },
    options::{AdmmOptions, AutoRhoOptions},
    problem::{AdmmSolver, PrimalSolution, ProblemOperator},
};

/// Options for [`ConvBpdn`].
#[derive(Debug, Clone)]
pub struct ConvBpdnOptions {
    /// Core iteration options.
    pub admm: AdmmOptions,
    /// Clamp negative coefficients to zero after each soft threshold.
    pub non_neg_coef: bool,
}

impl Default for ConvBpdnOptions {
    fn default() -> Self {
        Self {
            admm: AdmmOptions {
                max_main_iter: 150,
                g_eval_y: false,
                auto_rho: AutoRhoOptions::self_scaling(1000.0),
                ..AdmmOptions::default()
            },
            non_neg_coef: false,
        }
    }
}

impl ConvBpdnOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.admm.validate()
    }
}

/// Convolutional basis pursuit denoising.
///
/// Solves
///
/// ```text
/// minimize (1/2) || sum_m d_m * x_m - s ||_2^2 + lambda sum_m ||x_m||_1
/// ```
///
/// over coefficient maps `x_m`, one per dictionary atom, with `*` a
/// circular convolution over every signal axis. The dictionary carries its
/// atom index on the trailing axis (`d.ndim() == s.ndim() + 1`) and atoms
/// are zero-padded to the signal support at construction. The x-update
/// inverts `(d_hat d_hat^H + rho I)` independently per frequency bin by
/// the Sherman-Morrison identity, so its cost is linear in the number of
/// atoms.
pub struct ConvBpdn<T: Precision> {
    s: ArrayD<T>,
    lmbda: f64,
    non_neg_coef: bool,
    axes: Vec<usize>,
    coef_shape: Vec<usize>,
    df: ArrayD<Complex<T>>,
    dsf: ArrayD<Complex<T>>,
}

impl<T: Precision> ConvBpdn<T> {
    /// Builds the problem around a dictionary `d`, a signal `s`, and a
    /// regularization weight `lmbda`.
    pub fn new(
        d: &ArrayD<T>,
        s: ArrayD<T>,
        lmbda: f64,
        opts: &ConvBpdnOptions,
    ) -> Result<Self, SolverError> {
        opts.validate()?;
        if !lmbda.is_finite() || lmbda < 0.0 {
            return Err(ConfigError::NonNegative {
                name: "lmbda",
                value: lmbda,
            }
            .into());
        }
        if d.ndim() != s.ndim() + 1 {
            return Err(SolverError::DimensionMismatch {
                context: "dictionary",
                expected: s.shape().to_vec(),
                got: d.shape().to_vec(),
            });
        }
        for (&dd, &sd) in d.shape().iter().zip(s.shape().iter()) {
            if dd > sd {
                return Err(SolverError::DimensionMismatch {
                    context: "dictionary atom support",
                    expected: s.shape().to_vec(),
                    got: d.shape().to_vec(),
                });
            }
        }
        let natoms = d.shape()[d.ndim() - 1];
        if natoms == 0 {
            return Err(SolverError::DimensionMismatch {
                context: "dictionary",
                expected: s.shape().to_vec(),
                got: d.shape().to_vec(),
            });
        }

        let axes: Vec<usize> = (0..s.ndim()).collect();
        let mut coef_shape = s.shape().to_vec();
        coef_shape.push(natoms);
        let sf = fftn(&s, &axes);
        let atom_axis = Axis(d.ndim() - 1);
        let last = Axis(coef_shape.len() - 1);
        let mut df = ArrayD::<Complex<T>>::zeros(IxDyn(&coef_shape));
        let mut dsf = ArrayD::<Complex<T>>::zeros(IxDyn(&coef_shape));
        for m in 0..natoms {
            let atom = d.index_axis(atom_axis, m).to_owned();
            let af = fftn(&embed_at_origin(&atom, s.shape()), &axes);
            Zip::from(dsf.index_axis_mut(last, m))
                .and(&af)
                .and(&sf)
                .for_each(|o, &a, &sv| *o = a.conj() * sv);
            df.index_axis_mut(last, m).assign(&af);
        }
        Ok(Self {
            s,
            lmbda,
            non_neg_coef: opts.non_neg_coef,
            axes,
            coef_shape,
            df,
            dsf,
        })
    }

    /// Convenience constructor returning a ready solver.
    pub fn solver(
        d: &ArrayD<T>,
        s: ArrayD<T>,
        lmbda: f64,
        opts: ConvBpdnOptions,
    ) -> Result<AdmmSolver<T, Self>, SolverError> {
        let admm = opts.admm.clone();
        let problem = Self::new(d, s, lmbda, &opts)?;
        AdmmSolver::new(problem, admm)
    }

    /// Number of dictionary atoms.
    pub fn natoms(&self) -> usize {
        self.coef_shape[self.coef_shape.len() - 1]
    }

    /// Applies the forward model `sum_m d_m * x_m` to coefficient maps.
    pub fn reconstruct(&self, x: &ArrayD<T>) -> ArrayD<T> {
        let xf = fftn(x, &self.axes);
        let last = Axis(xf.ndim() - 1);
        let mut acc = ArrayD::<Complex<T>>::zeros(IxDyn(self.s.shape()));
        for m in 0..self.natoms() {
            Zip::from(&mut acc)
                .and(xf.index_axis(last, m))
                .and(self.df.index_axis(last, m))
                .for_each(|a, &v, &dv| *a = *a + dv * v);
        }
        ifftn_real(&acc, &self.axes)
    }
}

impl<T: Precision> ProblemOperator<T> for ConvBpdn<T> {
    fn primal_shape(&self) -> &[usize] {
        &self.coef_shape
    }

    fn default_rho(&self) -> f64 {
        50.0 * self.lmbda + 1.0
    }

    fn rsdl_target_default(&self) -> f64 {
        1.0 + 18.3f64.powf(self.lmbda.log10() + 1.0)
    }

    fn solve_primal(
        &self,
        _x_prev: &ArrayD<T>,
        y: &ArrayD<T>,
        u: &ArrayD<T>,
        rho: T,
        check: bool,
    ) -> Result<PrimalSolution<T>, SolverError> {
        let b = y - u;
        let bf = fftn(&b, &self.axes);
        let mut xf = Zip::from(&self.dsf)
            .and(&bf)
            .map_collect(|&ds, &v| ds + v * rho);
        let bhat = if check { Some(xf.clone()) } else { None };

        // rank-1 inversion per frequency bin: the system matrix is
        // rho I + conj(d) d^T, the normal matrix of the forward map d^T x
        let last = Axis(xf.ndim() - 1);
        for (dlane, mut xlane) in self.df.lanes(last).into_iter().zip(xf.lanes_mut(last)) {
            let mut dtb = Complex::new(T::zero(), T::zero());
            let mut dhd = T::zero();
            for (dv, xv) in dlane.iter().zip(xlane.iter()) {
                dtb = dtb + *dv * *xv;
                dhd = dhd + dv.norm_sqr();
            }
            let alpha = dtb / (rho + dhd);
            for (xv, dv) in xlane.iter_mut().zip(dlane.iter()) {
                *xv = (*xv - dv.conj() * alpha) / rho;
            }
        }

        let rel = bhat.map(|bh| {
            let mut applied = xf.clone();
            for (dlane, mut alane) in self.df.lanes(last).into_iter().zip(applied.lanes_mut(last))
            {
                let mut dtx = Complex::new(T::zero(), T::zero());
                for (dv, xv) in dlane.iter().zip(alane.iter()) {
                    dtx = dtx + *dv * *xv;
                }
                for (av, dv) in alane.iter_mut().zip(dlane.iter()) {
                    *av = dv.conj() * dtx + *av * rho;
                }
            }
            rel_residual_c(&applied, &bh)
        });
        Ok(PrimalSolution {
            x: ifftn_real(&xf, &self.axes),
            rel_residual: rel,
        })
    }

    fn prox(&self, v: &ArrayD<T>, rho: T) -> ArrayD<T> {
        let mut y = soft_threshold(v, from_f64::<T>(self.lmbda) / rho);
        if self.non_neg_coef {
            y.mapv_inplace(|x| x.max(T::zero()));
        }
        y
    }

    fn objective(&self, fvar: &ArrayD<T>, gvar: &ArrayD<T>) -> (f64, f64) {
        let dfid = 0.5 * norm2(&(&self.reconstruct(fvar) - &self.s)).powi(2);
        (dfid, self.lmbda * l1_norm(gvar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::SolveStatus;
    use ndarray::{ArrayD, IxDyn};

    fn delta_dictionary() -> ArrayD<f64> {
        // one impulse atom: convolution with it is the identity
        ArrayD::from_shape_vec(IxDyn(&[1, 1]), vec![1.0]).unwrap()
    }

    fn impulse_signal(n: usize, at: usize, amplitude: f64) -> ArrayD<f64> {
        let mut s = ArrayD::zeros(IxDyn(&[n]));
        s[IxDyn(&[at])] = amplitude;
        s
    }

    #[test]
    fn delta_atom_reconstructs_identity() {
        let d = delta_dictionary();
        let s = impulse_signal(8, 2, 3.0);
        let problem = ConvBpdn::new(&d, s.clone(), 0.1, &ConvBpdnOptions::default()).unwrap();
        let x = s.clone().into_shape(IxDyn(&[8, 1])).unwrap();
        let r = problem.reconstruct(&x);
        for (a, b) in r.iter().zip(s.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn sherman_morrison_solve_is_exact() {
        let d = ArrayD::from_shape_vec(
            IxDyn(&[3, 2]),
            vec![1.0, 0.5, -0.25, 0.3, 0.1, -0.7],
        )
        .unwrap();
        let s = impulse_signal(12, 4, 2.0);
        let problem = ConvBpdn::new(&d, s, 0.1, &ConvBpdnOptions::default()).unwrap();
        let y = ArrayD::from_elem(IxDyn(&[12, 2]), 0.25);
        let u = ArrayD::zeros(IxDyn(&[12, 2]));
        let sol = problem.solve_primal(&y, &y, &u, 0.8, true).unwrap();
        assert!(sol.rel_residual.unwrap() < 1e-10);
    }

    #[test]
    fn primal_solve_zeroes_the_quadratic_gradient() {
        let d = ArrayD::from_shape_vec(
            IxDyn(&[3, 2]),
            vec![1.0, 0.5, -0.25, 0.3, 0.1, -0.7],
        )
        .unwrap();
        let s = impulse_signal(12, 4, 2.0);
        let problem = ConvBpdn::new(&d, s.clone(), 0.1, &ConvBpdnOptions::default()).unwrap();
        let rho = 0.8;
        let vals: Vec<f64> = (0..24).map(|i| ((i * 5 + 1) % 7) as f64 * 0.1 - 0.3).collect();
        let y = ArrayD::from_shape_vec(IxDyn(&[12, 2]), vals).unwrap();
        let u = ArrayD::zeros(IxDyn(&[12, 2]));
        let x = problem.solve_primal(&y, &y, &u, rho, false).unwrap().x;

        // gradient of 1/2 ||recon(x) - s||^2 + rho/2 ||x - (y - u)||^2,
        // with the adjoint of the forward model applied per atom
        let rf = fftn(&(problem.reconstruct(&x) - &s), &problem.axes);
        let mut grad = (&x - &y) * rho;
        let last = Axis(x.ndim() - 1);
        for m in 0..problem.natoms() {
            let gm = Zip::from(&rf)
                .and(problem.df.index_axis(last, m))
                .map_collect(|&v, &dv| dv.conj() * v);
            Zip::from(grad.index_axis_mut(last, m))
                .and(&ifftn_real(&gm, &problem.axes))
                .for_each(|g, &v| *g = *g + v);
        }
        assert!(norm2(&grad) < 1e-10 * (1.0 + norm2(&x)));
    }

    #[test]
    fn identity_dictionary_solves_plain_bpdn() {
        // with a single impulse atom the model reduces to elementwise
        // soft thresholding of the signal
        let d = delta_dictionary();
        let s = impulse_signal(16, 3, 5.0);
        let mut solver =
            ConvBpdn::solver(&d, s, 0.5, ConvBpdnOptions::default()).unwrap();
        let summary = solver.solve().unwrap();
        assert_eq!(summary.status, SolveStatus::Converged);
        let x = solver.x();
        assert!((x[IxDyn(&[3, 0])] - 4.5).abs() < 1e-2);
        for (i, &v) in x.iter().enumerate() {
            if i != 3 {
                assert!(v.abs() < 1e-3);
            }
        }
    }

    #[test]
    fn non_neg_coef_clamps_after_threshold() {
        let d = delta_dictionary();
        let s = impulse_signal(4, 0, 1.0);
        let opts = ConvBpdnOptions {
            non_neg_coef: true,
            ..Default::default()
        };
        let problem = ConvBpdn::new(&d, s.clone(), 1.0, &opts).unwrap();
        let v = ArrayD::from_shape_vec(IxDyn(&[4, 1]), vec![3.0, -3.0, 0.5, -0.5]).unwrap();
        let y = problem.prox(&v, 1.0);
        assert_eq!(y[IxDyn(&[0, 0])], 2.0);
        assert_eq!(y[IxDyn(&[1, 0])], 0.0);
        assert_eq!(y[IxDyn(&[2, 0])], 0.0);
        assert_eq!(y[IxDyn(&[3, 0])], 0.0);

        let plain = ConvBpdn::new(&d, s, 1.0, &ConvBpdnOptions::default()).unwrap();
        let y = plain.prox(&v, 1.0);
        assert_eq!(y[IxDyn(&[1, 0])], -2.0);
    }

    #[test]
    fn penalty_heuristics_follow_lambda() {
        let d = delta_dictionary();
        let s = impulse_signal(4, 0, 1.0);
        let problem = ConvBpdn::new(&d, s, 0.1, &ConvBpdnOptions::default()).unwrap();
        assert!((problem.default_rho() - 6.0).abs() < 1e-12);
        assert!((problem.rsdl_target_default() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn dictionary_shape_is_validated() {
        let s = impulse_signal(8, 0, 1.0);
        let flat = ArrayD::from_elem(IxDyn(&[3]), 1.0);
        assert!(matches!(
            ConvBpdn::new(&flat, s.clone(), 0.1, &ConvBpdnOptions::default()),
            Err(SolverError::DimensionMismatch { .. })
        ));
        let oversized = ArrayD::from_elem(IxDyn(&[9, 1]), 1.0);
        assert!(matches!(
            ConvBpdn::new(&oversized, s, 0.1, &ConvBpdnOptions::default()),
            Err(SolverError::DimensionMismatch { .. })
        ));
    }
}
