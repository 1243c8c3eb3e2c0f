use crate::linalg::{from_f64, to_f64, Precision};
use crate::options::AutoRhoOptions;
use ndarray::ArrayD;

/// Penalty parameter controller.
///
/// Owns the adaptation settings and the resolved residual target ratio.
/// The penalty never changes sign and never leaves `[rho_min, rho_max]`;
/// whenever the policy rescales the penalty by a factor it divides the
/// scaled dual variable by the same factor, so the unscaled dual is
/// invariant across adjustments.
#[derive(Debug, Clone)]
pub struct RhoPolicy {
    opts: AutoRhoOptions,
    /// Resolved residual target ratio.
    xi: f64,
}

impl RhoPolicy {
    pub fn new(opts: AutoRhoOptions, xi: f64) -> Self {
        Self { opts, xi }
    }

    pub fn enabled(&self) -> bool {
        self.opts.enabled
    }

    /// Raw multiplier for the current residual imbalance, or `None` when
    /// no adjustment is due. `k` is the 0-based iteration index; the first
    /// iteration never adjusts.
    fn factor(&self, k: usize, r: f64, s: f64) -> Option<f64> {
        if !self.opts.enabled || k == 0 || (k + 1) % self.opts.period != 0 {
            return None;
        }
        // zero residuals carry no imbalance information
        if r == 0.0 || s == 0.0 {
            return None;
        }
        let xi = self.xi;
        let scale = if self.opts.auto_scaling {
            let imbalance = if r > s * xi {
                r / (s * xi)
            } else {
                (s * xi) / r
            };
            imbalance.sqrt().min(self.opts.scaling)
        } else {
            self.opts.scaling
        };
        if r > xi * self.opts.rsdl_ratio * s {
            Some(scale)
        } else if s > (self.opts.rsdl_ratio / xi) * r {
            Some(1.0 / scale)
        } else {
            None
        }
    }

    /// Applies any due adjustment to `rho` and the scaled dual `u`.
    /// Returns the factor actually applied after clamping.
    pub fn adapt<T: Precision>(
        &self,
        k: usize,
        r: f64,
        s: f64,
        rho: &mut T,
        u: &mut ArrayD<T>,
    ) -> Option<f64> {
        let factor = self.factor(k, r, s)?;
        let current = to_f64(*rho);
        let clamped = (current * factor).clamp(self.opts.rho_min, self.opts.rho_max);
        let applied = clamped / current;
        if applied == 1.0 {
            return None;
        }
        *rho = from_f64(clamped);
        let inv = from_f64::<T>(1.0 / applied);
        u.mapv_inplace(|v| v * inv);
        Some(applied)
    }
}
