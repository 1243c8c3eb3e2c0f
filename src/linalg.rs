use ndarray::{ArrayD, Axis, Dimension, IxDyn, NdFloat, Zip};
use rustfft::{num_complex::Complex, FftNum, FftPlanner};

/// Floating-point precision supported by the solvers.
///
/// Implemented for `f32` and `f64`. The working precision of a problem is
/// fixed by the arrays it is constructed from and is preserved by every
/// array operation in the iteration; scalars are widened to `f64` only for
/// reporting.
pub trait Precision: NdFloat + FftNum {}

impl Precision for f32 {}
impl Precision for f64 {}

/// Converts a configuration scalar into the working precision.
pub fn from_f64<T: Precision>(v: f64) -> T {
    T::from_f64(v).expect("f64 converts to any supported precision")
}

/// Widens a working-precision scalar to `f64` for reporting.
pub fn to_f64<T: Precision>(v: T) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Frobenius norm of a real array, accumulated in `f64`.
pub fn norm2<T: Precision>(a: &ArrayD<T>) -> f64 {
    a.iter()
        .fold(0.0f64, |acc, &v| acc + to_f64(v) * to_f64(v))
        .sqrt()
}

/// Frobenius norm of a complex array, accumulated in `f64`.
pub fn norm2c<T: Precision>(a: &ArrayD<Complex<T>>) -> f64 {
    a.iter()
        .fold(0.0f64, |acc, c| acc + to_f64(c.norm_sqr()))
        .sqrt()
}

/// Sum of absolute values.
pub fn l1_norm<T: Precision>(a: &ArrayD<T>) -> f64 {
    a.iter().fold(0.0f64, |acc, &v| acc + to_f64(v).abs())
}

/// Sum over all positions of the Euclidean magnitude of the trailing-axis
/// lane, i.e. the grouped l2,1 norm used by isotropic total variation.
pub fn l21_norm<T: Precision>(a: &ArrayD<T>) -> f64 {
    let last = Axis(a.ndim() - 1);
    a.lanes(last)
        .into_iter()
        .map(|lane| {
            lane.iter()
                .fold(0.0f64, |acc, &v| acc + to_f64(v) * to_f64(v))
                .sqrt()
        })
        .sum()
}

/// Relative residual `||ax - b|| / ||b||` of a linear-system solution,
/// falling back to the absolute residual when `b` is zero.
pub fn rel_residual<T: Precision>(ax: &ArrayD<T>, b: &ArrayD<T>) -> f64 {
    let nb = norm2(b);
    let nd = norm2(&(ax - b));
    if nb == 0.0 { nd } else { nd / nb }
}

/// Relative residual of a frequency-domain linear-system solution.
pub fn rel_residual_c<T: Precision>(ax: &ArrayD<Complex<T>>, b: &ArrayD<Complex<T>>) -> f64 {
    let nb = norm2c(b);
    let nd = norm2c(&(ax - b));
    if nb == 0.0 { nd } else { nd / nb }
}

/// Soft thresholding operation for l1 regularization.
/// Computes `sign(x) * max(|x| - thresh, 0)` elementwise.
pub fn soft_threshold<T: Precision>(v: &ArrayD<T>, thresh: T) -> ArrayD<T> {
    v.mapv(|x| x.signum() * (x.abs() - thresh).max(T::zero()))
}

/// Grouped soft thresholding over trailing-axis lanes.
///
/// Each lane is scaled by `max(||lane|| - thresh, 0) / ||lane||`, which is
/// the proximal operator of the grouped l2,1 norm. Zero-magnitude lanes map
/// to zero.
pub fn group_soft_threshold<T: Precision>(v: &ArrayD<T>, thresh: T) -> ArrayD<T> {
    let last = Axis(v.ndim() - 1);
    let mut out = v.to_owned();
    for mut lane in out.lanes_mut(last) {
        let mag = lane.iter().fold(T::zero(), |acc, &x| acc + x * x).sqrt();
        let scale = if mag > thresh {
            (mag - thresh) / mag
        } else {
            T::zero()
        };
        for x in lane.iter_mut() {
            *x = *x * scale;
        }
    }
    out
}

/// Circularly shifts an array along `axis`; positive shifts move elements
/// toward higher indices.
pub fn roll<T: Precision>(a: &ArrayD<T>, axis: usize, shift: isize) -> ArrayD<T> {
    let n = a.len_of(Axis(axis)) as isize;
    let mut out = ArrayD::zeros(a.raw_dim());
    if n == 0 {
        return out;
    }
    for i in 0..n {
        let j = (i + shift).rem_euclid(n);
        out.index_axis_mut(Axis(axis), j as usize)
            .assign(&a.index_axis(Axis(axis), i as usize));
    }
    out
}

/// Periodic forward difference along `axis`: `d[i] = a[i+1] - a[i]`.
pub fn forward_diff<T: Precision>(a: &ArrayD<T>, axis: usize) -> ArrayD<T> {
    &roll(a, axis, -1) - a
}

/// Adjoint of [`forward_diff`]: `d[i] = a[i-1] - a[i]`.
pub fn forward_diff_adjoint<T: Precision>(a: &ArrayD<T>, axis: usize) -> ArrayD<T> {
    &roll(a, axis, 1) - a
}

/// Lifts a real array into the complex plane.
pub fn to_complex<T: Precision>(a: &ArrayD<T>) -> ArrayD<Complex<T>> {
    a.mapv(|v| Complex::new(v, T::zero()))
}

fn transform_axes<T: Precision>(a: &mut ArrayD<Complex<T>>, axes: &[usize], inverse: bool) {
    let mut planner = FftPlanner::new();
    for &axis in axes {
        let len = a.len_of(Axis(axis));
        if len == 0 {
            continue;
        }
        let fft = if inverse {
            planner.plan_fft_inverse(len)
        } else {
            planner.plan_fft_forward(len)
        };
        // rustfft leaves inverse transforms unscaled
        let scale = from_f64::<T>(1.0 / len as f64);
        let mut buf = vec![Complex::new(T::zero(), T::zero()); len];
        for mut lane in a.lanes_mut(Axis(axis)) {
            for (b, v) in buf.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process(&mut buf);
            if inverse {
                for (dst, b) in lane.iter_mut().zip(buf.iter()) {
                    *dst = *b * scale;
                }
            } else {
                for (dst, b) in lane.iter_mut().zip(buf.iter()) {
                    *dst = *b;
                }
            }
        }
    }
}

/// Discrete Fourier transform of a real array along the given axes.
pub fn fftn<T: Precision>(a: &ArrayD<T>, axes: &[usize]) -> ArrayD<Complex<T>> {
    let mut out = to_complex(a);
    transform_axes(&mut out, axes, false);
    out
}

/// Inverse transform along the given axes, scaled by `1/len` per axis.
pub fn ifftn<T: Precision>(a: &ArrayD<Complex<T>>, axes: &[usize]) -> ArrayD<Complex<T>> {
    let mut out = a.clone();
    transform_axes(&mut out, axes, true);
    out
}

/// Inverse transform of a spectrum known to come from real data; returns
/// the real part.
pub fn ifftn_real<T: Precision>(a: &ArrayD<Complex<T>>, axes: &[usize]) -> ArrayD<T> {
    ifftn(a, axes).mapv(|c| c.re)
}

/// Elementwise complex product with `b` broadcast to the shape of `a`.
///
/// Frequency responses of filters are stored with length-one axes in the
/// non-transformed dimensions, so products against full-shape spectra
/// broadcast.
pub fn bcast_mul<T: Precision>(
    a: &ArrayD<Complex<T>>,
    b: &ArrayD<Complex<T>>,
) -> ArrayD<Complex<T>> {
    Zip::from(a)
        .and_broadcast(b)
        .map_collect(|&x, &y| x * y)
}

/// Embeds a small filter at the origin of a zero array of shape `shape`.
/// Trailing axes the filter lacks are treated as length one.
pub fn embed_at_origin<T: Precision>(k: &ArrayD<T>, shape: &[usize]) -> ArrayD<T> {
    let mut out = ArrayD::zeros(IxDyn(shape));
    for (idx, &v) in k.indexed_iter() {
        let mut full = vec![0usize; shape.len()];
        for (d, &i) in idx.slice().iter().enumerate() {
            full[d] = i;
        }
        out[IxDyn(&full)] = v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn arrd(v: &[f64]) -> ArrayD<f64> {
        arr1(v).into_dyn()
    }

    #[test]
    fn soft_threshold_known_values() {
        let v = arrd(&[3.0, -2.0, 0.5, 0.0]);
        let out = soft_threshold(&v, 1.0);
        assert_eq!(out, arrd(&[2.0, -1.0, 0.0, 0.0]));
    }

    #[test]
    fn group_soft_threshold_scales_lanes() {
        let v = arrd(&[3.0, 4.0]);
        let out = group_soft_threshold(&v, 2.5);
        assert_eq!(out, arrd(&[1.5, 2.0]));
        let zeroed = group_soft_threshold(&v, 5.0);
        assert_eq!(zeroed, arrd(&[0.0, 0.0]));
    }

    #[test]
    fn roll_wraps_periodically() {
        let v = arrd(&[1.0, 2.0, 3.0]);
        assert_eq!(roll(&v, 0, 1), arrd(&[3.0, 1.0, 2.0]));
        assert_eq!(roll(&v, 0, -1), arrd(&[2.0, 3.0, 1.0]));
    }

    #[test]
    fn forward_diff_matches_adjoint() {
        let x = arrd(&[0.3, -1.2, 2.5, 0.7, -0.4]);
        let y = arrd(&[1.1, 0.2, -0.9, 0.5, 1.6]);
        let lhs = (&forward_diff(&x, 0) * &y).sum();
        let rhs = (&x * &forward_diff_adjoint(&y, 0)).sum();
        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn fft_of_impulse_is_flat() {
        let x = arrd(&[1.0, 0.0, 0.0, 0.0]);
        let xf = fftn(&x, &[0]);
        for c in xf.iter() {
            assert!((c.re - 1.0).abs() < 1e-12);
            assert!(c.im.abs() < 1e-12);
        }
    }

    #[test]
    fn inverse_fft_recovers_signal() {
        let x = arrd(&[0.5, -1.0, 2.0, 0.25]);
        let back = ifftn_real(&fftn(&x, &[0]), &[0]);
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn rel_residual_is_zero_for_exact_solution() {
        let b = arrd(&[1.0, -2.0, 3.0]);
        assert_eq!(rel_residual(&b.clone(), &b), 0.0);
    }

    #[test]
    fn embed_places_filter_at_origin() {
        let k = arrd(&[-1.0, 1.0]);
        let out = embed_at_origin(&k, &[4, 3]);
        assert_eq!(out[[0, 0]], -1.0);
        assert_eq!(out[[1, 0]], 1.0);
        assert_eq!(out[[0, 1]], 0.0);
    }

    #[test]
    fn l21_norm_sums_lane_magnitudes() {
        let v = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![3.0, 4.0, 0.0, 2.0]).unwrap();
        assert!((l21_norm(&v) - 7.0).abs() < 1e-12);
    }
}
