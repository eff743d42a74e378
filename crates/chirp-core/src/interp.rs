// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Grid Utilities
// ─────────────────────────────────────────────────────────────────────
//! One-dimensional linear interpolation and finite-difference
//! derivatives on non-uniform grids.

/// Value used outside the support of the sample points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fill {
    /// Hold the boundary sample.
    Edge,
    /// Use a constant.
    Value(f64),
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, written to `out`.
///
/// `xp` must be increasing. Points exactly on the last sample take
/// `fp[last]`; points outside `[xp[0], xp[last]]` take the fill value.
/// NaN points map to NaN.
pub fn interp_into(x: &[f64], xp: &[f64], fp: &[f64], fill: Fill, out: &mut [f64]) {
    debug_assert_eq!(xp.len(), fp.len());
    debug_assert_eq!(x.len(), out.len());
    let n = xp.len();
    if n == 0 {
        out.iter_mut().for_each(|o| *o = 0.0);
        return;
    }
    let (left, right) = match fill {
        Fill::Edge => (fp[0], fp[n - 1]),
        Fill::Value(v) => (v, v),
    };
    for (o, &xi) in out.iter_mut().zip(x) {
        *o = if xi < xp[0] {
            left
        } else if xi > xp[n - 1] {
            right
        } else if xi == xp[n - 1] {
            fp[n - 1]
        } else if n < 2 || xi.is_nan() {
            f64::NAN
        } else {
            // first j with xp[j] > xi; 1 <= j <= n - 1
            let j = xp.partition_point(|&v| v <= xi).clamp(1, n - 1);
            let (x0, x1) = (xp[j - 1], xp[j]);
            let w = (xi - x0) / (x1 - x0);
            fp[j - 1] + w * (fp[j] - fp[j - 1])
        };
    }
}

pub fn interp(x: &[f64], xp: &[f64], fp: &[f64], fill: Fill) -> Vec<f64> {
    let mut out = vec![0.0; x.len()];
    interp_into(x, xp, fp, fill, &mut out);
    out
}

/// Derivative of samples `f` on grid `x`: second-order central
/// differences inside, first-order one-sided at the ends.
///
/// Series shorter than two samples have zero derivative.
pub fn gradient(f: &[f64], x: &[f64]) -> Vec<f64> {
    debug_assert_eq!(f.len(), x.len());
    let n = f.len();
    let mut g = vec![0.0; n];
    if n < 2 {
        return g;
    }
    g[0] = (f[1] - f[0]) / (x[1] - x[0]);
    g[n - 1] = (f[n - 1] - f[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        g[i] = (hs * hs * f[i + 1] + (hd * hd - hs * hs) * f[i] - hd * hd * f[i - 1])
            / (hs * hd * (hd + hs));
    }
    g
}

/// `n` evenly spaced points from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Whether `x` is strictly increasing.
pub fn is_strictly_increasing(x: &[f64]) -> bool {
    x.windows(2).all(|w| w[0] < w[1])
}

/// Whether `x` is non-decreasing.
pub fn is_sorted(x: &[f64]) -> bool {
    x.windows(2).all(|w| w[0] <= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interp_inside_and_knots() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [0.0, 2.0, 6.0];
        let y = interp(&[0.0, 0.5, 1.0, 2.0, 3.0], &xp, &fp, Fill::Edge);
        assert_eq!(y, vec![0.0, 1.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_interp_fill_modes() {
        let xp = [0.0, 1.0];
        let fp = [5.0, 7.0];
        assert_eq!(interp(&[-1.0, 2.0], &xp, &fp, Fill::Edge), vec![5.0, 7.0]);
        assert_eq!(
            interp(&[-1.0, 2.0], &xp, &fp, Fill::Value(0.0)),
            vec![0.0, 0.0]
        );
    }

    #[test]
    fn test_interp_nan_point_does_not_panic() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [0.0, 2.0, 6.0];
        let y = interp(&[f64::NAN, 0.5], &xp, &fp, Fill::Edge);
        assert!(y[0].is_nan());
        assert_eq!(y[1], 1.0);
    }

    #[test]
    fn test_grid_ordering() {
        assert!(is_sorted(&[0.0, 0.0, 1.0]));
        assert!(!is_strictly_increasing(&[0.0, 0.0, 1.0]));
        assert!(!is_sorted(&[0.0, 1.0, 0.5]));
        assert!(!is_sorted(&[0.0, f64::NAN, 1.0]));
    }

    #[test]
    fn test_gradient_exact_for_quadratic() {
        // second-order scheme is exact for quadratics on any grid
        let x = [0.0, 0.3, 1.0, 1.2, 2.5];
        let f: Vec<f64> = x.iter().map(|v| 3.0 * v * v - v).collect();
        let g = gradient(&f, &x);
        for i in 1..x.len() - 1 {
            assert_relative_eq!(g[i], 6.0 * x[i] - 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(g[0], (f[1] - f[0]) / 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_short_series() {
        assert_eq!(gradient(&[1.0], &[0.0]), vec![0.0]);
        assert_eq!(gradient(&[1.0, 3.0], &[0.0, 2.0]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(-1.0, 1.0, 3), vec![-1.0, 0.0, 1.0]);
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
