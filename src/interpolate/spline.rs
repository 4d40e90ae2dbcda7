//! Natural cubic spline primitives.
//!
//! The grid interpolator estimates second derivatives over an extended
//! neighborhood of the bracketing cell and evaluates the cubic piece between
//! the bracketing samples. The same primitives back the spline continuum
//! model, in a scalar flavor.
//!
//! With fewer than three support points the second derivatives vanish and the
//! cubic degrades to straight linear interpolation, which is exactly the
//! behavior wanted near grid edges.

/// Second derivatives of a natural cubic spline through vector-valued samples.
///
/// `x` are the (strictly increasing) sample positions and `y[i]` the flux
/// array at `x[i]`; all flux arrays share the same length. Returns one
/// second-derivative array per sample.
pub(crate) fn second_derivs(x: &[f64], y: &[&[f64]]) -> Vec<Vec<f64>> {
    let n = x.len();
    let npix = y.first().map_or(0, |f| f.len());
    if n < 3 {
        return vec![vec![0.0; npix]; n];
    }

    // Tridiagonal decomposition: the factor `c[i]` is scalar, the
    // right-hand side `u[i]` is per-pixel.
    let mut c = vec![0.0; n];
    let mut u = vec![vec![0.0; npix]; n];
    for i in 1..n - 1 {
        let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
        let p = sig * c[i - 1] + 2.0;
        c[i] = (sig - 1.0) / p;
        let dx_hi = x[i + 1] - x[i];
        let dx_lo = x[i] - x[i - 1];
        let dx_full = x[i + 1] - x[i - 1];
        for k in 0..npix {
            let slope = (y[i + 1][k] - y[i][k]) / dx_hi - (y[i][k] - y[i - 1][k]) / dx_lo;
            u[i][k] = (6.0 * slope / dx_full - sig * u[i - 1][k]) / p;
        }
    }

    // Back substitution; natural boundary conditions pin both ends to zero.
    let mut y2 = vec![vec![0.0; npix]; n];
    for i in (1..n - 1).rev() {
        for k in 0..npix {
            y2[i][k] = c[i] * y2[i + 1][k] + u[i][k];
        }
    }
    y2
}

/// Evaluate the cubic piece of segment `seg` (between `x[seg]` and
/// `x[seg + 1]`) at position `t`, given the sample fluxes and their second
/// derivatives.
pub(crate) fn eval_segment(
    x: &[f64],
    y: &[&[f64]],
    y2: &[Vec<f64>],
    seg: usize,
    t: f64,
) -> Vec<f64> {
    let h = x[seg + 1] - x[seg];
    let a = (x[seg + 1] - t) / h;
    let b = (t - x[seg]) / h;
    let wa = (a * a * a - a) * h * h / 6.0;
    let wb = (b * b * b - b) * h * h / 6.0;

    let npix = y[seg].len();
    let mut out = vec![0.0; npix];
    for k in 0..npix {
        out[k] = a * y[seg][k] + b * y[seg + 1][k] + wa * y2[seg][k] + wb * y2[seg + 1][k];
    }
    out
}

/// Scalar variant of [`second_derivs`], used by the spline continuum model.
pub(crate) fn second_derivs_scalar(x: &[f64], y: &[f64]) -> Vec<f64> {
    let rows: Vec<&[f64]> = y.iter().map(std::slice::from_ref).collect();
    second_derivs(x, &rows).into_iter().map(|v| v[0]).collect()
}

/// Scalar variant of [`eval_segment`].
pub(crate) fn eval_segment_scalar(x: &[f64], y: &[f64], y2: &[f64], seg: usize, t: f64) -> f64 {
    let h = x[seg + 1] - x[seg];
    let a = (x[seg + 1] - t) / h;
    let b = (t - x[seg]) / h;
    a * y[seg]
        + b * y[seg + 1]
        + ((a * a * a - a) * y2[seg] + (b * b * b - b) * y2[seg + 1]) * h * h / 6.0
}
