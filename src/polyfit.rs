use ndarray::Array1;
use ndarray_linalg::{Lapack, Scalar};
use num_traits::Float;

use crate::error::Error;
use crate::math::{lstsq, vandermonde};
use crate::Result;

/// How the independent variable is treated before the least-squares solve
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scaling {
    /// Fit directly against the observations
    Unscaled,
    /// Map the observation window onto [-1, 1] before fitting, then express the coefficients in
    /// the original variable.
    ///
    /// Raw voltages from the rig sit in a narrow band away from zero, which makes the unscaled
    /// Vandermonde matrix badly conditioned for anything above a linear fit.
    Scaled,
}

/// Outcome of a polynomial least-squares fit
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult<E> {
    /// Coefficients in ascending powers of the independent variable
    solution: Array1<E>,
    /// Range of the independent variable covered by the fitted observations
    window: (E, E),
    residual_sum_of_squares: E,
    max_abs_residual: E,
}

impl<E: Float> FitResult<E> {
    pub const fn solution(&self) -> &Array1<E> {
        &self.solution
    }

    pub const fn window(&self) -> (E, E) {
        self.window
    }

    pub fn window_contains(&self, x: &E) -> bool {
        (self.window.0..=self.window.1).contains(x)
    }

    pub fn degree(&self) -> usize {
        self.solution.len() - 1
    }

    pub const fn residual_sum_of_squares(&self) -> E {
        self.residual_sum_of_squares
    }

    pub const fn max_abs_residual(&self) -> E {
        self.max_abs_residual
    }
}

/// A polynomial in ascending powers, `c_0 + c_1 x + ... + c_n x^n`
#[derive(Clone, Debug, PartialEq)]
pub struct Polynomial<E>(Vec<E>);

impl<E: Float> Polynomial<E> {
    pub fn new(coefficients: Vec<E>) -> Self {
        Self(coefficients)
    }

    pub fn evaluate(&self, x: E) -> E {
        horner(&self.0, x)
    }

    pub fn coefficients(&self) -> &[E] {
        &self.0
    }

    /// Substitute `offset + scale * x` for the variable, returning the polynomial in `x`
    fn compose_affine(&self, offset: E, scale: E) -> Self {
        let n = self.0.len();
        let mut composed = vec![E::zero(); n];
        // Row `k` of Pascal's triangle, updated in place as `k` increases
        let mut binomial = vec![E::zero(); n];
        for (k, &coefficient) in self.0.iter().enumerate() {
            for jj in (1..=k).rev() {
                binomial[jj] = binomial[jj] + binomial[jj - 1];
            }
            binomial[0] = E::one();

            let mut scale_power = E::one();
            for jj in 0..=k {
                let offset_power = (jj..k).fold(E::one(), |acc, _| acc * offset);
                composed[jj] = composed[jj] + coefficient * binomial[jj] * offset_power * scale_power;
                scale_power = scale_power * scale;
            }
        }
        Self(composed)
    }
}

impl<E: Float> From<FitResult<E>> for Polynomial<E> {
    fn from(value: FitResult<E>) -> Self {
        Self(value.solution.to_vec())
    }
}

/// Evaluate a polynomial with coefficients in ascending order using Horner's scheme
pub(crate) fn horner<E: Float>(coefficients: &[E], x: E) -> E {
    coefficients
        .iter()
        .rev()
        .fold(E::zero(), |acc, &c| acc * x + c)
}

/// Fit a polynomial of `degree` to the observations `(x, y)` in the least-squares sense
///
/// Optional `weights` multiply the squared residual of each observation. Residual metrics are
/// computed for the returned coefficients in the original variable, so evaluating the fitted
/// polynomial at any `x_i` lands within `max_abs_residual` of `y_i`.
///
/// # Errors
/// - [`Error::InsufficientData`] if there are fewer observations than coefficients
/// - [`Error::DegenerateFit`] if the observations cannot determine the coefficients, or the
///   inputs are malformed (mismatched lengths, non-finite values, negative weights). This includes
///   observations spread so narrowly around a large offset that the coefficients in the original
///   variable would cancel catastrophically, whatever the scaling.
pub fn polyfit<E: Float + Lapack + Scalar<Real = E>>(
    x: &[E],
    y: &[E],
    degree: usize,
    weights: Option<&[E]>,
    scaling: Scaling,
) -> Result<FitResult<E>> {
    if x.len() != y.len() {
        return Err(Error::degenerate(format!(
            "{} observations but {} responses",
            x.len(),
            y.len()
        )));
    }
    if x.len() < degree + 1 {
        return Err(Error::InsufficientData {
            required: degree + 1,
            distinct: x.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|&v| !Float::is_finite(v)) {
        return Err(Error::degenerate("observations must be finite"));
    }
    if let Some(weights) = weights {
        if weights.len() != x.len() {
            return Err(Error::degenerate(format!(
                "{} weights supplied for {} observations",
                weights.len(),
                x.len()
            )));
        }
        if weights.iter().any(|&w| !Float::is_finite(w) || w < E::zero()) {
            return Err(Error::degenerate("weights must be finite and non-negative"));
        }
    }

    let lower = x.iter().copied().fold(<E as Float>::infinity(), Float::min);
    let upper = x.iter().copied().fold(<E as Float>::neg_infinity(), Float::max);
    let spread = upper - lower;
    if spread <= E::zero() {
        return Err(Error::degenerate(
            "observations have no spread in the independent variable",
        ));
    }
    // Each power of x loses about log10(|x| / spread) digits to cancellation once the fit is
    // expressed in the original variable
    let relative_spread = spread / Float::max(Float::abs(upper), Float::abs(lower));
    let exponent = i32::try_from(degree).unwrap_or(i32::MAX);
    if Float::powi(relative_spread, exponent) <= Float::sqrt(<E as Float>::epsilon()) {
        return Err(Error::degenerate(format!(
            "observations span {spread} around {upper}, too narrow for a degree {degree} fit"
        )));
    }

    // For Scaled the fit runs in t = offset + scale * x
    let (offset, scale) = match scaling {
        Scaling::Unscaled => (E::zero(), E::one()),
        Scaling::Scaled => {
            let two = E::one() + E::one();
            (-(upper + lower) / spread, two / spread)
        }
    };
    let t = x.iter().map(|&xi| offset + scale * xi).collect::<Vec<_>>();

    let mut design = vandermonde(&t, degree);
    let mut rhs = Array1::from_iter(y.iter().copied());
    if let Some(weights) = weights {
        for (ii, w) in weights.iter().enumerate() {
            let root = Float::sqrt(*w);
            design.row_mut(ii).mapv_inplace(|v| v * root);
            rhs[ii] = rhs[ii] * root;
        }
    }

    let fitted = Polynomial(lstsq(&design, &rhs)?.to_vec());
    let polynomial = match scaling {
        Scaling::Unscaled => fitted,
        Scaling::Scaled => fitted.compose_affine(offset, scale),
    };

    let residuals = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| polynomial.evaluate(xi) - yi)
        .collect::<Vec<_>>();
    let residual_sum_of_squares = residuals.iter().fold(E::zero(), |acc, &r| acc + r * r);
    let max_abs_residual = residuals
        .iter()
        .fold(E::zero(), |acc, &r| Float::max(acc, Float::abs(r)));

    Ok(FitResult {
        solution: Array1::from_vec(polynomial.0),
        window: (lower, upper),
        residual_sum_of_squares,
        max_abs_residual,
    })
}
