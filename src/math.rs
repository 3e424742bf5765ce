use ndarray::{Array1, Array2};
use ndarray_linalg::{Lapack, LeastSquaresSvd, Scalar};
use num_traits::Float;

use crate::error::Error;
use crate::Result;

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (m x degree + 1) matrix for m observations. Each row of the matrix
/// is a geometric progression for an individual observation `x` from power `0` to `degree`
/// inclusive.
///
/// # Examples
///
/// ```
/// use tensile_cal::math::vandermonde;
/// use ndarray::arr2;
///
/// let observations: Vec<f64> = vec![2., 3.];
/// let vander = vandermonde(&observations, 2);
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
pub fn vandermonde<T: Float>(x: &[T], degree: usize) -> Array2<T> {
    Array2::from_shape_fn((x.len(), degree + 1), |(ii, jj)| {
        // Repeated multiplication keeps the powers exact for small integers
        (0..jj).fold(T::one(), |acc, _| acc * x[ii])
    })
}

/// Smallest singular value, relative to the largest, for the design matrix to count as full rank
fn rank_tolerance<T: Float>() -> T {
    T::epsilon() * T::from(4096).unwrap_or_else(T::one)
}

/// Solve the overdetermined system `a · c ≈ b` in the least-squares sense
///
/// The solve goes through LAPACK's SVD driver, which also hands back the singular values of `a`.
/// Those decide whether the system determines a unique solution.
///
/// # Errors
/// Returns [`Error::DegenerateFit`] when `a` has fewer rows than columns, when the solver fails,
/// or when the smallest singular value of `a` is vanishingly small relative to the largest. The
/// latter happens when the columns of `a` are (nearly) linearly dependent, for example when all
/// observations share one value.
///
/// # Examples
///
/// ```
/// use tensile_cal::math::{lstsq, vandermonde};
/// use ndarray::arr1;
///
/// let x = [0., 1., 2., 3.];
/// let y = arr1(&[1., 3., 5., 7.]);
/// let solution = lstsq(&vandermonde(&x, 1), &y).unwrap();
///
/// approx::assert_relative_eq!(solution[0], 1., epsilon = 1e-12);
/// approx::assert_relative_eq!(solution[1], 2., epsilon = 1e-12);
/// ```
pub fn lstsq<T: Float + Lapack + Scalar<Real = T>>(
    a: &Array2<T>,
    b: &Array1<T>,
) -> Result<Array1<T>> {
    let (m, n) = a.dim();
    if m < n {
        return Err(Error::degenerate(format!(
            "{m} equations cannot determine {n} coefficients"
        )));
    }
    if b.len() != m {
        return Err(Error::degenerate(format!(
            "right hand side has {} rows, matrix has {m}",
            b.len()
        )));
    }

    let result = a
        .least_squares(b)
        .map_err(|e| Error::degenerate(format!("least-squares solve failed: {e}")))?;

    let largest = result
        .singular_values
        .iter()
        .copied()
        .fold(T::zero(), Float::max);
    if largest == T::zero() {
        return Err(Error::degenerate("design matrix is identically zero"));
    }
    let tolerance = largest * rank_tolerance();
    let rank = result
        .singular_values
        .iter()
        .filter(|&&sigma| sigma > tolerance)
        .count();
    if rank < n {
        return Err(Error::degenerate(format!(
            "design matrix has rank {rank}, {n} coefficients requested"
        )));
    }

    Ok(result.solution)
}
