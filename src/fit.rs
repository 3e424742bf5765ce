use log::info;

use crate::error::Error;
use crate::model::{CalibrationModel, Domain, FitQuality};
use crate::polyfit::{polyfit, Scaling};
use crate::reference::ReferencePoint;
use crate::sensor::SensorId;
use crate::Result;

/// Least-squares polynomial fitting of reference points into a [`CalibrationModel`]
#[derive(Clone, Copy, Debug)]
pub struct CurveFitter {
    scaling: Scaling,
}

impl Default for CurveFitter {
    fn default() -> Self {
        Self {
            scaling: Scaling::Scaled,
        }
    }
}

impl CurveFitter {
    pub const fn with_scaling(scaling: Scaling) -> Self {
        Self { scaling }
    }

    /// Fit `physical ≈ Σ c_i · raw^i` of `degree` through `points`
    ///
    /// The returned model always carries its fit metrics. A poor fit is not an error here; it is
    /// up to the caller to decide whether the residuals are acceptable.
    ///
    /// # Errors
    /// - [`Error::InsufficientData`] if there are fewer points than coefficients
    /// - [`Error::DegenerateFit`] if the raw values cannot determine the polynomial, for example
    ///   when they are all identical
    pub fn fit(
        &self,
        sensor: SensorId,
        points: &[ReferencePoint],
        degree: usize,
    ) -> Result<CalibrationModel> {
        if degree == 0 {
            return Err(Error::Config(format!(
                "{sensor}: calibration degree must be at least 1"
            )));
        }

        let raw = points.iter().map(|p| p.raw_value).collect::<Vec<_>>();
        let known = points.iter().map(|p| p.known_value).collect::<Vec<_>>();
        let fit = polyfit(&raw, &known, degree, None, self.scaling)?;

        let quality = FitQuality {
            residual_sum_of_squares: fit.residual_sum_of_squares(),
            max_abs_residual: fit.max_abs_residual(),
        };
        let (min_raw, max_raw) = fit.window();
        info!(
            "{sensor} degree {degree} fit over {} points: rss {:.3e}, max |residual| {:.3e} {}",
            points.len(),
            quality.residual_sum_of_squares,
            quality.max_abs_residual,
            sensor.unit()
        );

        Ok(CalibrationModel::new(
            sensor,
            fit.solution().to_vec(),
            Domain { min_raw, max_raw },
            quality,
            points.to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::CurveFitter;
    use crate::error::Error;
    use crate::polyfit::Scaling;
    use crate::reference::ReferencePoint;
    use crate::sensor::SensorId;
    use crate::Result;

    fn points(pairs: &[(f64, f64)]) -> Vec<ReferencePoint> {
        pairs
            .iter()
            .map(|&(known_value, raw_value)| ReferencePoint {
                known_value,
                raw_value,
            })
            .collect()
    }

    #[test]
    fn load_cell_scenario_interpolates_linearly() -> Result<()> {
        let points = points(&[(0.0, 0.01), (10.0, 0.52), (20.0, 1.03)]);

        let model = CurveFitter::default().fit(SensorId::LoadCell, &points, 1)?;

        let quality = model.quality().unwrap();
        assert_eq!(model.degree(), 1);
        assert_eq!(model.coefficients().len(), 2);
        // The three points are collinear, so the fit is the line through them
        let on_line = (0.77 - 0.01) / 0.51 * 10.0;
        approx::assert_relative_eq!(
            model.evaluate(0.77),
            on_line,
            epsilon = 1e-9 + quality.max_abs_residual
        );
        approx::assert_relative_eq!(model.evaluate(0.77), 15.0, epsilon = 0.15);
        assert_eq!(model.domain().min_raw, 0.01);
        assert_eq!(model.domain().max_raw, 1.03);
        assert_eq!(model.reference_points(), &points[..]);
        Ok(())
    }

    #[test]
    fn ultrasonic_quadratic_is_recovered_from_noisy_points() -> Result<()> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        // distance in metres as a slightly curved function of voltage
        let curve = |v: f64| 0.02 + 0.09 * v - 0.004 * v * v;
        let pairs = (0..12)
            .map(|n| {
                let volts = 0.3 + 0.2 * f64::from(n);
                (curve(volts) + rng.gen_range(-1e-5..1e-5), volts)
            })
            .collect::<Vec<_>>();

        let model = CurveFitter::default().fit(SensorId::Ultrasonic, &points(&pairs), 2)?;

        let quality = model.quality().unwrap();
        assert!(quality.max_abs_residual < 5e-5);
        for (known, raw) in &pairs {
            assert!((model.evaluate(*raw) - known).abs() <= quality.max_abs_residual);
        }
        approx::assert_relative_eq!(model.evaluate(1.0), curve(1.0), epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn unscaled_fitting_gives_the_same_line() -> Result<()> {
        let points = points(&[(0.0, 0.01), (10.0, 0.52), (20.0, 1.03)]);

        let scaled = CurveFitter::default().fit(SensorId::LoadCell, &points, 1)?;
        let unscaled =
            CurveFitter::with_scaling(Scaling::Unscaled).fit(SensorId::LoadCell, &points, 1)?;

        for (a, b) in scaled.coefficients().iter().zip(unscaled.coefficients()) {
            approx::assert_relative_eq!(a, b, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn identical_raw_values_are_degenerate() {
        let points = points(&[(0.0, 0.4), (10.0, 0.4), (20.0, 0.4)]);

        let result = CurveFitter::default().fit(SensorId::LoadCell, &points, 1);

        assert!(matches!(result, Err(Error::DegenerateFit { .. })));
    }

    #[test]
    fn nearly_identical_raw_values_are_degenerate() {
        let points = points(&[(0.0, 1.0), (10.0, 1.0 + 1e-13), (20.0, 1.0 + 2e-13)]);

        for fitter in [
            CurveFitter::default(),
            CurveFitter::with_scaling(Scaling::Unscaled),
        ] {
            let result = fitter.fit(SensorId::LoadCell, &points, 1);
            assert!(matches!(result, Err(Error::DegenerateFit { .. })));
        }
    }

    #[test]
    fn repeated_raw_values_cannot_support_a_quadratic() {
        let points = points(&[(0.0, 0.1), (1.0, 0.1), (2.0, 0.9), (3.0, 0.9)]);

        let result = CurveFitter::default().fit(SensorId::Ultrasonic, &points, 2);

        assert!(matches!(result, Err(Error::DegenerateFit { .. })));
    }

    #[test]
    fn fewer_points_than_coefficients_are_insufficient() {
        let points = points(&[(0.0, 0.1), (1.0, 0.5)]);

        let result = CurveFitter::default().fit(SensorId::Ultrasonic, &points, 2);

        assert!(matches!(result, Err(Error::InsufficientData { .. })));
    }
}
