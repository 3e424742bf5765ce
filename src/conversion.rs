use std::collections::BTreeMap;

use log::{debug, warn};

use crate::acquisition::RawSample;
use crate::error::{Error, Misalignment};
use crate::model::{CalibrationModel, Domain};
use crate::sensor::SensorId;
use crate::Result;

/// The models in force for a conversion pass, keyed by sensor
pub type Models = BTreeMap<SensorId, CalibrationModel>;

/// A raw sample converted to its sensor's physical unit
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvertedSample {
    pub index: usize,
    pub sensor: SensorId,
    pub physical_value: f64,
}

/// Force and displacement read at the same sample index
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceDisplacement {
    pub index: usize,
    /// Metres
    pub displacement: f64,
    /// Newtons
    pub force: f64,
}

/// Peak load of a test and where it occurred
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TestSummary {
    pub index: usize,
    pub max_force: f64,
    pub displacement_at_max_force: f64,
}

/// Applies calibration models to raw samples
///
/// The engine borrows the models for the length of a pass and never modifies them.
pub struct ConversionEngine<'a> {
    models: &'a Models,
}

impl<'a> ConversionEngine<'a> {
    pub const fn new(models: &'a Models) -> Self {
        Self { models }
    }

    /// Convert every sample with its sensor's model
    ///
    /// The output has one entry per input, in input order, with the same index. Samples outside a
    /// model's domain are converted by extrapolation and reported in the log.
    ///
    /// # Errors
    /// Returns [`Error::MissingCalibration`] at the first sample from a sensor with no model. The
    /// partial output is discarded; there is no passthrough of raw values.
    pub fn convert(&self, samples: &[RawSample]) -> Result<Vec<ConvertedSample>> {
        let mut extrapolated: BTreeMap<SensorId, (usize, Domain)> = BTreeMap::new();
        let mut converted = Vec::with_capacity(samples.len());
        for sample in samples {
            let model = self
                .models
                .get(&sample.sensor)
                .ok_or(Error::MissingCalibration(sample.sensor))?;
            let domain = model.domain();
            if !domain.contains(sample.raw_value) {
                extrapolated.entry(sample.sensor).or_insert((0, domain)).0 += 1;
            }
            converted.push(ConvertedSample {
                index: sample.index,
                sensor: sample.sensor,
                physical_value: model.evaluate(sample.raw_value),
            });
        }

        for (sensor, (count, domain)) in extrapolated {
            warn!(
                "{count} {sensor} samples fall outside the calibrated range {:.4}..{:.4} V and were extrapolated",
                domain.min_raw, domain.max_raw
            );
        }
        debug!("converted {} samples", converted.len());
        Ok(converted)
    }
}

/// Apply `models` to `samples` in a single pass
///
/// # Errors
/// See [`ConversionEngine::convert`].
pub fn convert(samples: &[RawSample], models: &Models) -> Result<Vec<ConvertedSample>> {
    ConversionEngine::new(models).convert(samples)
}

/// The samples of one sensor, in their original order
pub fn series(converted: &[ConvertedSample], sensor: SensorId) -> Vec<ConvertedSample> {
    converted
        .iter()
        .filter(|sample| sample.sensor == sensor)
        .copied()
        .collect()
}

/// Pair the displacement and force series sample by sample
///
/// # Errors
/// Returns [`Error::ChannelAlignment`] if the series differ in length, typically because one
/// channel stopped early, or if they are the same length but disagree on the index at some
/// position.
pub fn pair(
    displacement: &[ConvertedSample],
    force: &[ConvertedSample],
) -> Result<Vec<ForceDisplacement>> {
    if displacement.len() != force.len() {
        return Err(Error::ChannelAlignment(Misalignment::Length {
            displacement: displacement.len(),
            force: force.len(),
        }));
    }

    displacement
        .iter()
        .zip(force)
        .enumerate()
        .map(|(position, (d, f))| {
            if d.index == f.index {
                Ok(ForceDisplacement {
                    index: d.index,
                    displacement: d.physical_value,
                    force: f.physical_value,
                })
            } else {
                Err(Error::ChannelAlignment(Misalignment::Index {
                    position,
                    displacement: d.index,
                    force: f.index,
                }))
            }
        })
        .collect()
}

/// Maximum force over the test and the displacement at that sample
///
/// The first sample wins when the peak is repeated. Returns `None` for an empty test.
pub fn summarise(pairs: &[ForceDisplacement]) -> Option<TestSummary> {
    pairs
        .iter()
        .filter(|pair| !pair.force.is_nan())
        .fold(None, |best: Option<&ForceDisplacement>, pair| match best {
            Some(best) if best.force >= pair.force => Some(best),
            _ => Some(pair),
        })
        .map(|peak| TestSummary {
            index: peak.index,
            max_force: peak.force,
            displacement_at_max_force: peak.displacement,
        })
}

#[cfg(test)]
mod tests {
    use super::{convert, pair, series, summarise, ConvertedSample, ForceDisplacement, Models};
    use crate::acquisition::RawSample;
    use crate::error::{Error, Misalignment};
    use crate::fit::CurveFitter;
    use crate::reference::ReferencePoint;
    use crate::sensor::SensorId;
    use crate::Result;

    fn linear_models() -> Result<Models> {
        let fitter = CurveFitter::default();
        let mut models = Models::new();
        // 20 N per volt, 0.1 m per volt
        for (sensor, gain) in [(SensorId::LoadCell, 20.0), (SensorId::Ultrasonic, 0.1)] {
            let points = [0.0, 1.0, 2.0]
                .into_iter()
                .map(|raw_value| ReferencePoint {
                    known_value: gain * raw_value,
                    raw_value,
                })
                .collect::<Vec<_>>();
            models.insert(sensor, fitter.fit(sensor, &points, 1)?);
        }
        Ok(models)
    }

    #[allow(clippy::cast_precision_loss)]
    fn raw_series(sensor: SensorId, len: usize) -> Vec<RawSample> {
        (0..len)
            .map(|index| RawSample {
                index,
                sensor,
                raw_value: index as f64 / 50.,
            })
            .collect()
    }

    fn converted(sensor: SensorId, indices: &[usize]) -> Vec<ConvertedSample> {
        indices
            .iter()
            .map(|&index| ConvertedSample {
                index,
                sensor,
                physical_value: 0.,
            })
            .collect()
    }

    #[test]
    fn conversion_preserves_order_and_cardinality() -> Result<()> {
        let models = linear_models()?;
        let mut samples = raw_series(SensorId::Ultrasonic, 5);
        samples.extend(raw_series(SensorId::LoadCell, 5));
        samples.swap(0, 7);

        let converted = convert(&samples, &models)?;

        assert_eq!(converted.len(), samples.len());
        for (raw, physical) in samples.iter().zip(&converted) {
            assert_eq!(raw.index, physical.index);
            assert_eq!(raw.sensor, physical.sensor);
            let gain = match raw.sensor {
                SensorId::LoadCell => 20.0,
                SensorId::Ultrasonic => 0.1,
            };
            approx::assert_relative_eq!(
                physical.physical_value,
                gain * raw.raw_value,
                epsilon = 1e-12
            );
        }
        Ok(())
    }

    #[test]
    fn samples_outside_the_domain_are_extrapolated() -> Result<()> {
        let models = linear_models()?;
        let samples = [RawSample {
            index: 0,
            sensor: SensorId::LoadCell,
            raw_value: 5.0,
        }];

        let converted = convert(&samples, &models)?;

        approx::assert_relative_eq!(converted[0].physical_value, 100.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn samples_without_a_model_are_not_passed_through() -> Result<()> {
        let mut models = linear_models()?;
        models.remove(&SensorId::Ultrasonic);
        let mut samples = raw_series(SensorId::LoadCell, 3);
        samples.extend(raw_series(SensorId::Ultrasonic, 3));

        let result = convert(&samples, &models);

        assert!(matches!(
            result,
            Err(Error::MissingCalibration(SensorId::Ultrasonic))
        ));
        Ok(())
    }

    #[test]
    fn matching_series_pair_one_to_one() -> Result<()> {
        let models = linear_models()?;
        let mut samples = raw_series(SensorId::LoadCell, 100);
        samples.extend(raw_series(SensorId::Ultrasonic, 100));
        let converted = convert(&samples, &models)?;

        let pairs = pair(
            &series(&converted, SensorId::Ultrasonic),
            &series(&converted, SensorId::LoadCell),
        )?;

        assert_eq!(pairs.len(), 100);
        for (ii, pair) in pairs.iter().enumerate() {
            assert_eq!(pair.index, ii);
            approx::assert_relative_eq!(
                pair.force,
                200. * pair.displacement,
                epsilon = 1e-9,
                max_relative = 1e-9
            );
        }
        Ok(())
    }

    #[test]
    fn channel_that_stopped_early_cannot_be_paired() {
        let displacement = converted(SensorId::Ultrasonic, &(0..100).collect::<Vec<_>>());
        let force = converted(SensorId::LoadCell, &(0..95).collect::<Vec<_>>());

        let result = pair(&displacement, &force);

        assert!(matches!(
            result,
            Err(Error::ChannelAlignment(Misalignment::Length {
                displacement: 100,
                force: 95
            }))
        ));
    }

    #[test]
    fn disagreeing_indices_cannot_be_paired() {
        let displacement = converted(SensorId::Ultrasonic, &[0, 1, 2, 3]);
        let force = converted(SensorId::LoadCell, &[0, 1, 3, 4]);

        let result = pair(&displacement, &force);

        assert!(matches!(
            result,
            Err(Error::ChannelAlignment(Misalignment::Index {
                position: 2,
                displacement: 2,
                force: 3
            }))
        ));
    }

    #[test]
    fn summary_reports_displacement_at_peak_force() {
        let pairs = [
            (0.000, 0.0),
            (0.001, 40.0),
            (0.002, 95.5),
            (0.003, 95.5),
            (0.004, 12.0),
        ]
        .iter()
        .enumerate()
        .map(|(index, &(displacement, force))| ForceDisplacement {
            index,
            displacement,
            force,
        })
        .collect::<Vec<_>>();

        let summary = summarise(&pairs).unwrap();

        assert_eq!(summary.index, 2);
        assert_eq!(summary.max_force, 95.5);
        assert_eq!(summary.displacement_at_max_force, 0.002);
        assert!(summarise(&[]).is_none());
    }
}
