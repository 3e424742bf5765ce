//! Collection of (known reference, raw reading) pairs for a single sensor
//!
//! The operator side and the device side of a calibration session are both traits, so the
//! collector can be driven by a console prompt and a live channel on the rig, or by scripted
//! values in tests.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationPlan, PlannedReference};
use crate::error::Error;
use crate::sensor::SensorId;
use crate::Result;

/// A known physical quantity and the raw reading the sensor produced for it
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub known_value: f64,
    pub raw_value: f64,
}

/// Supplies the known physical value for each calibration point.
pub trait ReferenceSource {
    /// Obtain the reference for point `index` of the plan.
    ///
    /// Returning [`Error::Cancelled`] aborts the session; nothing collected so far is kept.
    fn reference(
        &mut self,
        sensor: SensorId,
        index: usize,
        planned: &PlannedReference,
    ) -> Result<f64>;
}

/// Reads a block of raw samples from the channel wired to a sensor.
pub trait RawSource {
    fn acquire(&mut self, sensor: SensorId, num_samples: usize) -> Result<Vec<f64>>;
}

/// Interactive source that asks the operator to set up each planned reference
///
/// Mirrors the bench procedure: the operator places the mass or target, then answers `y` to
/// record or `c` to cancel. Anything else repeats the prompt.
pub struct ConsoleReferenceSource<I, O> {
    input: I,
    output: O,
}

impl<I: BufRead, O: Write> ConsoleReferenceSource<I, O> {
    pub const fn new(input: I, output: O) -> Self {
        Self { input, output }
    }
}

impl<I: BufRead, O: Write> ReferenceSource for ConsoleReferenceSource<I, O> {
    fn reference(
        &mut self,
        _sensor: SensorId,
        _index: usize,
        planned: &PlannedReference,
    ) -> Result<f64> {
        writeln!(self.output, "\n{}", planned.instruction())?;
        loop {
            write!(self.output, "Press 'y' when ready or 'c' to cancel: ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // Input closed mid-session
                return Err(Error::Cancelled);
            }
            match line.trim() {
                "y" | "Y" => return Ok(planned.known_value()),
                "c" | "C" => {
                    writeln!(self.output, "\nCalibration cancelled.")?;
                    return Err(Error::Cancelled);
                }
                _ => writeln!(self.output, "\nError. Please press 'y' to confirm or 'c' to cancel.")?,
            }
        }
    }
}

/// Non-interactive source returning a fixed list of known values in order
///
/// Values are taken as already expressed in the sensor's physical unit; the plan's entries are
/// ignored. Running out of values cancels the session.
pub struct ScriptedReferenceSource {
    values: VecDeque<f64>,
}

impl ScriptedReferenceSource {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl ReferenceSource for ScriptedReferenceSource {
    fn reference(&mut self, _: SensorId, _: usize, _: &PlannedReference) -> Result<f64> {
        self.values.pop_front().ok_or(Error::Cancelled)
    }
}

/// In-memory raw source replaying pre-recorded buffers, one per calibration point
pub struct BufferedRawSource {
    buffers: VecDeque<Vec<f64>>,
}

impl BufferedRawSource {
    pub fn new(buffers: impl IntoIterator<Item = Vec<f64>>) -> Self {
        Self {
            buffers: buffers.into_iter().collect(),
        }
    }

    /// One single-sample buffer per reading
    pub fn from_readings(readings: impl IntoIterator<Item = f64>) -> Self {
        Self::new(readings.into_iter().map(|reading| vec![reading]))
    }
}

impl RawSource for BufferedRawSource {
    fn acquire(&mut self, sensor: SensorId, _num_samples: usize) -> Result<Vec<f64>> {
        self.buffers
            .pop_front()
            .ok_or(Error::EmptyAcquisition(sensor))
    }
}

/// Median of a block of samples, averaging the middle pair for even lengths
pub(crate) fn median(samples: &[f64]) -> Option<f64> {
    let sorted = samples
        .iter()
        .copied()
        .filter(|sample| sample.is_finite())
        .sorted_by(f64::total_cmp)
        .collect::<Vec<_>>();
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[mid]),
        _ => Some((sorted[mid - 1] + sorted[mid]) / 2.),
    }
}

/// Number of distinct raw values among the collected points
pub(crate) fn distinct_raw_values(points: &[ReferencePoint]) -> usize {
    points
        .iter()
        .map(|point| point.raw_value)
        .sorted_by(f64::total_cmp)
        .dedup()
        .count()
}

/// Walks the operator through a calibration plan, pairing each reference with a raw reading
pub struct ReferenceSampleCollector<R, S> {
    references: R,
    raw: S,
}

impl<R: ReferenceSource, S: RawSource> ReferenceSampleCollector<R, S> {
    pub const fn new(references: R, raw: S) -> Self {
        Self { references, raw }
    }

    /// Collect one reference point per planned reference
    ///
    /// Each raw value is the median of `plan.samples_per_point` samples, which rejects the
    /// occasional spike from the ultrasonic sensor.
    ///
    /// # Errors
    /// - [`Error::Cancelled`] if the operator aborts, discarding every collected point
    /// - [`Error::EmptyAcquisition`] if the channel returns no usable samples
    /// - [`Error::InsufficientData`] if fewer than `degree + 1` distinct raw values were recorded
    pub fn collect(
        &mut self,
        sensor: SensorId,
        plan: &CalibrationPlan,
    ) -> Result<Vec<ReferencePoint>> {
        info!("calibrating {sensor} with {} reference points", plan.reference_values.len());

        let mut points = Vec::with_capacity(plan.reference_values.len());
        for (index, planned) in plan.planned_references().enumerate() {
            let known_value = self.references.reference(sensor, index, &planned)?;
            let samples = self.raw.acquire(sensor, plan.samples_per_point)?;
            let raw_value = median(&samples).ok_or(Error::EmptyAcquisition(sensor))?;
            debug!(
                "{sensor} point {index}: {known_value} {} <- {raw_value} V from {} samples",
                sensor.unit(),
                samples.len()
            );
            points.push(ReferencePoint {
                known_value,
                raw_value,
            });
        }

        let required = plan.degree + 1;
        let distinct = distinct_raw_values(&points);
        if distinct < required {
            return Err(Error::InsufficientData { required, distinct });
        }

        info!("{sensor} calibration data collected");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{
        median, BufferedRawSource, ConsoleReferenceSource, ReferencePoint,
        ReferenceSampleCollector, ScriptedReferenceSource,
    };
    use crate::config::{CalibrationPlan, ReferenceKind};
    use crate::error::Error;
    use crate::sensor::SensorId;
    use crate::Result;

    fn load_cell_plan() -> CalibrationPlan {
        CalibrationPlan {
            reference_values: vec![0.0, 0.5, 1.0],
            reference_kind: ReferenceKind::MassKg,
            samples_per_point: 5,
            degree: 1,
        }
    }

    #[test]
    fn medians_of_odd_and_even_blocks() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn console_prompts_convert_masses_to_force() -> Result<()> {
        let input = Cursor::new("y\nnope\nY\ny\n");
        let mut output = Vec::new();
        let raw = BufferedRawSource::new(vec![
            vec![0.01, 0.02, 0.01, 0.5, 0.01],
            vec![0.52; 5],
            vec![1.03, 1.02, 1.04, 1.03, 1.03],
        ]);
        let mut collector =
            ReferenceSampleCollector::new(ConsoleReferenceSource::new(input, &mut output), raw);

        let points = collector.collect(SensorId::LoadCell, &load_cell_plan())?;
        drop(collector);

        let expected = [(0.0, 0.01), (0.5 * 9.81, 0.52), (9.81, 1.03)];
        assert_eq!(points.len(), expected.len());
        for (point, (known, raw)) in points.iter().zip(expected) {
            approx::assert_relative_eq!(point.known_value, known);
            approx::assert_relative_eq!(point.raw_value, raw);
        }

        let transcript = String::from_utf8(output).unwrap();
        assert!(transcript.contains("Place 500 g on load cell."));
        assert!(transcript.contains("Error. Please press 'y'"));
        Ok(())
    }

    #[test]
    fn cancelling_discards_the_session() {
        let input = Cursor::new("y\nc\n");
        let raw = BufferedRawSource::from_readings([0.01, 0.52, 1.03]);
        let mut collector =
            ReferenceSampleCollector::new(ConsoleReferenceSource::new(input, Vec::new()), raw);

        let result = collector.collect(SensorId::LoadCell, &load_cell_plan());

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn scripted_references_override_the_plan() -> Result<()> {
        let references = ScriptedReferenceSource::new([0.0, 10.0, 20.0]);
        let raw = BufferedRawSource::from_readings([0.01, 0.52, 1.03]);
        let mut collector = ReferenceSampleCollector::new(references, raw);

        let points = collector.collect(SensorId::LoadCell, &load_cell_plan())?;

        assert_eq!(
            points,
            vec![
                ReferencePoint {
                    known_value: 0.0,
                    raw_value: 0.01
                },
                ReferencePoint {
                    known_value: 10.0,
                    raw_value: 0.52
                },
                ReferencePoint {
                    known_value: 20.0,
                    raw_value: 1.03
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn repeated_raw_values_are_insufficient() {
        let references = ScriptedReferenceSource::new([0.0, 10.0, 20.0]);
        let raw = BufferedRawSource::from_readings([0.4, 0.4, 0.4]);
        let mut collector = ReferenceSampleCollector::new(references, raw);

        let result = collector.collect(SensorId::LoadCell, &load_cell_plan());

        assert!(matches!(
            result,
            Err(Error::InsufficientData {
                required: 2,
                distinct: 1
            })
        ));
    }

    #[test]
    fn exhausted_channel_reports_empty_acquisition() {
        let references = ScriptedReferenceSource::new([0.0, 10.0, 20.0]);
        let raw = BufferedRawSource::new(vec![vec![0.1], vec![]]);
        let mut collector = ReferenceSampleCollector::new(references, raw);

        let result = collector.collect(SensorId::LoadCell, &load_cell_plan());

        assert!(matches!(
            result,
            Err(Error::EmptyAcquisition(SensorId::LoadCell))
        ));
    }
}
