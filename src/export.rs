//! CSV hand-off of converted results for plotting
//!
//! The crate draws nothing itself. These writers produce the two views a plot needs: the
//! converted channels over time and force against displacement.

use std::io::Write;

use serde::Serialize;

use crate::acquisition::AcquisitionWindow;
use crate::conversion::{ConvertedSample, ForceDisplacement};
use crate::sensor::SensorId;
use crate::Result;

#[derive(Serialize)]
struct TimeSeriesRow {
    time_s: f64,
    index: usize,
    sensor: SensorId,
    value: f64,
    unit: &'static str,
}

#[derive(Serialize)]
struct PairRow {
    time_s: f64,
    index: usize,
    displacement_m: f64,
    force_n: f64,
}

/// Write converted samples in long format, one row per sample
///
/// # Errors
/// Returns an error if a row cannot be written.
pub fn write_time_series<W: Write>(
    writer: W,
    window: &AcquisitionWindow,
    samples: &[ConvertedSample],
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for sample in samples {
        wtr.serialize(TimeSeriesRow {
            time_s: window.time_of(sample.index),
            index: sample.index,
            sensor: sample.sensor,
            value: sample.physical_value,
            unit: sample.sensor.unit(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the force against displacement view
///
/// # Errors
/// Returns an error if a row cannot be written.
pub fn write_force_displacement<W: Write>(
    writer: W,
    window: &AcquisitionWindow,
    pairs: &[ForceDisplacement],
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for pair in pairs {
        wtr.serialize(PairRow {
            time_s: window.time_of(pair.index),
            index: pair.index,
            displacement_m: pair.displacement,
            force_n: pair.force,
        })?;
    }
    wtr.flush()?;
    Ok(())
}
