use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::polyfit::horner;
use crate::reference::ReferencePoint;
use crate::sensor::SensorId;
use crate::Result;

/// Raw-value range the model was fitted over
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub min_raw: f64,
    pub max_raw: f64,
}

impl Domain {
    pub fn contains(&self, raw_value: f64) -> bool {
        (self.min_raw..=self.max_raw).contains(&raw_value)
    }
}

/// Advisory fit metrics, in the sensor's physical unit
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub residual_sum_of_squares: f64,
    pub max_abs_residual: f64,
}

/// A fitted conversion from raw voltage to physical units for one sensor
///
/// Models are never edited. A new calibration produces a new model which replaces the stored one
/// wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationModel {
    sensor_id: SensorId,
    degree: usize,
    /// Ascending powers of the raw value
    coefficients: Vec<f64>,
    domain: Domain,
    created_at: DateTime<Utc>,
    quality: Option<FitQuality>,
    reference_points: Vec<ReferencePoint>,
}

impl CalibrationModel {
    pub(crate) fn new(
        sensor_id: SensorId,
        coefficients: Vec<f64>,
        domain: Domain,
        quality: FitQuality,
        reference_points: Vec<ReferencePoint>,
    ) -> Self {
        Self {
            sensor_id,
            degree: coefficients.len() - 1,
            coefficients,
            domain,
            created_at: Utc::now(),
            quality: Some(quality),
            reference_points,
        }
    }

    /// Convert a raw reading to the sensor's physical unit
    ///
    /// Readings outside [`Self::domain`] are extrapolated, not rejected.
    pub fn evaluate(&self, raw_value: f64) -> f64 {
        horner(&self.coefficients, raw_value)
    }

    pub const fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    pub const fn degree(&self) -> usize {
        self.degree
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub const fn domain(&self) -> Domain {
        self.domain
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Fit metrics, absent for models stored without them
    pub const fn quality(&self) -> Option<FitQuality> {
        self.quality
    }

    /// The points the model was fitted to, in collection order
    pub fn reference_points(&self) -> &[ReferencePoint] {
        &self.reference_points
    }

    pub fn serialize(&self) -> CalibrationRecord {
        CalibrationRecord {
            sensor_id: self.sensor_id,
            degree: self.degree,
            coefficients: self.coefficients.clone(),
            domain: self.domain,
            created_at: self.created_at,
            quality: self.quality,
            reference_points: self.reference_points.clone(),
        }
    }

    /// Rebuild a model from a stored record
    ///
    /// Coefficients are copied as stored, never refitted from the reference points.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRecord`] if the record is internally inconsistent: degree zero, a
    /// coefficient count other than `degree + 1`, non-finite coefficients or an inverted domain.
    pub fn deserialize(record: CalibrationRecord) -> Result<Self> {
        let sensor = record.sensor_id;
        if record.degree == 0 {
            return Err(Error::InvalidRecord(format!("{sensor}: degree must be at least 1")));
        }
        if record.coefficients.len() != record.degree + 1 {
            return Err(Error::InvalidRecord(format!(
                "{sensor}: degree {} needs {} coefficients, found {}",
                record.degree,
                record.degree + 1,
                record.coefficients.len()
            )));
        }
        if record.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidRecord(format!(
                "{sensor}: coefficients must be finite"
            )));
        }
        let Domain { min_raw, max_raw } = record.domain;
        if !(min_raw.is_finite() && max_raw.is_finite() && min_raw <= max_raw) {
            return Err(Error::InvalidRecord(format!(
                "{sensor}: invalid domain [{min_raw}, {max_raw}]"
            )));
        }

        Ok(Self {
            sensor_id: record.sensor_id,
            degree: record.degree,
            coefficients: record.coefficients,
            domain: record.domain,
            created_at: record.created_at,
            quality: record.quality,
            reference_points: record.reference_points,
        })
    }
}

/// On-disk form of a [`CalibrationModel`], one per sensor section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub sensor_id: SensorId,
    pub degree: usize,
    pub coefficients: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<FitQuality>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_points: Vec<ReferencePoint>,
}
