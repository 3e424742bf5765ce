//! Test and calibration settings read from the rig's TOML document
//!
//! The document is shared with [`crate::store::CalibrationStore`], which owns the
//! `[calibration.*]` sections. Everything here is read-only: settings are edited by hand and the
//! readers ignore the calibration sections entirely.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sensor::SensorId;
use crate::Result;

/// Acceleration used to turn reference masses into forces, as on the bench
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Unit in which the calibration plan lists its reference values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Masses hung on the load cell, converted to newtons
    MassKg,
    ForceN,
    DistanceM,
    /// Target distances in millimetres, converted to metres
    DistanceMm,
}

/// A single reference the operator is asked to set up
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedReference {
    pub kind: ReferenceKind,
    pub value: f64,
}

impl PlannedReference {
    /// The reference expressed in the sensor's physical unit (N or m)
    pub fn known_value(&self) -> f64 {
        match self.kind {
            ReferenceKind::MassKg => self.value * STANDARD_GRAVITY,
            ReferenceKind::ForceN | ReferenceKind::DistanceM => self.value,
            ReferenceKind::DistanceMm => self.value / 1000.,
        }
    }

    /// What the operator has to do before the reading is taken
    pub fn instruction(&self) -> String {
        match self.kind {
            ReferenceKind::MassKg => format!("Place {} g on load cell.", self.value * 1000.),
            ReferenceKind::ForceN => format!("Apply {} N to load cell.", self.value),
            ReferenceKind::DistanceM => format!(
                "Place object {} mm away from ultrasonic sensor.",
                self.value * 1000.
            ),
            ReferenceKind::DistanceMm => format!(
                "Place object {} mm away from ultrasonic sensor.",
                self.value
            ),
        }
    }
}

/// Procedure for calibrating one sensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPlan {
    /// One entry per calibration point, in `reference_kind` units
    pub reference_values: Vec<f64>,
    pub reference_kind: ReferenceKind,
    /// Samples averaged (by median) into each raw value, one second at the calibration rate
    #[serde(default = "default_samples_per_point")]
    pub samples_per_point: usize,
    pub degree: usize,
}

const fn default_samples_per_point() -> usize {
    1000
}

impl CalibrationPlan {
    pub fn load_cell() -> Self {
        Self {
            reference_values: vec![0.0, 0.5, 1.0, 1.5, 2.0],
            reference_kind: ReferenceKind::MassKg,
            samples_per_point: default_samples_per_point(),
            degree: SensorId::LoadCell.default_degree(),
        }
    }

    pub fn ultrasonic() -> Self {
        Self {
            reference_values: vec![0.05, 0.10, 0.15, 0.20, 0.25],
            reference_kind: ReferenceKind::DistanceM,
            samples_per_point: default_samples_per_point(),
            degree: SensorId::Ultrasonic.default_degree(),
        }
    }

    pub fn planned_references(&self) -> impl Iterator<Item = PlannedReference> + '_ {
        self.reference_values.iter().map(|&value| PlannedReference {
            kind: self.reference_kind,
            value,
        })
    }

    fn validate(&self, sensor: SensorId) -> Result<()> {
        if self.degree == 0 {
            return Err(Error::Config(format!("{sensor}: degree must be at least 1")));
        }
        if self.samples_per_point == 0 {
            return Err(Error::Config(format!(
                "{sensor}: samples_per_point must be at least 1"
            )));
        }
        if self.reference_values.len() < self.degree + 1 {
            return Err(Error::Config(format!(
                "{sensor}: a degree {} fit needs at least {} reference values, {} listed",
                self.degree,
                self.degree + 1,
                self.reference_values.len()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plans {
    #[serde(default = "CalibrationPlan::load_cell")]
    pub load_cell: CalibrationPlan,
    #[serde(default = "CalibrationPlan::ultrasonic")]
    pub ultrasonic: CalibrationPlan,
}

impl Default for Plans {
    fn default() -> Self {
        Self {
            load_cell: CalibrationPlan::load_cell(),
            ultrasonic: CalibrationPlan::ultrasonic(),
        }
    }
}

/// Acquisition window for a test run
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub sampling_rate_hz: f64,
    pub test_duration_ms: u64,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1000.,
            test_duration_ms: 2000,
        }
    }
}

impl TestSettings {
    /// Samples per channel for the configured window
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn num_samples(&self) -> usize {
        (self.sampling_rate_hz * self.test_duration_ms as f64 / 1000.) as usize
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn duration_s(&self) -> f64 {
        self.test_duration_ms as f64 / 1000.
    }
}

/// Physical DAQ channel names and the sensor wired to each
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMap(BTreeMap<String, SensorId>);

impl Default for ChannelMap {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("ai0".to_owned(), SensorId::LoadCell),
            ("ai1".to_owned(), SensorId::Ultrasonic),
        ]))
    }
}

impl ChannelMap {
    pub fn sensor(&self, channel: &str) -> Option<SensorId> {
        self.0.get(channel).copied()
    }

    pub fn channel(&self, sensor: SensorId) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, wired)| **wired == sensor)
            .map(|(channel, _)| channel.as_str())
    }
}

/// Everything in the document apart from the stored calibrations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub test: TestSettings,
    #[serde(default)]
    pub channels: ChannelMap,
    #[serde(default)]
    pub plan: Plans,
}

impl Config {
    /// Read the settings sections of the document at `path`
    ///
    /// A missing document yields the defaults, so a fresh rig can calibrate before anything has
    /// been written.
    ///
    /// # Errors
    /// Returns an error if the document exists but cannot be read or parsed, or if the settings
    /// fail validation.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using default settings", path.display());
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub const fn plan(&self, sensor: SensorId) -> &CalibrationPlan {
        match sensor {
            SensorId::LoadCell => &self.plan.load_cell,
            SensorId::Ultrasonic => &self.plan.ultrasonic,
        }
    }

    /// # Errors
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !(self.test.sampling_rate_hz.is_finite() && self.test.sampling_rate_hz > 0.) {
            return Err(Error::Config(
                "sampling_rate_hz must be greater than zero".to_owned(),
            ));
        }
        if self.test.num_samples() == 0 {
            return Err(Error::Config(
                "test window must contain at least one sample".to_owned(),
            ));
        }
        for sensor in SensorId::ALL {
            self.plan(sensor).validate(sensor)?;
            if self.channels.channel(sensor).is_none() {
                return Err(Error::Config(format!("no channel is wired to {sensor}")));
            }
        }
        Ok(())
    }
}
