use thiserror::Error;

use crate::sensor::SensorId;

/// Failures raised by the calibration and conversion pipeline.
///
/// None of these are retried. Each aborts the requested operation and hands control back to the
/// session, which decides whether to re-collect data, re-run calibration or abandon the test.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer distinct raw readings than the polynomial has coefficients
    #[error("insufficient calibration data: {required} distinct raw values required, {distinct} collected")]
    InsufficientData { required: usize, distinct: usize },
    /// The least-squares system cannot be solved stably
    #[error("degenerate fit: {reason}")]
    DegenerateFit { reason: String },
    /// The store holds no model for the requested sensor
    #[error("sensor {0} has not been calibrated")]
    NotCalibrated(SensorId),
    /// Samples were produced by a sensor with no model in the conversion set
    #[error("no calibration supplied for sensor {0}")]
    MissingCalibration(SensorId),
    /// Force and displacement series cannot be paired sample by sample
    #[error("channels cannot be aligned: {0}")]
    ChannelAlignment(Misalignment),
    /// The channel produced no usable samples for a calibration point
    #[error("no samples acquired from sensor {0}")]
    EmptyAcquisition(SensorId),
    #[error("calibration cancelled")]
    Cancelled,
    /// A stored calibration section could not be turned back into a model
    #[error("invalid calibration record: {0}")]
    InvalidRecord(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
    #[error(transparent)]
    TomlEdit(#[from] toml_edit::TomlError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Why the force and displacement series could not be paired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Misalignment {
    /// One channel holds more samples than the other, typically because it stopped early
    #[error("{displacement} displacement samples, {force} force samples")]
    Length { displacement: usize, force: usize },
    /// Same length but no common index basis
    #[error("displacement index {displacement} against force index {force} at position {position}")]
    Index {
        position: usize,
        displacement: usize,
        force: usize,
    },
}

impl Error {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateFit {
            reason: reason.into(),
        }
    }
}
