use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The sensors fitted to the tensile rig.
///
/// The serialised form doubles as the key of the sensor's section in the calibration document.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    /// Ultrasonic ranging sensor measuring crosshead displacement
    Ultrasonic,
    /// Load cell measuring specimen force
    LoadCell,
}

impl SensorId {
    pub const ALL: [Self; 2] = [Self::LoadCell, Self::Ultrasonic];

    pub const fn key(self) -> &'static str {
        match self {
            Self::Ultrasonic => "ultrasonic",
            Self::LoadCell => "load_cell",
        }
    }

    /// Engineering unit of the converted value
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Ultrasonic => "m",
            Self::LoadCell => "N",
        }
    }

    /// Polynomial degree used when the calibration plan does not name one.
    ///
    /// The load cell output is linear in force. Ultrasonic ranging drifts from linear over the
    /// working range so it gets a quadratic term.
    pub const fn default_degree(self) -> usize {
        match self {
            Self::Ultrasonic => 2,
            Self::LoadCell => 1,
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SensorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ultrasonic" | "displacement" => Ok(Self::Ultrasonic),
            "load_cell" | "force" => Ok(Self::LoadCell),
            other => Err(Error::Config(format!("unknown sensor `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SensorId;

    #[test]
    fn sensor_ids_parse_from_their_keys_and_aliases() {
        for sensor in SensorId::ALL {
            assert_eq!(sensor.key().parse::<SensorId>().unwrap(), sensor);
        }
        assert_eq!("Load-Cell".parse::<SensorId>().unwrap(), SensorId::LoadCell);
        assert_eq!("displacement".parse::<SensorId>().unwrap(), SensorId::Ultrasonic);
        assert!("strain_gauge".parse::<SensorId>().is_err());
    }

    #[test]
    fn serialised_form_matches_the_document_key() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            sensor: SensorId,
        }
        let rendered = toml::to_string(&Wrapper {
            sensor: SensorId::LoadCell,
        })
        .unwrap();
        assert_eq!(rendered.trim(), "sensor = \"load_cell\"");
    }
}
