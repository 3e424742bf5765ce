//! Persistence of calibration models in the rig's TOML document
//!
//! Models live under `[calibration.<sensor>]`. The rest of the document (test settings, channel
//! map, calibration plans) belongs to other readers and is hand-edited, so writes go through
//! `toml_edit` and leave its text, comments and ordering as they were.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use toml::{Table, Value};
use toml_edit::{DocumentMut, Item};

use crate::error::Error;
use crate::model::{CalibrationModel, CalibrationRecord};
use crate::sensor::SensorId;
use crate::Result;

const CALIBRATION_SECTION: &str = "calibration";

/// File-backed store of one [`CalibrationModel`] per sensor
#[derive(Clone, Debug)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the model stored for `sensor`
    ///
    /// # Errors
    /// - [`Error::NotCalibrated`] if the document or the sensor's section does not exist
    /// - [`Error::InvalidRecord`] if the section exists but does not describe a valid model
    pub fn load(&self, sensor: SensorId) -> Result<CalibrationModel> {
        let document = self.read_document()?;
        let section = calibration_section(&document)?
            .and_then(|section| section.get(sensor.key()))
            .ok_or(Error::NotCalibrated(sensor))?;
        let model = parse_model(sensor, section.clone())?;
        debug!("loaded {sensor} calibration from {}", self.path.display());
        Ok(model)
    }

    /// Load every model present, skipping sensors that were never calibrated
    ///
    /// # Errors
    /// Returns an error if the document cannot be read or a stored section is invalid.
    pub fn load_all(&self) -> Result<BTreeMap<SensorId, CalibrationModel>> {
        let mut models = BTreeMap::new();
        for sensor in SensorId::ALL {
            match self.load(sensor) {
                Ok(model) => {
                    models.insert(sensor, model);
                }
                Err(Error::NotCalibrated(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(models)
    }

    /// Store `model`, replacing any earlier model for the same sensor
    ///
    /// The document is rewritten to a temporary file beside it and renamed into place, so a
    /// reader sees either the previous document or the new one in full. If anything fails before
    /// the rename the previous document is left as it was.
    ///
    /// # Errors
    /// Returns an error if the existing document cannot be parsed, its `calibration` entry is not
    /// a table, or the new document cannot be written.
    pub fn save(&self, model: &CalibrationModel) -> Result<()> {
        let sensor = model.sensor_id();
        let mut document = self.read_editable()?;

        let record = toml::to_string(&model.serialize())?.parse::<DocumentMut>()?;
        let mut section = record.as_table().clone();
        // Headers are written in position order; the new section goes after everything else
        let mut next_position = last_position(document.as_table()) + 1;
        renumber(&mut section, &mut next_position);

        let mut implicit = toml_edit::Table::new();
        implicit.set_implicit(true);
        let Some(calibration) = document
            .entry(CALIBRATION_SECTION)
            .or_insert(Item::Table(implicit))
            .as_table_mut()
        else {
            return Err(Error::InvalidRecord(format!(
                "`{CALIBRATION_SECTION}` in {} is not a table",
                self.path.display()
            )));
        };
        calibration.insert(sensor.key(), Item::Table(section));

        self.replace_document(&document.to_string())?;
        info!(
            "saved {sensor} calibration (degree {}) to {}",
            model.degree(),
            self.path.display()
        );
        Ok(())
    }

    fn read_document(&self) -> Result<Table> {
        if !self.path.exists() {
            return Ok(Table::new());
        }
        Ok(fs::read_to_string(&self.path)?.parse::<Table>()?)
    }

    fn read_editable(&self) -> Result<DocumentMut> {
        if !self.path.exists() {
            return Ok(DocumentMut::new());
        }
        Ok(fs::read_to_string(&self.path)?.parse::<DocumentMut>()?)
    }

    fn replace_document(&self, contents: &str) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| Error::Config(format!("{} is not a file path", self.path.display())))?
            .to_string_lossy();
        let temp_path = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

        let written = File::create(&temp_path).and_then(|mut file| {
            file.write_all(contents.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // Atomic rename: move temp -> final
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn calibration_section(document: &Table) -> Result<Option<&Table>> {
    match document.get(CALIBRATION_SECTION) {
        None => Ok(None),
        Some(Value::Table(section)) => Ok(Some(section)),
        Some(_) => Err(Error::InvalidRecord(format!(
            "`{CALIBRATION_SECTION}` is not a table"
        ))),
    }
}

fn last_position(table: &toml_edit::Table) -> usize {
    table
        .iter()
        .fold(table.position().unwrap_or(0), |last, (_, item)| {
            let nested = match item {
                Item::Table(table) => last_position(table),
                Item::ArrayOfTables(array) => array.iter().map(last_position).max().unwrap_or(0),
                _ => 0,
            };
            last.max(nested)
        })
}

fn renumber(table: &mut toml_edit::Table, next: &mut usize) {
    table.set_position(*next);
    *next += 1;
    for (_, item) in table.iter_mut() {
        match item {
            Item::Table(table) => renumber(table, next),
            Item::ArrayOfTables(array) => {
                for table in array.iter_mut() {
                    renumber(table, next);
                }
            }
            _ => {}
        }
    }
}

fn parse_model(sensor: SensorId, section: Value) -> Result<CalibrationModel> {
    let record: CalibrationRecord = section
        .try_into()
        .map_err(|e: toml::de::Error| Error::InvalidRecord(format!("{sensor}: {e}")))?;
    if record.sensor_id != sensor {
        return Err(Error::InvalidRecord(format!(
            "section `{sensor}` holds a calibration for {}",
            record.sensor_id
        )));
    }
    CalibrationModel::deserialize(record)
}
