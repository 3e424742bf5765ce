//! A test-rig session: one settings document, its stored calibrations, and the operations run
//! against them
//!
//! All state is held by [`Session`]; several sessions over different documents can coexist in one
//! process.

use std::path::PathBuf;

use log::info;

use crate::acquisition::{AcquisitionSource, AcquisitionWindow};
use crate::config::{CalibrationPlan, Config};
use crate::conversion::{
    pair, series, summarise, ConversionEngine, ConvertedSample, ForceDisplacement, Models,
    TestSummary,
};
use crate::fit::CurveFitter;
use crate::model::CalibrationModel;
use crate::reference::{RawSource, ReferenceSampleCollector, ReferenceSource};
use crate::sensor::SensorId;
use crate::store::CalibrationStore;
use crate::Result;

/// Everything produced by one test run, ready for plotting or export
#[derive(Clone, Debug)]
pub struct TestRun {
    pub window: AcquisitionWindow,
    /// Every converted sample in acquisition order
    pub converted: Vec<ConvertedSample>,
    pub force: Vec<ConvertedSample>,
    pub displacement: Vec<ConvertedSample>,
    pub pairs: Vec<ForceDisplacement>,
    pub summary: Option<TestSummary>,
}

pub struct Session {
    config: Config,
    store: CalibrationStore,
    fitter: CurveFitter,
}

impl Session {
    pub fn new(config: Config, store: CalibrationStore) -> Self {
        Self {
            config,
            store,
            fitter: CurveFitter::default(),
        }
    }

    /// Open the document at `path` for both settings and calibrations
    ///
    /// # Errors
    /// Returns an error if the document exists but its settings cannot be parsed or are invalid.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Config::from_path(&path)?;
        Ok(Self::new(config, CalibrationStore::new(path)))
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Calibrate `sensor` following its configured plan
    ///
    /// # Errors
    /// See [`Self::calibrate_with_plan`].
    pub fn calibrate<R: ReferenceSource, S: RawSource>(
        &self,
        sensor: SensorId,
        references: R,
        raw: S,
    ) -> Result<CalibrationModel> {
        let plan = self.config.plan(sensor).clone();
        self.calibrate_with_plan(sensor, &plan, references, raw)
    }

    /// Collect reference points, fit them and store the resulting model
    ///
    /// The stored model is only replaced once collection and fitting have both succeeded. A
    /// cancelled or failed session leaves the previous calibration in place.
    ///
    /// # Errors
    /// Returns any collection, fitting or persistence error.
    pub fn calibrate_with_plan<R: ReferenceSource, S: RawSource>(
        &self,
        sensor: SensorId,
        plan: &CalibrationPlan,
        references: R,
        raw: S,
    ) -> Result<CalibrationModel> {
        let mut collector = ReferenceSampleCollector::new(references, raw);
        let points = collector.collect(sensor, plan)?;
        let model = self.fitter.fit(sensor, &points, plan.degree)?;
        self.store.save(&model)?;
        info!("{sensor} calibration complete");
        Ok(model)
    }

    /// Load the models for both sensors
    ///
    /// # Errors
    /// Returns [`crate::error::Error::NotCalibrated`] for the first sensor with no stored model.
    pub fn load_models(&self) -> Result<Models> {
        SensorId::ALL
            .into_iter()
            .map(|sensor| -> Result<_> { Ok((sensor, self.store.load(sensor)?)) })
            .collect()
    }

    /// Acquire one test window, convert it and pair force with displacement
    ///
    /// # Errors
    /// Returns an error if either sensor is uncalibrated, the acquisition fails or maps to an
    /// unknown channel, or the channels cannot be aligned.
    pub fn run_test<A: AcquisitionSource>(&self, source: &mut A) -> Result<TestRun> {
        let models = self.load_models()?;
        let window = AcquisitionWindow::from(&self.config.test);
        info!(
            "running test at {} Hz for {} s",
            window.sampling_rate_hz,
            window.duration_s
        );

        let buffer = source.acquire(&window)?;
        let samples = buffer.samples(&self.config.channels)?;
        let converted = ConversionEngine::new(&models).convert(&samples)?;

        let force = series(&converted, SensorId::LoadCell);
        let displacement = series(&converted, SensorId::Ultrasonic);
        let pairs = pair(&displacement, &force)?;
        let summary = summarise(&pairs);
        if let Some(summary) = summary {
            info!(
                "max force {:.3} N at displacement {:.5} m",
                summary.max_force, summary.displacement_at_max_force
            );
        }

        Ok(TestRun {
            window,
            converted,
            force,
            displacement,
            pairs,
            summary,
        })
    }
}
