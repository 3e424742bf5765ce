//! Boundary with the acquisition hardware
//!
//! The DAQ driver itself lives outside this crate. Whatever drives it hands back a completed
//! [`RawBuffer`] for a bounded window; the conversion pipeline only ever indexes into that buffer.
//! [`CsvCapture`] reads the same shape from a CSV file with one column per channel.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::{ChannelMap, TestSettings};
use crate::error::Error;
use crate::reference::RawSource;
use crate::sensor::SensorId;
use crate::Result;

/// One raw reading from one sensor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawSample {
    /// Position of the sample within its channel
    pub index: usize,
    pub sensor: SensorId,
    /// Voltage as read from the channel
    pub raw_value: f64,
}

/// A finite acquisition: how fast, for how long, and how many samples per channel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcquisitionWindow {
    pub sampling_rate_hz: f64,
    pub num_samples: usize,
    /// Configured length of the window; `num_samples` is this times the rate, truncated
    pub duration_s: f64,
}

impl From<&TestSettings> for AcquisitionWindow {
    fn from(settings: &TestSettings) -> Self {
        Self {
            sampling_rate_hz: settings.sampling_rate_hz,
            num_samples: settings.num_samples(),
            duration_s: settings.duration_s(),
        }
    }
}

impl AcquisitionWindow {
    /// A window of `num_samples` at `sampling_rate_hz`, lasting exactly as long as they take
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(sampling_rate_hz: f64, num_samples: usize) -> Self {
        Self {
            sampling_rate_hz,
            num_samples,
            duration_s: num_samples as f64 / sampling_rate_hz,
        }
    }

    /// Time of sample `index` in seconds
    ///
    /// Sample times are spread evenly from zero to the configured duration inclusive, so the
    /// first and last samples sit at the ends of the window.
    #[allow(clippy::cast_precision_loss)]
    pub fn time_of(&self, index: usize) -> f64 {
        if self.num_samples < 2 {
            return 0.;
        }
        self.duration_s * index as f64 / (self.num_samples - 1) as f64
    }
}

/// Samples captured on one named channel
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelData {
    pub name: String,
    pub samples: Vec<f64>,
}

/// A completed multi-channel capture
#[derive(Clone, Debug, PartialEq)]
pub struct RawBuffer {
    pub window: AcquisitionWindow,
    pub channels: Vec<ChannelData>,
}

impl RawBuffer {
    pub fn channel(&self, name: &str) -> Option<&ChannelData> {
        self.channels.iter().find(|channel| channel.name == name)
    }

    /// Flatten the capture into raw samples tagged with the sensor on each channel
    ///
    /// Samples are ordered channel by channel, each channel in acquisition order.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a captured channel with no sensor in `channels`.
    pub fn samples(&self, channels: &ChannelMap) -> Result<Vec<RawSample>> {
        let mut samples = Vec::with_capacity(self.channels.iter().map(|c| c.samples.len()).sum());
        for channel in &self.channels {
            let sensor = channels.sensor(&channel.name).ok_or_else(|| {
                Error::Config(format!("captured channel `{}` is not wired to a sensor", channel.name))
            })?;
            samples.extend(
                channel
                    .samples
                    .iter()
                    .enumerate()
                    .map(|(index, &raw_value)| RawSample {
                        index,
                        sensor,
                        raw_value,
                    }),
            );
        }
        Ok(samples)
    }
}

/// Anything that can run a finite acquisition and hand back the full buffer
pub trait AcquisitionSource {
    fn acquire(&mut self, window: &AcquisitionWindow) -> Result<RawBuffer>;
}

/// A capture stored as CSV: a header naming the channels, then one row per sample
///
/// A channel that stopped early leaves its trailing cells empty.
pub struct CsvCapture {
    path: PathBuf,
}

impl CsvCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(path: &Path) -> Result<Vec<ChannelData>> {
        let file = fs::read(path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(&file[..]);

        let mut channels = rdr
            .headers()?
            .iter()
            .map(|name| ChannelData {
                name: name.to_owned(),
                samples: vec![],
            })
            .collect::<Vec<_>>();
        let mut ended = vec![false; channels.len()];

        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            for (column, field) in record.iter().enumerate() {
                let Some(channel) = channels.get_mut(column) else {
                    break;
                };
                if field.is_empty() {
                    ended[column] = true;
                    continue;
                }
                if ended[column] {
                    return Err(Error::Config(format!(
                        "{}: channel `{}` resumes after a gap at row {}",
                        path.display(),
                        channel.name,
                        row + 1
                    )));
                }
                let value = field.parse::<f64>().map_err(|e| {
                    Error::Config(format!("{}: row {}: {e}", path.display(), row + 1))
                })?;
                channel.samples.push(value);
            }
        }
        Ok(channels)
    }
}

impl AcquisitionSource for CsvCapture {
    fn acquire(&mut self, window: &AcquisitionWindow) -> Result<RawBuffer> {
        let mut channels = Self::read(&self.path)?;
        for channel in &mut channels {
            if channel.samples.len() < window.num_samples {
                warn!(
                    "channel {} holds {} of {} samples",
                    channel.name,
                    channel.samples.len(),
                    window.num_samples
                );
            }
            channel.samples.truncate(window.num_samples);
        }
        debug!(
            "read {} channels from {}",
            channels.len(),
            self.path.display()
        );
        Ok(RawBuffer {
            window: *window,
            channels,
        })
    }
}

/// Calibration raw source backed by a queue of acquisitions, one per calibration point
///
/// Each request pulls the next capture and returns the channel wired to the requested sensor.
pub struct ChannelRawSource<A> {
    captures: VecDeque<A>,
    channels: ChannelMap,
    sampling_rate_hz: f64,
}

impl<A: AcquisitionSource> ChannelRawSource<A> {
    pub fn new(
        captures: impl IntoIterator<Item = A>,
        channels: ChannelMap,
        sampling_rate_hz: f64,
    ) -> Self {
        Self {
            captures: captures.into_iter().collect(),
            channels,
            sampling_rate_hz,
        }
    }
}

impl<A: AcquisitionSource> RawSource for ChannelRawSource<A> {
    fn acquire(&mut self, sensor: SensorId, num_samples: usize) -> Result<Vec<f64>> {
        let mut capture = self
            .captures
            .pop_front()
            .ok_or(Error::EmptyAcquisition(sensor))?;
        let name = self
            .channels
            .channel(sensor)
            .ok_or_else(|| Error::Config(format!("no channel is wired to {sensor}")))?;
        let window = AcquisitionWindow::from_samples(self.sampling_rate_hz, num_samples);
        let buffer = capture.acquire(&window)?;
        buffer
            .channel(name)
            .map(|channel| channel.samples.clone())
            .ok_or(Error::EmptyAcquisition(sensor))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use super::{AcquisitionSource, AcquisitionWindow, ChannelRawSource, CsvCapture};
    use crate::config::{ChannelMap, TestSettings};
    use crate::error::Error;
    use crate::reference::RawSource;
    use crate::sensor::SensorId;
    use crate::Result;

    #[test]
    fn time_axis_spans_the_window() {
        let window = AcquisitionWindow::from(&TestSettings {
            sampling_rate_hz: 100.,
            test_duration_ms: 500,
        });

        assert_eq!(window.num_samples, 50);
        assert_eq!(window.time_of(0), 0.);
        approx::assert_relative_eq!(window.time_of(49), 0.5);
    }

    #[test]
    fn time_axis_follows_the_configured_duration() {
        // 10 ms at 250 Hz holds two whole samples, which still span the full 10 ms
        let window = AcquisitionWindow::from(&TestSettings {
            sampling_rate_hz: 250.,
            test_duration_ms: 10,
        });

        assert_eq!(window.num_samples, 2);
        approx::assert_relative_eq!(window.time_of(1), 0.01);
    }

    #[test]
    fn csv_captures_map_channels_to_sensors() -> Result<()> {
        let tmp_dir = TempDir::new("csv_captures_map_channels_to_sensors")?;
        let path = tmp_dir.path().join("capture.csv");
        fs::write(&path, "ai0, ai1\n0.1, 2.0\n0.2, 2.1\n0.3,\n")?;
        let window = AcquisitionWindow::from_samples(1000., 3);

        let buffer = CsvCapture::new(&path).acquire(&window)?;
        let samples = buffer.samples(&ChannelMap::default())?;

        assert_eq!(buffer.channel("ai0").unwrap().samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel("ai1").unwrap().samples, vec![2.0, 2.1]);
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].sensor, SensorId::LoadCell);
        assert_eq!(samples[4].sensor, SensorId::Ultrasonic);
        assert_eq!(samples[4].index, 1);
        Ok(())
    }

    #[test]
    fn captures_longer_than_the_window_are_truncated() -> Result<()> {
        let tmp_dir = TempDir::new("captures_longer_than_the_window_are_truncated")?;
        let path = tmp_dir.path().join("capture.csv");
        fs::write(&path, "ai0\n1\n2\n3\n4\n")?;
        let window = AcquisitionWindow::from_samples(10., 2);

        let buffer = CsvCapture::new(&path).acquire(&window)?;

        assert_eq!(buffer.channels[0].samples, vec![1., 2.]);
        Ok(())
    }

    #[test]
    fn unmapped_channels_are_rejected() -> Result<()> {
        let tmp_dir = TempDir::new("unmapped_channels_are_rejected")?;
        let path = tmp_dir.path().join("capture.csv");
        fs::write(&path, "ai7\n1\n")?;
        let window = AcquisitionWindow::from_samples(10., 1);

        let buffer = CsvCapture::new(&path).acquire(&window)?;

        assert!(matches!(
            buffer.samples(&ChannelMap::default()),
            Err(Error::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn channel_source_serves_one_capture_per_point() -> Result<()> {
        let tmp_dir = TempDir::new("channel_source_serves_one_capture_per_point")?;
        let first = tmp_dir.path().join("first.csv");
        let second = tmp_dir.path().join("second.csv");
        fs::write(&first, "ai0,ai1\n0.5,1.5\n0.6,1.6\n")?;
        fs::write(&second, "ai0,ai1\n0.7,1.7\n")?;
        let mut source = ChannelRawSource::new(
            [CsvCapture::new(first), CsvCapture::new(second)],
            ChannelMap::default(),
            1000.,
        );

        assert_eq!(source.acquire(SensorId::Ultrasonic, 10)?, vec![1.5, 1.6]);
        assert_eq!(source.acquire(SensorId::Ultrasonic, 10)?, vec![1.7]);
        assert!(matches!(
            source.acquire(SensorId::Ultrasonic, 10),
            Err(Error::EmptyAcquisition(SensorId::Ultrasonic))
        ));
        Ok(())
    }
}
