//! Drip-based Z axis
//!
//! The printer has no Z stepper. Resin is fed by a dripper, each drip is
//! heard as a pulse on an audio input channel, and the calibrated
//! drips-per-mm factor turns the running drip count into the physically
//! observed resin height. The count only ever grows (apart from explicit
//! resets), so the derived Z estimate is monotonically non-decreasing.

mod calibration;

pub use calibration::{CalibrationSession, DripCalibration};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::audio::{CpalInputStream, InputSink};
use crate::config::AudioInputConfig;
use crate::error::{Result, SonolithError};

/// Default detection threshold on the normalized input signal
const DEFAULT_THRESHOLD: f32 = 0.5;

/// Observed Z height source polled by the layer processor
///
/// `move_to` is a soft look-ahead hint, not an actuator command; the tracked
/// physical height is ground truth.
pub trait ZAxis: Send {
    /// Begin acquisition
    fn start(&mut self) -> Result<()>;
    /// Record the current look-ahead target in mm
    fn move_to(&self, z_mm: f64);
    /// Physically observed height in mm
    fn current_z_location_mm(&self) -> Result<f64>;
    /// Raw drip count
    fn drip_count(&self) -> u32;
    /// Set the drip counter to an absolute value
    fn reset(&self, drip_count: u32);
    /// Stop acquisition and release the input device
    fn stop(&mut self) -> Result<()>;
}

/// Rising-edge counter over the normalized input signal
///
/// A drip is one threshold crossing with hysteresis: the detector re-arms
/// only after the signal falls back below half the threshold, so a single
/// pulse cannot count twice. Fed from the input stream's callback thread.
pub struct EdgeDetector {
    drips: AtomicU32,
    armed: AtomicBool,
    high: f32,
    low: f32,
}

impl EdgeDetector {
    pub fn new(threshold: f32) -> Self {
        EdgeDetector {
            drips: AtomicU32::new(0),
            armed: AtomicBool::new(true),
            high: threshold,
            low: threshold / 2.0,
        }
    }

    pub fn count(&self) -> u32 {
        self.drips.load(Ordering::Acquire)
    }

    pub fn reset(&self, count: u32) {
        self.drips.store(count, Ordering::Release);
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        EdgeDetector::new(DEFAULT_THRESHOLD)
    }
}

impl InputSink for EdgeDetector {
    fn feed(&self, samples: &[f32]) {
        for &sample in samples {
            if self.armed.load(Ordering::Relaxed) {
                if sample > self.high {
                    self.drips.fetch_add(1, Ordering::AcqRel);
                    self.armed.store(false, Ordering::Relaxed);
                }
            } else if sample < self.low {
                self.armed.store(true, Ordering::Relaxed);
            }
        }
    }
}

/// Acquisition state of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Stopped,
    Running,
}

/// Z tracker driven by drip edges on an audio input channel
///
/// `current_z_location_mm = drip_count / drips_per_mm`. The counter is owned
/// by the acquisition side (the input stream callback) and exposed read-only
/// here; the calibration factor is set by configuration or a calibration
/// session.
pub struct DripBasedZAxis {
    detector: Arc<EdgeDetector>,
    input_config: AudioInputConfig,
    input: Option<CpalInputStream>,
    state: TrackerState,
    drips_per_mm: Mutex<Option<f64>>,
    hint_mm: Mutex<f64>,
}

impl DripBasedZAxis {
    pub fn new(input_config: AudioInputConfig) -> Self {
        DripBasedZAxis {
            detector: Arc::new(EdgeDetector::default()),
            input_config,
            input: None,
            state: TrackerState::Stopped,
            drips_per_mm: Mutex::new(None),
            hint_mm: Mutex::new(0.0),
        }
    }

    /// Tracker with a pre-calibrated drips-per-mm factor
    pub fn with_drips_per_mm(input_config: AudioInputConfig, drips_per_mm: f64) -> Result<Self> {
        let axis = DripBasedZAxis::new(input_config);
        axis.set_drips_per_mm(drips_per_mm)?;
        Ok(axis)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Set the calibration factor; must be positive and finite
    pub fn set_drips_per_mm(&self, drips_per_mm: f64) -> Result<()> {
        if !(drips_per_mm > 0.0) || !drips_per_mm.is_finite() {
            return Err(SonolithError::configuration(format!(
                "drips per mm must be a positive finite value, got {}",
                drips_per_mm
            )));
        }
        *self.drips_per_mm.lock().unwrap() = Some(drips_per_mm);
        Ok(())
    }

    /// The edge detector, for wiring into an external sample source
    pub fn detector(&self) -> Arc<EdgeDetector> {
        self.detector.clone()
    }

    /// The current look-ahead hint in mm
    pub fn hint_mm(&self) -> f64 {
        *self.hint_mm.lock().unwrap()
    }
}

impl ZAxis for DripBasedZAxis {
    fn start(&mut self) -> Result<()> {
        if self.state == TrackerState::Running {
            return Err(SonolithError::lifecycle("drip tracker is already running"));
        }
        let sink: Arc<dyn InputSink> = self.detector.clone();
        self.input = Some(CpalInputStream::open(self.input_config, sink)?);
        self.state = TrackerState::Running;
        info!(
            "Drip tracker listening at {} Hz, {}-bit",
            self.input_config.sample_rate, self.input_config.bit_depth
        );
        Ok(())
    }

    fn move_to(&self, z_mm: f64) {
        *self.hint_mm.lock().unwrap() = z_mm;
        debug!("Drip target hint moved to {:.3} mm", z_mm);
    }

    fn current_z_location_mm(&self) -> Result<f64> {
        let drips_per_mm = self.drips_per_mm.lock().unwrap().ok_or_else(|| {
            SonolithError::configuration("drips per mm is unset; calibrate the dripper first")
        })?;
        Ok(self.detector.count() as f64 / drips_per_mm)
    }

    fn drip_count(&self) -> u32 {
        self.detector.count()
    }

    fn reset(&self, drip_count: u32) {
        self.detector.reset(drip_count);
    }

    fn stop(&mut self) -> Result<()> {
        // Safe to call when already stopped
        if let Some(mut input) = self.input.take() {
            input.close()?;
        }
        if self.state == TrackerState::Running {
            self.state = TrackerState::Stopped;
            info!("Drip tracker stopped");
        }
        Ok(())
    }
}

impl Drop for DripBasedZAxis {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
