//! Dripper calibration
//!
//! Calibration measures how many drips raise the resin level by one
//! millimeter: run the dripper, let the level rise to a known target height,
//! then mark the drip count. `drips_per_mm = marked_drip_count /
//! target_height_mm`, computed on demand.

use log::info;

use crate::drip::{DripBasedZAxis, ZAxis};
use crate::error::{Result, SonolithError};

/// Calibration marker state for one session
///
/// The target height must be set (and positive) before marking is permitted.
#[derive(Debug, Clone, Default)]
pub struct DripCalibration {
    target_height_mm: Option<f64>,
    marked_drip_count: Option<u32>,
}

impl DripCalibration {
    pub fn new() -> Self {
        DripCalibration::default()
    }

    /// Set the known height the resin will rise to
    pub fn set_target_height(&mut self, height_mm: f64) -> Result<()> {
        if !(height_mm > 0.0) || !height_mm.is_finite() {
            return Err(SonolithError::configuration(format!(
                "target height must be a positive numeric value, got {}",
                height_mm
            )));
        }
        self.target_height_mm = Some(height_mm);
        Ok(())
    }

    /// Capture the drip count observed at the target height
    pub fn mark_at_target(&mut self, current_drip_count: u32) -> Result<()> {
        if self.target_height_mm.is_none() {
            return Err(SonolithError::lifecycle(
                "target height must be specified before marking the end point",
            ));
        }
        self.marked_drip_count = Some(current_drip_count);
        Ok(())
    }

    /// The calibrated factor, computed on demand
    pub fn drips_per_mm(&self) -> Result<f64> {
        match (self.marked_drip_count, self.target_height_mm) {
            (Some(marked), Some(target)) => Ok(marked as f64 / target),
            _ => Err(SonolithError::lifecycle(
                "mark the drip count at the target height before reading drips per mm",
            )),
        }
    }

    pub fn target_height_mm(&self) -> Option<f64> {
        self.target_height_mm
    }

    pub fn marked_drip_count(&self) -> Option<u32> {
        self.marked_drip_count
    }
}

/// One interactive calibration run against a live drip tracker
///
/// Owns the tracker for the duration of the session; the UI polls
/// `drip_count` while the operator watches the resin rise.
pub struct CalibrationSession {
    zaxis: DripBasedZAxis,
    calibration: DripCalibration,
}

impl CalibrationSession {
    pub fn new(zaxis: DripBasedZAxis) -> Self {
        CalibrationSession {
            zaxis,
            calibration: DripCalibration::new(),
        }
    }

    /// Begin counting drips
    pub fn start(&mut self) -> Result<()> {
        self.zaxis.start()
    }

    pub fn drip_count(&self) -> u32 {
        self.zaxis.drip_count()
    }

    pub fn reset_drips(&self) {
        self.zaxis.reset(0);
    }

    pub fn set_target_height(&mut self, height_mm: f64) -> Result<()> {
        self.calibration.set_target_height(height_mm)
    }

    /// Mark the current drip count against the configured target height
    pub fn mark_drips_at_target(&mut self) -> Result<()> {
        self.calibration.mark_at_target(self.zaxis.drip_count())?;
        info!(
            "Marked {} drips at {:.2} mm",
            self.calibration.marked_drip_count().unwrap_or(0),
            self.calibration.target_height_mm().unwrap_or(0.0)
        );
        Ok(())
    }

    pub fn drips_per_mm(&self) -> Result<f64> {
        self.calibration.drips_per_mm()
    }

    /// Stop counting and release the tracker
    pub fn stop(mut self) -> Result<DripBasedZAxis> {
        self.zaxis.stop()?;
        Ok(self.zaxis)
    }
}
