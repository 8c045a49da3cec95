//! Path translation: machine-space moves to deflection samples
//!
//! A `(from, to, speed)` segment becomes a straight-line trajectory sampled
//! at the modulator's trajectory rate, sized so that traversal time equals
//! `distance / speed`. Machine coordinates are normalized to [-1, 1] by the
//! configured build-area half-extent; values outside the build area pass
//! through unclamped and are bounded later by the device writer.

use crate::error::{Result, SonolithError};
use crate::geometry::Position3;

/// Translates lateral segments into normalized deflection samples
#[derive(Debug, Clone)]
pub struct PathTranslator {
    samples_per_second: f64,
    max_deflection_mm: f64,
}

impl PathTranslator {
    /// `samples_per_second` comes from the modulator's cycle geometry;
    /// `max_deflection_mm` is the build-area half-extent.
    pub fn new(samples_per_second: u32, max_deflection_mm: f64) -> Result<Self> {
        if samples_per_second == 0 {
            return Err(SonolithError::configuration(
                "trajectory sample rate must be non-zero",
            ));
        }
        if !(max_deflection_mm > 0.0) || !max_deflection_mm.is_finite() {
            return Err(SonolithError::configuration(format!(
                "build-area half-extent must be a positive finite value, got {}",
                max_deflection_mm
            )));
        }
        Ok(PathTranslator {
            samples_per_second: samples_per_second as f64,
            max_deflection_mm,
        })
    }

    /// Produce the trajectory for one straight segment
    ///
    /// The returned iterator is finite and freshly restartable per call.
    /// Zero-distance segments yield a single sample at the destination so the
    /// galvos stay energized without any division by zero.
    pub fn process(&self, from: Position3, to: Position3, speed: f64) -> Result<Trajectory> {
        if !(speed > 0.0) || !speed.is_finite() {
            return Err(SonolithError::configuration(format!(
                "segment speed must be a positive finite value, got {}",
                speed
            )));
        }
        let distance = from.xy().distance_to(to.xy());
        let samples = if distance == 0.0 {
            1
        } else {
            ((distance / speed) * self.samples_per_second).ceil().max(1.0) as usize
        };
        Ok(Trajectory {
            from_x: from.x / self.max_deflection_mm,
            from_y: from.y / self.max_deflection_mm,
            to_x: to.x / self.max_deflection_mm,
            to_y: to.y / self.max_deflection_mm,
            samples,
            index: 0,
        })
    }
}

/// Lazy straight-line interpolation between two normalized positions
///
/// Emits `samples` points, ending exactly at the destination.
#[derive(Debug, Clone)]
pub struct Trajectory {
    from_x: f64,
    from_y: f64,
    to_x: f64,
    to_y: f64,
    samples: usize,
    index: usize,
}

impl Iterator for Trajectory {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<(f64, f64)> {
        if self.index >= self.samples {
            return None;
        }
        self.index += 1;
        let t = self.index as f64 / self.samples as f64;
        Some((
            self.from_x + (self.to_x - self.from_x) * t,
            self.from_y + (self.to_y - self.from_y) * t,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Trajectory {}
