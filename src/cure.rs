//! Cure-rate speed ramp
//!
//! Laser exposure per unit length changes with resin depth, so the draw
//! speed is ramped linearly over the height of the print: `speed(h) = start
//! + (finish - start) * (h - base) / (total - base)`. The ramp is defined
//! only on `(base, total]`; callers clamp or reject heights outside the
//! sliced model.

use crate::error::{Result, SonolithError};

/// Draw speed at the given height on the calibrated cure ramp
///
/// `base_height_mm` is where the ramp starts (usually the top of the raft),
/// `total_height_mm` the top of the model. `start_speed` applies just above
/// the base and `finish_speed` at the top; `finish_speed` must exceed
/// `start_speed` since deeper resin cures faster.
pub fn speed_at_height(
    base_height_mm: f64,
    total_height_mm: f64,
    start_speed: f64,
    finish_speed: f64,
    height_mm: f64,
) -> Result<f64> {
    for (name, value) in [
        ("base height", base_height_mm),
        ("total height", total_height_mm),
        ("start speed", start_speed),
        ("finish speed", finish_speed),
        ("height", height_mm),
    ] {
        if !value.is_finite() {
            return Err(SonolithError::configuration(format!(
                "{} must be a finite value, got {}",
                name, value
            )));
        }
    }
    if total_height_mm <= base_height_mm {
        return Err(SonolithError::configuration(format!(
            "total height ({}) must exceed base height ({})",
            total_height_mm, base_height_mm
        )));
    }
    if !(start_speed > 0.0) {
        return Err(SonolithError::configuration(format!(
            "start speed must be positive, got {}",
            start_speed
        )));
    }
    if finish_speed <= start_speed {
        return Err(SonolithError::configuration(format!(
            "finish speed ({}) must exceed start speed ({})",
            finish_speed, start_speed
        )));
    }
    if height_mm <= base_height_mm || height_mm > total_height_mm {
        return Err(SonolithError::configuration(format!(
            "height {} is outside the ramp range ({}, {}]",
            height_mm, base_height_mm, total_height_mm
        )));
    }

    let fraction = (height_mm - base_height_mm) / (total_height_mm - base_height_mm);
    Ok(start_speed + (finish_speed - start_speed) * fraction)
}
