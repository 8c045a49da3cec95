//! Printer configuration surface
//!
//! The core consumes these structs read-only; loading, persistence, and the
//! calibration dialogs that populate them live outside this crate. Defaults
//! match the reference hardware profile (48 kHz, 16-bit output).

use serde::{Deserialize, Serialize};

use crate::error::{Result, SonolithError};

/// Carrier frequency pair for a given output sample rate
///
/// The on/off modulation frequencies are a fixed function of the sample rate,
/// chosen so both divide it evenly. They are not independently configurable.
pub fn carrier_frequencies(sample_rate: u32) -> Result<(u32, u32)> {
    match sample_rate {
        48000 => Ok((12000, 8000)),
        44100 => Ok((11025, 3675)),
        other => Err(SonolithError::configuration(format!(
            "no carrier frequency pair defined for {} Hz (supported: 44100, 48000)",
            other
        ))),
    }
}

/// Output device settings driving the galvo pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl AudioOutputConfig {
    /// Carrier frequency used while the laser is firing
    pub fn on_frequency(&self) -> Result<u32> {
        Ok(carrier_frequencies(self.sample_rate)?.0)
    }

    /// Carrier frequency used while the laser is blanked
    pub fn off_frequency(&self) -> Result<u32> {
        Ok(carrier_frequencies(self.sample_rate)?.1)
    }
}

impl Default for AudioOutputConfig {
    fn default() -> Self {
        AudioOutputConfig {
            sample_rate: 48000,
            bit_depth: 16,
        }
    }
}

/// Input device settings for the drip sensor channel
///
/// Independent of the output settings; the drip microphone is usually a
/// different physical device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioInputConfig {
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl Default for AudioInputConfig {
    fn default() -> Self {
        AudioInputConfig {
            sample_rate: 44100,
            bit_depth: 16,
        }
    }
}

/// Resin feed calibration and throttling
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DripperConfig {
    /// Calibrated drip events per millimeter of resin rise
    pub drips_per_mm: f64,
    /// Allowed optical lead over the confirmed resin height, in mm.
    /// Zero disables throttling.
    pub max_lead_distance_mm: f64,
}

impl Default for DripperConfig {
    fn default() -> Self {
        DripperConfig {
            drips_per_mm: 0.0,
            max_lead_distance_mm: 0.0,
        }
    }
}

/// Layer writer tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Per-axis tolerance below which two positions count as equal
    pub move_distance_to_ignore: f64,
    /// Build-area half-extent in mm; machine coordinates are normalized to
    /// [-1, 1] deflection by this value
    pub max_deflection_mm: f64,
    pub override_draw_speed: Option<f64>,
    pub override_move_speed: Option<f64>,
    /// Hold speed written at the current position after a move completes
    pub after_move_wait_speed: Option<f64>,
    /// Hold speed written before drawing when the laser was previously off
    pub post_fire_delay_speed: Option<f64>,
    /// Hold speed written before moving when the laser was previously on
    pub slew_delay_speed: Option<f64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            move_distance_to_ignore: 0.00001,
            max_deflection_mm: 40.0,
            override_draw_speed: None,
            override_move_speed: None,
            after_move_wait_speed: None,
            post_fire_delay_speed: None,
            slew_delay_speed: None,
        }
    }
}

/// Opaque payloads sent over the trigger channel at print boundaries
///
/// The core performs no framing; each payload is forwarded verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerCommands {
    pub print_start: Option<String>,
    pub print_ended: Option<String>,
    pub layer_start: Option<String>,
    pub layer_ended: Option<String>,
    pub dripper_on: Option<String>,
    pub dripper_off: Option<String>,
}

/// Print-level policy for the layer processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Fixed hold applied before each drawn layer, in seconds
    pub pre_layer_delay_s: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            pre_layer_delay_s: 0.0,
        }
    }
}

/// Complete per-printer configuration consumed by the core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrinterConfig {
    pub audio_output: AudioOutputConfig,
    pub audio_input: AudioInputConfig,
    pub dripper: DripperConfig,
    pub writer: WriterConfig,
    pub processor: ProcessorConfig,
    pub triggers: TriggerCommands,
}
