//! Carrier modulation of the laser state
//!
//! The analog side discriminates the laser gate from the instantaneous
//! carrier frequency of the galvo drive signal. Each trajectory sample is
//! expanded into one full carrier cycle at the frequency matching the current
//! laser state, with the deflection multiplied onto the carrier waveform.
//!
//! Both carrier frequencies must divide the sample rate; the common cycle
//! length is their step counts' least common multiple, so switching between
//! on and off never tears a cycle. The resulting trajectory sample rate
//! (`sample_rate / cycle length`) is what the path translator must produce
//! samples at.

use std::f64::consts::PI;

use crate::error::{Result, SonolithError};

/// Encodes laser on/off state as the carrier frequency of the drive signal
#[derive(Debug, Clone)]
pub struct CarrierModulator {
    on_waveform: Vec<f64>,
    off_waveform: Vec<f64>,
    laser_on: bool,
    samples_per_second: u32,
}

impl CarrierModulator {
    /// Build a modulator for the given output rate and carrier pair
    ///
    /// Fails when either carrier frequency does not divide the sample rate
    /// evenly; the protocol depends on whole carrier cycles.
    pub fn new(sample_rate: u32, on_frequency: u32, off_frequency: u32) -> Result<Self> {
        if on_frequency == 0 || off_frequency == 0 {
            return Err(SonolithError::configuration(
                "carrier frequencies must be non-zero",
            ));
        }
        if sample_rate % on_frequency != 0 {
            return Err(SonolithError::configuration(format!(
                "on frequency {} Hz does not divide sample rate {} Hz",
                on_frequency, sample_rate
            )));
        }
        if sample_rate % off_frequency != 0 {
            return Err(SonolithError::configuration(format!(
                "off frequency {} Hz does not divide sample rate {} Hz",
                off_frequency, sample_rate
            )));
        }

        let on_steps = (sample_rate / on_frequency) as usize;
        let off_steps = (sample_rate / off_frequency) as usize;
        let cycle_len = lcm(on_steps, off_steps);

        Ok(CarrierModulator {
            on_waveform: carrier_waveform(cycle_len, on_steps),
            off_waveform: carrier_waveform(cycle_len, off_steps),
            laser_on: false,
            samples_per_second: sample_rate / cycle_len as u32,
        })
    }

    /// Trajectory samples per second the path translator must feed in
    ///
    /// Each trajectory sample becomes one carrier cycle of output frames.
    pub fn samples_per_second(&self) -> u32 {
        self.samples_per_second
    }

    /// Output frames produced per trajectory sample
    pub fn frames_per_sample(&self) -> usize {
        self.on_waveform.len()
    }

    pub fn set_laser_on(&mut self) {
        self.laser_on = true;
    }

    pub fn set_laser_off(&mut self) {
        self.laser_on = false;
    }

    pub fn laser_is_on(&self) -> bool {
        self.laser_on
    }

    /// Expand a trajectory into carrier-modulated stereo frames
    ///
    /// The laser state is sampled once per call; frames produced by this
    /// iterator all carry the state current at the time `modulate` was
    /// invoked. Already-written frames are never retroactively altered.
    pub fn modulate<'a, I>(&'a self, trajectory: I) -> impl Iterator<Item = (f64, f64)> + 'a
    where
        I: IntoIterator<Item = (f64, f64)> + 'a,
    {
        let waveform: &'a [f64] = if self.laser_on {
            &self.on_waveform
        } else {
            &self.off_waveform
        };
        trajectory
            .into_iter()
            .flat_map(move |(x, y)| waveform.iter().map(move |&w| (x * w, y * w)))
    }
}

/// One common cycle of a cosine carrier with the given step period
fn carrier_waveform(cycle_len: usize, steps: usize) -> Vec<f64> {
    (0..cycle_len)
        .map(|i| (2.0 * PI * (i % steps) as f64 / steps as f64).cos())
        .collect()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_48k_profile_cycle_geometry() {
        let modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();
        // on: 4 steps, off: 6 steps, lcm 12 -> 4000 trajectory samples/s
        assert_eq!(modulator.frames_per_sample(), 12);
        assert_eq!(modulator.samples_per_second(), 4000);
    }

    #[test]
    fn test_44k_profile_cycle_geometry() {
        let modulator = CarrierModulator::new(44100, 11025, 3675).unwrap();
        // on: 4 steps, off: 12 steps, lcm 12 -> 3675 trajectory samples/s
        assert_eq!(modulator.frames_per_sample(), 12);
        assert_eq!(modulator.samples_per_second(), 3675);
    }

    #[test]
    fn test_rejects_non_dividing_frequencies() {
        assert!(CarrierModulator::new(48000, 11025, 8000).is_err());
        assert!(CarrierModulator::new(48000, 12000, 7001).is_err());
        assert!(CarrierModulator::new(48000, 0, 8000).is_err());
    }

    #[test]
    fn test_each_sample_expands_to_one_cycle() {
        let modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();
        let frames: Vec<_> = modulator.modulate(vec![(0.5, -0.5)]).collect();
        assert_eq!(frames.len(), 12);
    }

    #[test]
    fn test_laser_state_selects_carrier() {
        let mut modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();

        let off_frames: Vec<_> = modulator.modulate(vec![(1.0, 1.0)]).collect();
        modulator.set_laser_on();
        assert!(modulator.laser_is_on());
        let on_frames: Vec<_> = modulator.modulate(vec![(1.0, 1.0)]).collect();

        // 12 kHz carrier repeats every 4 frames, 8 kHz every 6
        assert_relative_eq!(on_frames[0].0, on_frames[4].0, epsilon = 1e-12);
        assert_relative_eq!(off_frames[0].0, off_frames[6].0, epsilon = 1e-12);
        assert_ne!(on_frames, off_frames);
    }

    #[test]
    fn test_modulation_preserves_amplitude_bound() {
        let mut modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();
        modulator.set_laser_on();
        for (l, r) in modulator.modulate(vec![(1.0, -1.0), (0.3, 0.7)]) {
            assert!(l.abs() <= 1.0);
            assert!(r.abs() <= 1.0);
        }
    }

    #[test]
    fn test_state_change_does_not_alter_earlier_frames() {
        let mut modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();
        let before: Vec<_> = modulator.modulate(vec![(1.0, 1.0)]).collect();
        modulator.set_laser_on();
        let again: Vec<_> = modulator.modulate(vec![(1.0, 1.0)]).collect();
        // `before` was collected before the state change and stays as produced
        assert_ne!(before, again);
    }
}
