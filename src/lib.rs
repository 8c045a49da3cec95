//! Sonolith - Audio-Driven Stereolithography Core
//!
//! Sonolith drives a laser-galvanometer resin printer over an ordinary
//! stereo audio interface: the left and right channels deflect the X and Y
//! galvo mirrors, the laser driver gates on the carrier frequency riding on
//! the deflection signal, and the Z height is sensed by counting resin drips
//! heard on an audio input channel.
//!
//! # Architecture
//!
//! Layer geometry flows down a four-stage pipeline:
//! - Path translation: straight segments to time-sampled deflection points
//! - Carrier modulation: each point expanded to one laser-gating carrier cycle
//! - Device writing: quantization and backpressured delivery to the stream
//! - Output stream: a real audio device (cpal) or a WAV file sink
//!
//! Above the pipeline, the layer writer sequences the commands of one layer
//! and the layer processor synchronizes layers against the drip-tracked
//! resin height.

pub mod audio;
pub mod config;
pub mod control;
pub mod cure;
pub mod drip;
pub mod error;
pub mod geometry;

pub use error::{Result, SonolithError};
