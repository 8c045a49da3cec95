//! Audio pipeline: path translation, carrier modulation, device output
//!
//! The motion pipeline is
//! `PathTranslator -> CarrierModulator -> AudioWriter -> OutputStream`.
//! Everything upstream of the writer works in normalized amplitudes; the
//! writer owns quantization and clamping.

mod modulator;
mod path;
mod stream;
mod writer;

pub use modulator::CarrierModulator;
pub use path::{PathTranslator, Trajectory};
pub use stream::{
    bytes_per_sample, CpalInputStream, CpalOutputStream, InputSink, OutputStream,
    WavOutputStream, FRAMES_PER_BUFFER_DIVISOR,
};
pub use writer::{quantize, AudioWriter};
