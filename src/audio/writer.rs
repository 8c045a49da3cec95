//! Device writer: quantization and backpressure
//!
//! Accepts lazy sequences of stereo frames with normalized amplitudes,
//! quantizes them to the configured signed bit depth, and hands them to the
//! physical stream in capacity-sized pieces. This is the only place samples
//! are clamped; upstream stages may emit values outside [-1, 1] and rely on
//! the writer to bound them.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::audio::stream::{bytes_per_sample, OutputStream};
use crate::error::{Result, SonolithError};

/// Poll interval while waiting for device buffer capacity
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

/// Frames collected from a lazy producer before encoding a chunk
const CHUNK_FRAMES: usize = 512;

/// Quantize a normalized amplitude to a signed integer of the given depth
///
/// Rounds half away from zero, then clamps to the representable range.
/// Amplitude 1.0 maps to the positive maximum (32767 at 16-bit) and -1.0 to
/// its negation; only out-of-range inputs can reach the asymmetric minimum.
///
/// `bit_depth` must be one of the native widths accepted by
/// [`bytes_per_sample`] (8, 16, or 32); other depths would shift out of the
/// i64 range.
pub fn quantize(amplitude: f64, bit_depth: u16) -> i64 {
    debug_assert!(
        bytes_per_sample(bit_depth).is_ok(),
        "{}-bit is not a native sample width",
        bit_depth
    );
    let max = ((1i64 << (bit_depth - 1)) - 1) as f64;
    let min = -(1i64 << (bit_depth - 1)) as f64;
    (amplitude * max).round().clamp(min, max) as i64
}

/// Buffered, backpressure-aware sink for stereo sample frames
///
/// Owns the physical output stream. Before each piece is written the stream
/// is asked for its available capacity; oversized chunks are split and the
/// writer sleeps in ~100 ms ticks until each piece fits, which bounds both
/// device buffer use and producer memory.
pub struct AudioWriter {
    stream: Box<dyn OutputStream>,
    bit_depth: u16,
    bytes_per_sample: usize,
    closed: bool,
}

impl AudioWriter {
    /// Wrap an output stream with a quantizer at the given bit depth
    ///
    /// Fails if the bit depth has no native integer width.
    pub fn new(stream: Box<dyn OutputStream>, bit_depth: u16) -> Result<Self> {
        let bps = bytes_per_sample(bit_depth)?;
        Ok(AudioWriter {
            stream,
            bit_depth,
            bytes_per_sample: bps,
            closed: false,
        })
    }

    /// Write a finite sequence of stereo frames
    ///
    /// The producer is drained lazily in fixed-size chunks so an unbounded
    /// upstream cannot grow memory while the device is busy.
    pub fn write<I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut chunk = Vec::with_capacity(CHUNK_FRAMES);
        for frame in frames {
            chunk.push(frame);
            if chunk.len() == CHUNK_FRAMES {
                self.write_chunk(&chunk)?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.write_chunk(&chunk)?;
        }
        Ok(())
    }

    /// Encode one chunk and write it in capacity-sized pieces
    pub fn write_chunk(&mut self, frames: &[(f64, f64)]) -> Result<()> {
        if self.closed {
            return Err(SonolithError::lifecycle("write on a closed audio writer"));
        }
        if frames.is_empty() {
            return Ok(());
        }
        let bytes = self.encode(frames);
        let bytes_per_frame = self.bytes_per_sample * 2;

        let mut offset = 0;
        while offset < frames.len() {
            let mut available = self.stream.write_available();
            while available == 0 {
                thread::sleep(BACKPRESSURE_POLL);
                available = self.stream.write_available();
            }
            let take = available.min(frames.len() - offset);
            if take < frames.len() - offset {
                debug!(
                    "Device buffer short: writing {} of {} pending frames",
                    take,
                    frames.len() - offset
                );
            }
            let start = offset * bytes_per_frame;
            let end = (offset + take) * bytes_per_frame;
            self.stream.write(&bytes[start..end])?;
            offset += take;
        }
        Ok(())
    }

    /// Quantize frames to interleaved little-endian sample bytes
    fn encode(&self, frames: &[(f64, f64)]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(frames.len() * self.bytes_per_sample * 2);
        for &(left, right) in frames {
            for amplitude in [left, right] {
                let value = quantize(amplitude, self.bit_depth);
                bytes.extend_from_slice(&value.to_le_bytes()[..self.bytes_per_sample]);
            }
        }
        bytes
    }

    /// Stop and release the underlying stream. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.stream.close()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted stream: pops capacities from a list and records every write
    struct ScriptedStream {
        capacities: Vec<usize>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl ScriptedStream {
        fn new(capacities: Vec<usize>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>, Arc<Mutex<bool>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(Mutex::new(false));
            (
                ScriptedStream {
                    capacities,
                    writes: writes.clone(),
                    closed: closed.clone(),
                },
                writes,
                closed,
            )
        }
    }

    impl OutputStream for ScriptedStream {
        fn write_available(&self) -> usize {
            *self.capacities.first().unwrap_or(&usize::MAX)
        }

        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            if !self.capacities.is_empty() {
                self.capacities.remove(0);
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_quantize_16_bit_reference_points() {
        assert_eq!(quantize(1.0, 16), 32767);
        assert_eq!(quantize(-1.0, 16), -32767);
        assert_eq!(quantize(0.5, 16), 16384);
        assert_eq!(quantize(0.0, 16), 0);
    }

    #[test]
    fn test_quantize_rounds_half_away_from_zero() {
        // 0.5 * 32767 = 16383.5, away from zero -> 16384
        assert_eq!(quantize(0.5, 16), 16384);
        assert_eq!(quantize(-0.5, 16), -16384);
    }

    #[test]
    fn test_quantize_clamps_out_of_range() {
        assert_eq!(quantize(2.0, 16), 32767);
        assert_eq!(quantize(-2.0, 16), -32768);
    }

    #[test]
    #[should_panic(expected = "not a native sample width")]
    fn test_quantize_rejects_non_native_width() {
        quantize(0.5, 0);
    }

    #[test]
    fn test_quantize_full_range_never_exceeds_depth() {
        for step in -100..=100 {
            let amplitude = step as f64 / 100.0;
            let value = quantize(amplitude, 16);
            assert!(value <= 32767, "{} quantized to {}", amplitude, value);
            assert!(value >= -32768, "{} quantized to {}", amplitude, value);
        }
    }

    #[test]
    fn test_writer_encodes_reference_frames() {
        let (stream, writes, _) = ScriptedStream::new(vec![]);
        let mut writer = AudioWriter::new(Box::new(stream), 16).unwrap();

        writer
            .write_chunk(&[(1.0, 1.0), (0.0, 0.0), (-1.0, -1.0), (0.5, 0.5)])
            .unwrap();

        let mut expected = Vec::new();
        for value in [32767i16, 32767, 0, 0, -32767, -32767, 16384, 16384] {
            expected.extend_from_slice(&value.to_le_bytes());
        }
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], expected);
    }

    #[test]
    fn test_writer_splits_chunk_on_short_capacity() {
        let (stream, writes, _) = ScriptedStream::new(vec![2, 1024]);
        let mut writer = AudioWriter::new(Box::new(stream), 16).unwrap();

        let frames = [(1.0, 1.0), (0.0, 0.0), (-1.0, -1.0), (0.5, 0.5)];
        writer.write_chunk(&frames).unwrap();

        let mut expected = Vec::new();
        for value in [32767i16, 32767, 0, 0, -32767, -32767, 16384, 16384] {
            expected.extend_from_slice(&value.to_le_bytes());
        }
        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], expected[..8].to_vec());
        assert_eq!(writes[1], expected[8..].to_vec());
        let concatenated: Vec<u8> = writes.iter().flatten().copied().collect();
        assert_eq!(concatenated, expected);
    }

    #[test]
    fn test_writer_rejects_depth_without_native_width() {
        let (stream, _, _) = ScriptedStream::new(vec![]);
        assert!(AudioWriter::new(Box::new(stream), 24).is_err());
    }

    #[test]
    fn test_write_after_close_fails() {
        let (stream, _, closed) = ScriptedStream::new(vec![]);
        let mut writer = AudioWriter::new(Box::new(stream), 16).unwrap();

        writer.close().unwrap();
        assert!(*closed.lock().unwrap());

        let result = writer.write_chunk(&[(0.0, 0.0)]);
        assert!(matches!(
            result,
            Err(crate::error::SonolithError::Lifecycle { .. })
        ));
    }

    #[test]
    fn test_lazy_write_drains_producer_in_chunks() {
        let (stream, writes, _) = ScriptedStream::new(vec![]);
        let mut writer = AudioWriter::new(Box::new(stream), 16).unwrap();

        let frames = (0..CHUNK_FRAMES + 3).map(|_| (0.25, -0.25));
        writer.write(frames).unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), CHUNK_FRAMES * 4);
        assert_eq!(writes[1].len(), 3 * 4);
    }
}
