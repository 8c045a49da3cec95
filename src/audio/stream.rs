//! Physical audio stream backends
//!
//! The device writer talks to an [`OutputStream`]: a capacity-reporting sink
//! for encoded stereo frames. Two implementations are provided, a cpal-backed
//! sound-card stream and a hound-backed WAV file sink for hardware-free runs.
//!
//! cpal streams are not `Send`, so the device stream is owned by a dedicated
//! thread and fed through an SPSC ring buffer. The ring buffer's vacancy is
//! exactly the device's unconsumed headroom, which makes it the capacity
//! oracle for the writer's backpressure loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, error};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapProd, HeapRb,
};

use crate::config::{AudioInputConfig, AudioOutputConfig};
use crate::error::{Result, SonolithError};

/// Stereo frames per device buffer, as a divisor of the sample rate.
/// `sample_rate / 8` gives 125 ms of headroom.
pub const FRAMES_PER_BUFFER_DIVISOR: u32 = 8;

/// Poll interval while the device thread waits for shutdown
const STREAM_PARK_INTERVAL: Duration = Duration::from_millis(50);

/// Byte width of one sample for a signed-integer bit depth
///
/// Only depths with a native integer width are addressable on the wire;
/// 24-bit (and anything else) is rejected at construction time.
pub fn bytes_per_sample(bit_depth: u16) -> Result<usize> {
    match bit_depth {
        8 => Ok(1),
        16 => Ok(2),
        32 => Ok(4),
        other => Err(SonolithError::configuration(format!(
            "{}-bit output has no native integer width (supported: 8, 16, 32)",
            other
        ))),
    }
}

/// Sink for encoded interleaved stereo frames
///
/// `write` takes little-endian signed-integer sample bytes and must be called
/// with whole frames only. `write_available` reports how many frames fit
/// right now without blocking or overflowing.
pub trait OutputStream: Send {
    fn write_available(&self) -> usize;
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Consumer of raw input samples, normalized to [-1, 1]
///
/// Implemented by the drip edge detector; called from the input device's
/// callback thread.
pub trait InputSink: Send + Sync {
    fn feed(&self, samples: &[f32]);
}

// ============================================================================
// cpal output stream
// ============================================================================

/// Sound-card output stream
///
/// A dedicated thread opens the device, verifies the requested format, and
/// keeps the cpal stream alive until `close`. Sample bytes flow through an
/// SPSC ring buffer sized to `sample_rate / 8` frames; the device callback
/// drains it and pads with silence on underrun.
pub struct CpalOutputStream {
    producer: HeapProd<u8>,
    bytes_per_frame: usize,
    closed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutputStream {
    /// Open the default output device with the configured format
    ///
    /// Fails with a device error if no device is present or the exact
    /// rate/depth/2-channel combination is unsupported.
    pub fn open(config: AudioOutputConfig) -> Result<Self> {
        let bps = bytes_per_sample(config.bit_depth)?;
        let bytes_per_frame = bps * 2;
        let capacity_frames = (config.sample_rate / FRAMES_PER_BUFFER_DIVISOR) as usize;

        let ring = HeapRb::<u8>::new(capacity_frames * bytes_per_frame);
        let (producer, consumer) = ring.split();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_for_thread = closed.clone();
        let (setup_tx, setup_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("sonolith-audio-out".into())
            .spawn(move || {
                let stream = match build_output_stream(config, consumer) {
                    Ok(stream) => {
                        let _ = setup_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                        return;
                    }
                };
                // Keep the stream alive on this thread until close() is called
                while !closed_for_thread.load(Ordering::Acquire) {
                    thread::sleep(STREAM_PARK_INTERVAL);
                }
                if let Err(e) = stream.pause() {
                    error!("Failed to pause output stream: {}", e);
                }
                drop(stream);
                debug!("Output stream released");
            })
            .map_err(SonolithError::Io)?;

        match setup_rx.recv() {
            Ok(Ok(())) => Ok(CpalOutputStream {
                producer,
                bytes_per_frame,
                closed,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SonolithError::device("output stream thread died during setup"))
            }
        }
    }
}

impl OutputStream for CpalOutputStream {
    fn write_available(&self) -> usize {
        self.producer.vacant_len() / self.bytes_per_frame
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SonolithError::lifecycle("write on a closed output stream"));
        }
        let pushed = self.producer.push_slice(bytes);
        if pushed < bytes.len() {
            // The writer checks capacity before writing, so a short push means
            // the caller broke the backpressure contract.
            return Err(SonolithError::device(format!(
                "device buffer overrun: {} of {} bytes accepted",
                pushed,
                bytes.len()
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(thread) = self.thread.take() {
                thread
                    .join()
                    .map_err(|_| SonolithError::device("output stream thread panicked"))?;
            }
        }
        Ok(())
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Open the default device, verify the format, and start the stream.
/// Runs on the stream-owning thread.
fn build_output_stream(
    config: AudioOutputConfig,
    consumer: ringbuf::HeapCons<u8>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SonolithError::device("no audio output device available"))?;

    let sample_format = match config.bit_depth {
        8 => cpal::SampleFormat::I8,
        16 => cpal::SampleFormat::I16,
        32 => cpal::SampleFormat::I32,
        other => {
            return Err(SonolithError::configuration(format!(
                "{}-bit output has no native integer width (supported: 8, 16, 32)",
                other
            )))
        }
    };
    verify_output_format(&device, config.sample_rate, 2, sample_format)?;

    let stream_config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("Output stream error: {}", err);
    let stream = match sample_format {
        cpal::SampleFormat::I8 => {
            let mut drain = ByteDrain::new(consumer, 1);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i8], _: &cpal::OutputCallbackInfo| {
                        drain.fill(data, |bytes| bytes[0] as i8, 0);
                    },
                    err_fn,
                    None,
                )
                .map_err(device_error("failed to build output stream"))?
        }
        cpal::SampleFormat::I16 => {
            let mut drain = ByteDrain::new(consumer, 2);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        drain.fill(data, |bytes| i16::from_le_bytes([bytes[0], bytes[1]]), 0);
                    },
                    err_fn,
                    None,
                )
                .map_err(device_error("failed to build output stream"))?
        }
        cpal::SampleFormat::I32 => {
            let mut drain = ByteDrain::new(consumer, 4);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i32], _: &cpal::OutputCallbackInfo| {
                        drain.fill(
                            data,
                            |bytes| i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                            0,
                        );
                    },
                    err_fn,
                    None,
                )
                .map_err(device_error("failed to build output stream"))?
        }
        _ => unreachable!("sample format restricted above"),
    };

    stream
        .play()
        .map_err(device_error("failed to start output stream"))?;
    debug!(
        "Output stream started: {} Hz, {}-bit, 2 channels",
        config.sample_rate, config.bit_depth
    );
    Ok(stream)
}

/// Decodes little-endian sample bytes out of the ring buffer inside the
/// device callback, padding underruns with silence.
struct ByteDrain {
    consumer: ringbuf::HeapCons<u8>,
    bytes_per_sample: usize,
    scratch: Vec<u8>,
}

impl ByteDrain {
    fn new(consumer: ringbuf::HeapCons<u8>, bytes_per_sample: usize) -> Self {
        ByteDrain {
            consumer,
            bytes_per_sample,
            scratch: Vec::new(),
        }
    }

    fn fill<T: Copy>(&mut self, data: &mut [T], decode: impl Fn(&[u8]) -> T, silence: T) {
        let bps = self.bytes_per_sample;
        let want = data.len() * bps;
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }
        // Pop whole samples only; the producer pushes whole frames at a time
        let take = (self.consumer.occupied_len().min(want) / bps) * bps;
        let popped = self.consumer.pop_slice(&mut self.scratch[..take]);
        let samples = popped / bps;
        for (i, out) in data[..samples].iter_mut().enumerate() {
            *out = decode(&self.scratch[i * bps..(i + 1) * bps]);
        }
        for out in data[samples..].iter_mut() {
            *out = silence;
        }
    }
}

fn verify_output_format(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
    format: cpal::SampleFormat,
) -> Result<()> {
    let supported = device
        .supported_output_configs()
        .map_err(device_error("failed to query output configurations"))?
        .any(|range| {
            range.channels() == channels
                && range.sample_format() == format
                && range.min_sample_rate().0 <= sample_rate
                && sample_rate <= range.max_sample_rate().0
        });
    if supported {
        Ok(())
    } else {
        Err(SonolithError::device(format!(
            "output device does not support {} Hz {:?} with {} channels",
            sample_rate, format, channels
        )))
    }
}

fn device_error<E: std::error::Error + Send + Sync + 'static>(
    reason: &'static str,
) -> impl FnOnce(E) -> SonolithError {
    move |e| SonolithError::Device {
        reason: reason.to_string(),
        source: Some(Box::new(e)),
    }
}

// ============================================================================
// cpal input stream (drip sensing)
// ============================================================================

/// Sound-card input stream feeding an [`InputSink`]
///
/// Opened mono at the configured input rate. Samples are normalized to f32
/// before being handed to the sink, so the edge detector is independent of
/// the wire format.
pub struct CpalInputStream {
    closed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalInputStream {
    pub fn open(config: AudioInputConfig, sink: Arc<dyn InputSink>) -> Result<Self> {
        let closed = Arc::new(AtomicBool::new(false));
        let closed_for_thread = closed.clone();
        let (setup_tx, setup_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("sonolith-audio-in".into())
            .spawn(move || {
                let stream = match build_input_stream(config, sink) {
                    Ok(stream) => {
                        let _ = setup_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                        return;
                    }
                };
                while !closed_for_thread.load(Ordering::Acquire) {
                    thread::sleep(STREAM_PARK_INTERVAL);
                }
                if let Err(e) = stream.pause() {
                    error!("Failed to pause input stream: {}", e);
                }
                drop(stream);
                debug!("Input stream released");
            })
            .map_err(SonolithError::Io)?;

        match setup_rx.recv() {
            Ok(Ok(())) => Ok(CpalInputStream {
                closed,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SonolithError::device("input stream thread died during setup"))
            }
        }
    }

    /// Stop acquisition and release the device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(thread) = self.thread.take() {
                thread
                    .join()
                    .map_err(|_| SonolithError::device("input stream thread panicked"))?;
            }
        }
        Ok(())
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn build_input_stream(config: AudioInputConfig, sink: Arc<dyn InputSink>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| SonolithError::device("no audio input device available"))?;

    let sample_format = match config.bit_depth {
        16 => cpal::SampleFormat::I16,
        32 => cpal::SampleFormat::I32,
        other => {
            return Err(SonolithError::configuration(format!(
                "{}-bit input is not supported (supported: 16, 32)",
                other
            )))
        }
    };

    let supported = device
        .supported_input_configs()
        .map_err(device_error("failed to query input configurations"))?
        .any(|range| {
            range.channels() >= 1
                && range.sample_format() == sample_format
                && range.min_sample_rate().0 <= config.sample_rate
                && config.sample_rate <= range.max_sample_rate().0
        });
    if !supported {
        return Err(SonolithError::device(format!(
            "input device does not support {} Hz {:?}",
            config.sample_rate, sample_format
        )));
    }

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("Input stream error: {}", err);
    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        sink.feed(&scratch);
                    },
                    err_fn,
                    None,
                )
                .map_err(device_error("failed to build input stream"))?
        }
        cpal::SampleFormat::I32 => {
            let mut scratch: Vec<f32> = Vec::new();
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i32], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s as f32 / 2147483648.0));
                        sink.feed(&scratch);
                    },
                    err_fn,
                    None,
                )
                .map_err(device_error("failed to build input stream"))?
        }
        _ => unreachable!("sample format restricted above"),
    };

    stream
        .play()
        .map_err(device_error("failed to start input stream"))?;
    debug!(
        "Input stream started: {} Hz, {}-bit, 1 channel",
        config.sample_rate, config.bit_depth
    );
    Ok(stream)
}

// ============================================================================
// WAV file sink
// ============================================================================

/// WAV file sink implementing [`OutputStream`]
///
/// Lets the whole pipeline run and be inspected without audio hardware. A
/// file never exerts backpressure, so `write_available` is effectively
/// unbounded.
pub struct WavOutputStream {
    writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
    bit_depth: u16,
    bytes_per_sample: usize,
}

impl WavOutputStream {
    pub fn create(path: &Path, config: AudioOutputConfig) -> Result<Self> {
        let bps = bytes_per_sample(config.bit_depth)?;
        let spec = WavSpec {
            channels: 2,
            sample_rate: config.sample_rate,
            bits_per_sample: config.bit_depth,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|e| SonolithError::Device {
            reason: format!("failed to create WAV sink at {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(WavOutputStream {
            writer: Some(writer),
            bit_depth: config.bit_depth,
            bytes_per_sample: bps,
        })
    }
}

impl OutputStream for WavOutputStream {
    fn write_available(&self) -> usize {
        usize::MAX / 8
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SonolithError::lifecycle("write on a closed WAV sink"))?;
        let io_err = |e: hound::Error| SonolithError::Device {
            reason: "failed to write WAV sample".to_string(),
            source: Some(Box::new(e)),
        };
        for sample in bytes.chunks_exact(self.bytes_per_sample) {
            match self.bit_depth {
                8 => writer.write_sample(sample[0] as i8).map_err(io_err)?,
                16 => writer
                    .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                    .map_err(io_err)?,
                32 => writer
                    .write_sample(i32::from_le_bytes([
                        sample[0], sample[1], sample[2], sample[3],
                    ]))
                    .map_err(io_err)?,
                _ => unreachable!("bit depth validated at construction"),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| SonolithError::Device {
                reason: "failed to finalize WAV sink".to_string(),
                source: Some(Box::new(e)),
            })?;
        }
        Ok(())
    }
}
