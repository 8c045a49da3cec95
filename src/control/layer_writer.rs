//! Per-layer command sequencer
//!
//! Owns the printer state and the whole audio pipeline for the duration of a
//! layer. Draw commands whose start differs from the current position beyond
//! the near-equality tolerance are bridged with a laser-off move segment;
//! optional hold segments (slew delay, after-move wait, post-fire delay)
//! cover the galvo and laser settling characteristics of the optics.
//!
//! One lock guards the printer state and the terminal shutdown flag. The
//! abort and shutting-down flags are atomics checked between commands; those
//! checks are the only cancellation points, so a long single segment cannot
//! be interrupted mid-segment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{error, info};

use crate::audio::{AudioWriter, CarrierModulator, PathTranslator};
use crate::config::WriterConfig;
use crate::error::{Result, SonolithError};
use crate::geometry::{AuditBoundingBox, Command, Layer, Position2, Position3, PrinterState};

/// Mutable pipeline state guarded by the layer writer's lock
struct WriterInner {
    state: PrinterState,
    writer: AudioWriter,
    modulator: CarrierModulator,
    translator: PathTranslator,
    shutdown: bool,
}

/// Sequences one layer at a time into the audio pipeline
pub struct LayerWriter {
    inner: Mutex<WriterInner>,
    abort_current_command: AtomicBool,
    shutting_down: AtomicBool,
    laser_off_override: AtomicBool,
    config: WriterConfig,
}

impl LayerWriter {
    pub fn new(
        writer: AudioWriter,
        modulator: CarrierModulator,
        translator: PathTranslator,
        config: WriterConfig,
    ) -> Self {
        LayerWriter {
            inner: Mutex::new(WriterInner {
                state: PrinterState::new(),
                writer,
                modulator,
                translator,
                shutdown: false,
            }),
            abort_current_command: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            laser_off_override: AtomicBool::new(false),
            config,
        }
    }

    /// Write a layer's commands in order and return its bounding box
    ///
    /// Holds the state lock for the whole layer, so at most one layer is ever
    /// being written and a terminate request cannot race a partially applied
    /// state update. Returns `None` when the layer drew nothing.
    pub fn process_layer(&self, layer: &Layer) -> Result<Option<AuditBoundingBox>> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SonolithError::lifecycle("layer writer already shut down"));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return Err(SonolithError::lifecycle("layer writer already shut down"));
        }

        let mut bbox: Option<AuditBoundingBox> = None;
        for command in &layer.commands {
            if self.shutting_down.load(Ordering::Acquire) {
                break;
            }
            if self.abort_current_command.swap(false, Ordering::AcqRel) {
                info!("Aborting current layer at {:.3} mm", layer.z);
                break;
            }
            match *command {
                Command::LateralDraw { start, end, speed } => {
                    match bbox.as_mut() {
                        Some(b) => {
                            b.include(start);
                            b.include(end);
                        }
                        None => {
                            let mut b = AuditBoundingBox::at_point(start, layer.z);
                            b.include(end);
                            bbox = Some(b);
                        }
                    }
                    if !self.same_position(inner.state.xy(), start) {
                        self.move_lateral(&mut inner, start, layer.z, speed)?;
                    }
                    self.draw_lateral(&mut inner, end, layer.z, speed)?;
                }
                Command::LateralMove { to, speed } => {
                    self.move_lateral(&mut inner, to, layer.z, speed)?;
                }
            }
        }
        Ok(bbox)
    }

    /// Hold position until the deadline passes
    ///
    /// Keeps re-emitting zero-length laser-off segments at the current
    /// position so the galvos stay energized; device backpressure paces the
    /// loop to real time. Returns early on shutdown.
    pub fn wait_till_time(&self, deadline: Instant) -> Result<()> {
        while Instant::now() <= deadline {
            if self.shutting_down.load(Ordering::Acquire) {
                return Ok(());
            }
            let mut inner = self.inner.lock().unwrap();
            if inner.shutdown {
                return Ok(());
            }
            let hold = inner.state.xy();
            let (z, speed) = (inner.state.z, inner.state.speed);
            self.move_lateral(&mut inner, hold, z, speed)?;
        }
        Ok(())
    }

    /// Request truncation of the layer currently being written
    ///
    /// Cooperative: the flag is polled between commands and cleared when
    /// consumed. Future layers are unaffected.
    pub fn abort_current_command(&self) {
        self.abort_current_command.store(true, Ordering::Release);
    }

    /// Keep the laser off even for draw commands
    pub fn set_laser_off_override(&self, enabled: bool) {
        self.laser_off_override.store(enabled, Ordering::Release);
    }

    /// Current commanded position and speed
    pub fn current_state(&self) -> PrinterState {
        self.inner.lock().unwrap().state
    }

    /// Whether the modulator is currently encoding laser-on
    pub fn laser_is_on(&self) -> bool {
        self.inner.lock().unwrap().modulator.laser_is_on()
    }

    /// One-way shutdown: mark terminal and release the output device
    ///
    /// A close failure is logged, never raised, so the remaining cleanup in
    /// the caller always runs. Every later `process_layer` call fails.
    pub fn terminate(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        match inner.writer.close() {
            Ok(()) => info!("Layer writer shut down cleanly"),
            Err(e) => error!("Audio writer close failed during shutdown: {}", e),
        }
    }

    fn almost_equal(&self, a: f64, b: f64) -> bool {
        a == b || (a - b).abs() <= self.config.move_distance_to_ignore
    }

    fn same_position(&self, a: Position2, b: Position2) -> bool {
        self.almost_equal(a.x, b.x) && self.almost_equal(a.y, b.y)
    }

    /// Laser-off reposition, with optional slew and settle holds
    fn move_lateral(
        &self,
        inner: &mut WriterInner,
        to: Position2,
        z: f64,
        speed: f64,
    ) -> Result<()> {
        let speed = self.config.override_move_speed.unwrap_or(speed);
        let laser_was_on = inner.modulator.laser_is_on();
        if laser_was_on {
            if let Some(slew_speed) = self.config.slew_delay_speed {
                let hold = inner.state.xy();
                let hold_z = inner.state.z;
                write_lateral(inner, hold, hold_z, slew_speed)?;
            }
        }
        inner.modulator.set_laser_off();
        write_lateral(inner, to, z, speed)?;
        if let Some(wait_speed) = self.config.after_move_wait_speed {
            write_lateral(inner, to, z, wait_speed)?;
        }
        Ok(())
    }

    /// Laser-on cure segment, with optional post-fire hold
    fn draw_lateral(
        &self,
        inner: &mut WriterInner,
        to: Position2,
        z: f64,
        speed: f64,
    ) -> Result<()> {
        let speed = self.config.override_draw_speed.unwrap_or(speed);
        let laser_was_off = !inner.modulator.laser_is_on();
        if self.laser_off_override.load(Ordering::Acquire) {
            inner.modulator.set_laser_off();
        } else {
            inner.modulator.set_laser_on();
        }
        if laser_was_off {
            if let Some(delay_speed) = self.config.post_fire_delay_speed {
                let hold = inner.state.xy();
                let hold_z = inner.state.z;
                write_lateral(inner, hold, hold_z, delay_speed)?;
            }
        }
        write_lateral(inner, to, z, speed)?;
        Ok(())
    }
}

/// Translate, modulate, and hand one segment to the device writer.
/// State is updated only after the hand-off succeeds.
fn write_lateral(inner: &mut WriterInner, to: Position2, z: f64, speed: f64) -> Result<()> {
    let from = inner.state.xyz();
    let target = Position3::new(to.x, to.y, z);
    let WriterInner {
        ref mut state,
        ref mut writer,
        ref modulator,
        ref translator,
        ..
    } = *inner;
    let trajectory = translator.process(from, target, speed)?;
    writer.write(modulator.modulate(trajectory))?;
    state.set_state(target, speed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OutputStream;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    /// Unbounded stream that records every byte written
    struct CaptureStream {
        bytes: Arc<StdMutex<Vec<u8>>>,
        closed: Arc<StdMutex<bool>>,
    }

    impl OutputStream for CaptureStream {
        fn write_available(&self) -> usize {
            usize::MAX / 8
        }

        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.bytes.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    struct Harness {
        writer: LayerWriter,
        bytes: Arc<StdMutex<Vec<u8>>>,
        closed: Arc<StdMutex<bool>>,
    }

    /// 48 kHz, 16-bit pipeline: 4000 trajectory samples/s, 12 frames each
    fn harness(config: WriterConfig) -> Harness {
        let bytes = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(StdMutex::new(false));
        let stream = CaptureStream {
            bytes: bytes.clone(),
            closed: closed.clone(),
        };
        let audio_writer = AudioWriter::new(Box::new(stream), 16).unwrap();
        let modulator = CarrierModulator::new(48000, 12000, 8000).unwrap();
        let translator = PathTranslator::new(4000, 40.0).unwrap();
        Harness {
            writer: LayerWriter::new(audio_writer, modulator, translator, config),
            bytes,
            closed,
        }
    }

    fn draw(sx: f64, sy: f64, ex: f64, ey: f64, speed: f64) -> Command {
        Command::LateralDraw {
            start: Position2::new(sx, sy),
            end: Position2::new(ex, ey),
            speed,
        }
    }

    /// Bytes one segment of the given length produces at 100 mm/s
    fn segment_bytes(distance_mm: f64) -> usize {
        let samples = ((distance_mm / 100.0) * 4000.0).ceil() as usize;
        samples * 12 * 4
    }

    #[test]
    fn test_bounding_box_spans_draw_endpoints() {
        let h = harness(WriterConfig::default());
        let layer = Layer::new(
            2.0,
            vec![
                draw(0.0, 0.0, 10.0, 0.0, 100.0),
                draw(10.0, 0.0, 10.0, 5.0, 100.0),
                draw(10.0, 5.0, 0.0, 5.0, 100.0),
            ],
        );
        let bbox = h.writer.process_layer(&layer).unwrap().unwrap();
        assert_eq!(bbox.min_x, 0.0);
        assert_eq!(bbox.max_x, 10.0);
        assert_eq!(bbox.min_y, 0.0);
        assert_eq!(bbox.max_y, 5.0);
        assert_eq!(bbox.z, 2.0);
    }

    #[test]
    fn test_moves_do_not_extend_bounding_box() {
        let h = harness(WriterConfig::default());
        let layer = Layer::new(
            1.0,
            vec![
                Command::LateralMove {
                    to: Position2::new(-30.0, -30.0),
                    speed: 100.0,
                },
                draw(-30.0, -30.0, -20.0, -30.0, 100.0),
                Command::LateralMove {
                    to: Position2::new(35.0, 35.0),
                    speed: 100.0,
                },
            ],
        );
        let bbox = h.writer.process_layer(&layer).unwrap().unwrap();
        assert_eq!(bbox.min_x, -30.0);
        assert_eq!(bbox.max_x, -20.0);
        assert_eq!(bbox.min_y, -30.0);
        assert_eq!(bbox.max_y, -30.0);
    }

    #[test]
    fn test_layer_with_no_draws_has_no_bounding_box() {
        let h = harness(WriterConfig::default());
        let layer = Layer::new(
            0.5,
            vec![Command::LateralMove {
                to: Position2::new(5.0, 5.0),
                speed: 100.0,
            }],
        );
        assert!(h.writer.process_layer(&layer).unwrap().is_none());
    }

    #[test]
    fn test_touching_draws_emit_no_intervening_move() {
        let h = harness(WriterConfig::default());
        // Start at the origin (= initial state), so no leading move either
        let layer = Layer::new(
            0.1,
            vec![
                draw(0.0, 0.0, 8.0, 0.0, 100.0),
                draw(8.0, 0.0, 8.0, 4.0, 100.0),
            ],
        );
        h.writer.process_layer(&layer).unwrap();
        let written = h.bytes.lock().unwrap().len();
        assert_eq!(written, segment_bytes(8.0) + segment_bytes(4.0));
    }

    #[test]
    fn test_draws_within_tolerance_count_as_touching() {
        let config = WriterConfig {
            move_distance_to_ignore: 0.01,
            ..WriterConfig::default()
        };
        let h = harness(config);
        let layer = Layer::new(
            0.1,
            vec![
                draw(0.0, 0.0, 8.0, 0.0, 100.0),
                // Start differs from (8, 0) by less than the tolerance
                draw(8.005, 0.0, 8.0, 4.0, 100.0),
            ],
        );
        h.writer.process_layer(&layer).unwrap();
        let written = h.bytes.lock().unwrap().len();
        // Second segment runs from (8, 0) with no bridging move
        assert_eq!(written, segment_bytes(8.0) + segment_bytes(4.0));
    }

    #[test]
    fn test_disconnected_draw_gets_bridging_move() {
        let h = harness(WriterConfig::default());
        let layer = Layer::new(
            0.1,
            vec![
                draw(0.0, 0.0, 8.0, 0.0, 100.0),
                draw(0.0, 0.0, 0.0, 4.0, 100.0),
            ],
        );
        h.writer.process_layer(&layer).unwrap();
        let written = h.bytes.lock().unwrap().len();
        // Draw 8 mm, move back 8 mm, draw 4 mm
        assert_eq!(written, 2 * segment_bytes(8.0) + segment_bytes(4.0));
    }

    #[test]
    fn test_state_tracks_last_segment_endpoint() {
        let h = harness(WriterConfig::default());
        let layer = Layer::new(3.0, vec![draw(0.0, 0.0, 10.0, 5.0, 50.0)]);
        h.writer.process_layer(&layer).unwrap();
        let state = h.writer.current_state();
        assert_eq!(state.x, 10.0);
        assert_eq!(state.y, 5.0);
        assert_eq!(state.z, 3.0);
        assert_eq!(state.speed, 50.0);
    }

    #[test]
    fn test_speed_overrides_apply() {
        let config = WriterConfig {
            override_draw_speed: Some(200.0),
            ..WriterConfig::default()
        };
        let h = harness(config);
        let layer = Layer::new(0.1, vec![draw(0.0, 0.0, 8.0, 0.0, 100.0)]);
        h.writer.process_layer(&layer).unwrap();
        assert_eq!(h.writer.current_state().speed, 200.0);
        // Half the traversal time at double speed
        let written = h.bytes.lock().unwrap().len();
        assert_eq!(written, ((8.0 / 200.0) * 4000.0f64).ceil() as usize * 12 * 4);
    }

    #[test]
    fn test_laser_state_follows_commands() {
        let h = harness(WriterConfig::default());
        assert!(!h.writer.laser_is_on());
        let layer = Layer::new(0.1, vec![draw(0.0, 0.0, 8.0, 0.0, 100.0)]);
        h.writer.process_layer(&layer).unwrap();
        assert!(h.writer.laser_is_on());

        let move_only = Layer::new(
            0.1,
            vec![Command::LateralMove {
                to: Position2::new(0.0, 0.0),
                speed: 100.0,
            }],
        );
        h.writer.process_layer(&move_only).unwrap();
        assert!(!h.writer.laser_is_on());
    }

    #[test]
    fn test_laser_off_override_blanks_draws() {
        let h = harness(WriterConfig::default());
        h.writer.set_laser_off_override(true);
        let layer = Layer::new(0.1, vec![draw(0.0, 0.0, 8.0, 0.0, 100.0)]);
        h.writer.process_layer(&layer).unwrap();
        assert!(!h.writer.laser_is_on());
    }

    #[test]
    fn test_delay_segments_emitted_on_laser_transitions() {
        let config = WriterConfig {
            post_fire_delay_speed: Some(100.0),
            slew_delay_speed: Some(100.0),
            ..WriterConfig::default()
        };
        let h = harness(config);
        let layer = Layer::new(
            0.1,
            vec![
                // Laser off -> on: one zero-length post-fire hold
                draw(0.0, 0.0, 8.0, 0.0, 100.0),
                // Laser on -> move: one zero-length slew hold
                draw(0.0, 0.0, 0.0, 4.0, 100.0),
            ],
        );
        h.writer.process_layer(&layer).unwrap();
        let written = h.bytes.lock().unwrap().len();
        // Holds are single-sample segments (12 frames, 48 bytes each):
        // post-fire + draw 8, slew + move 8, post-fire(off during move) + draw 4
        let hold = 12 * 4;
        assert_eq!(
            written,
            2 * segment_bytes(8.0) + segment_bytes(4.0) + 3 * hold
        );
    }

    #[test]
    fn test_abort_truncates_layer_and_clears_flag() {
        let h = harness(WriterConfig::default());
        h.writer.abort_current_command();
        let layer = Layer::new(0.1, vec![draw(0.0, 0.0, 8.0, 0.0, 100.0)]);
        let bbox = h.writer.process_layer(&layer).unwrap();
        assert!(bbox.is_none());
        assert_eq!(h.bytes.lock().unwrap().len(), 0);

        // The flag was consumed; the next layer draws normally
        let bbox = h.writer.process_layer(&layer).unwrap();
        assert!(bbox.is_some());
        assert!(h.bytes.lock().unwrap().len() > 0);
    }

    #[test]
    fn test_process_layer_after_terminate_fails_every_time() {
        let h = harness(WriterConfig::default());
        h.writer.terminate();
        assert!(*h.closed.lock().unwrap());

        let layer = Layer::new(0.1, vec![draw(0.0, 0.0, 8.0, 0.0, 100.0)]);
        for _ in 0..3 {
            let result = h.writer.process_layer(&layer);
            assert!(matches!(result, Err(SonolithError::Lifecycle { .. })));
        }
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let h = harness(WriterConfig::default());
        h.writer.terminate();
        h.writer.terminate();
        assert!(*h.closed.lock().unwrap());
    }

    #[test]
    fn test_wait_till_time_holds_position() {
        let h = harness(WriterConfig::default());
        let before = h.writer.current_state();
        h.writer
            .wait_till_time(Instant::now() + Duration::from_millis(20))
            .unwrap();
        let after = h.writer.current_state();
        assert_eq!(before.xy(), after.xy());
        // Hold segments were written while waiting
        assert!(h.bytes.lock().unwrap().len() > 0);
    }
}
