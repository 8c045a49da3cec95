//! Layer processor
//!
//! Sits between the layer source and the layer writer. For each incoming
//! layer it synchronizes against the drip-tracked resin height, fires the
//! configured trigger commands at print and layer boundaries, and decides
//! whether the layer is drawn or skipped when the resin has risen too far
//! past it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::{DripperConfig, ProcessorConfig, TriggerCommands};
use crate::control::{Commander, LayerWriter, StatusSink};
use crate::drip::ZAxis;
use crate::error::{Result, SonolithError};
use crate::geometry::Layer;

/// Poll interval while waiting for the resin to reach a layer
const DRIP_WAIT_TICK: Duration = Duration::from_millis(100);

struct ProcessorInner {
    layer_count: u32,
    zaxis: Option<Box<dyn ZAxis>>,
    commander: Box<dyn Commander>,
    shutdown: bool,
}

/// Per-layer orchestration: Z synchronization, triggers, skip policy
pub struct LayerProcessor {
    writer: Arc<LayerWriter>,
    status: Arc<dyn StatusSink>,
    inner: Mutex<ProcessorInner>,
    shutting_down: AtomicBool,
    abort_requested: AtomicBool,
    triggers: TriggerCommands,
    max_lead_distance_mm: f64,
    pre_layer_delay: Duration,
}

impl LayerProcessor {
    pub fn new(
        writer: Arc<LayerWriter>,
        status: Arc<dyn StatusSink>,
        zaxis: Option<Box<dyn ZAxis>>,
        commander: Box<dyn Commander>,
        triggers: TriggerCommands,
        dripper: &DripperConfig,
        processor: &ProcessorConfig,
    ) -> Self {
        LayerProcessor {
            writer,
            status,
            inner: Mutex::new(ProcessorInner {
                layer_count: 0,
                zaxis,
                commander,
                shutdown: false,
            }),
            shutting_down: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            triggers,
            max_lead_distance_mm: dripper.max_lead_distance_mm,
            pre_layer_delay: Duration::from_secs_f64(processor.pre_layer_delay_s.max(0.0)),
        }
    }

    /// Process one layer end to end
    ///
    /// Blocks until the resin reaches the layer height (when a Z axis is
    /// attached), then either draws the layer or skips it when the resin is
    /// further ahead than the configured lead distance allows.
    pub fn process(&self, layer: &Layer) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SonolithError::lifecycle(
                "layer processor already shut down",
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return Err(SonolithError::lifecycle(
                "layer processor already shut down",
            ));
        }

        if inner.layer_count == 0 {
            fire(inner.commander.as_mut(), &self.triggers.print_start)?;
        }
        inner.layer_count += 1;
        self.status.add_layer();
        self.status.set_model_height(layer.z);

        let mut ahead_by = 0.0;
        if inner.zaxis.is_some() {
            let target = layer.z + self.max_lead_distance_mm / 2.0;
            inner.zaxis.as_ref().unwrap().move_to(target);
            self.wait_for_resin(&mut inner, layer.z)?;
            ahead_by = inner.zaxis.as_ref().unwrap().current_z_location_mm()? - layer.z;
        }

        if self.should_process(ahead_by) {
            fire(inner.commander.as_mut(), &self.triggers.layer_start)?;
            if !self.pre_layer_delay.is_zero() {
                self.writer
                    .wait_till_time(Instant::now() + self.pre_layer_delay)?;
            }
            let bbox = self.writer.process_layer(layer)?;
            self.status.add_axis_data(bbox);
            fire(inner.commander.as_mut(), &self.triggers.layer_ended)?;
        } else {
            warn!(
                "Dripping too fast, skipping layer at {:.3} mm (ahead by {:.3} mm)",
                layer.z, ahead_by
            );
            self.status.skipped_layer();
        }
        Ok(())
    }

    /// Request truncation of the layer currently being written
    pub fn abort_current_command(&self) {
        self.abort_requested.store(true, Ordering::Release);
        self.writer.abort_current_command();
    }

    /// One-way shutdown: fire the print-ended trigger and release the
    /// Z axis and trigger channel
    ///
    /// Cleanup failures are logged, never raised, so every resource gets its
    /// close attempt.
    pub fn terminate(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let mut inner = self.inner.lock().unwrap();
        if inner.shutdown {
            return;
        }
        inner.shutdown = true;

        if let Err(e) = fire(inner.commander.as_mut(), &self.triggers.print_ended) {
            error!("Print-ended trigger failed during shutdown: {}", e);
        }
        if let Some(zaxis) = inner.zaxis.as_mut() {
            match zaxis.stop() {
                Ok(()) => info!("Z axis shut down cleanly"),
                Err(e) => error!("Z axis stop failed during shutdown: {}", e),
            }
        }
        match inner.commander.close() {
            Ok(()) => info!("Trigger channel shut down cleanly"),
            Err(e) => error!("Trigger channel close failed during shutdown: {}", e),
        }
    }

    /// Hold until the observed resin height reaches the layer height
    ///
    /// Runs the dripper while waiting and keeps the galvos holding position
    /// through the writer. Interruptible by shutdown and abort; the dripper
    /// is always switched off on the way out.
    fn wait_for_resin(&self, inner: &mut ProcessorInner, height_mm: f64) -> Result<()> {
        loop {
            let current = inner.zaxis.as_ref().unwrap().current_z_location_mm()?;
            if current >= height_mm {
                break;
            }
            if self.shutting_down.load(Ordering::Acquire)
                || self.abort_requested.swap(false, Ordering::AcqRel)
            {
                break;
            }
            if !self.status.waiting_for_drips() {
                info!(
                    "Waiting for resin: {:.3} mm observed, {:.3} mm needed",
                    current, height_mm
                );
                fire(inner.commander.as_mut(), &self.triggers.dripper_on)?;
                self.status.set_waiting_for_drips();
            }
            self.writer.wait_till_time(Instant::now() + DRIP_WAIT_TICK)?;
        }
        if self.status.waiting_for_drips() {
            fire(inner.commander.as_mut(), &self.triggers.dripper_off)?;
        }
        self.status.set_not_waiting_for_drips();
        Ok(())
    }

    /// Whether a layer this far behind the resin is still worth drawing
    fn should_process(&self, ahead_by_mm: f64) -> bool {
        if self.max_lead_distance_mm <= 0.0 {
            return true;
        }
        if ahead_by_mm <= self.max_lead_distance_mm {
            info!("Ahead (acceptable) by {:.3} mm", ahead_by_mm);
            true
        } else {
            info!("Ahead (unacceptable) by {:.3} mm", ahead_by_mm);
            false
        }
    }
}

fn fire(commander: &mut dyn Commander, payload: &Option<String>) -> Result<()> {
    if let Some(payload) = payload {
        commander.send_command(payload.as_bytes())?;
    }
    Ok(())
}
