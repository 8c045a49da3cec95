//! Print status sink
//!
//! Write-only from the core's perspective; a UI or reporter reads the
//! concrete collector. Methods take `&self` so one handle can be shared
//! between the processing thread and an observer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::geometry::AuditBoundingBox;

/// Receiver for per-layer progress and telemetry
pub trait StatusSink: Send + Sync {
    fn add_layer(&self);
    fn set_model_height(&self, z_mm: f64);
    fn add_axis_data(&self, bbox: Option<AuditBoundingBox>);
    fn skipped_layer(&self);
    fn set_waiting_for_drips(&self);
    fn set_not_waiting_for_drips(&self);
    fn waiting_for_drips(&self) -> bool;
}

/// In-memory status collector
#[derive(Debug, Default)]
pub struct PrintStatus {
    layer_count: AtomicU32,
    skipped_count: AtomicU32,
    waiting_for_drips: AtomicBool,
    model_height_mm: Mutex<f64>,
    axis_data: Mutex<Vec<AuditBoundingBox>>,
}

impl PrintStatus {
    pub fn new() -> Self {
        PrintStatus::default()
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count.load(Ordering::Acquire)
    }

    pub fn skipped_count(&self) -> u32 {
        self.skipped_count.load(Ordering::Acquire)
    }

    pub fn model_height_mm(&self) -> f64 {
        *self.model_height_mm.lock().unwrap()
    }

    /// Bounding boxes of every drawn layer so far
    pub fn axis_data(&self) -> Vec<AuditBoundingBox> {
        self.axis_data.lock().unwrap().clone()
    }
}

impl StatusSink for PrintStatus {
    fn add_layer(&self) {
        self.layer_count.fetch_add(1, Ordering::AcqRel);
    }

    fn set_model_height(&self, z_mm: f64) {
        *self.model_height_mm.lock().unwrap() = z_mm;
    }

    fn add_axis_data(&self, bbox: Option<AuditBoundingBox>) {
        if let Some(bbox) = bbox {
            self.axis_data.lock().unwrap().push(bbox);
        }
    }

    fn skipped_layer(&self) {
        self.skipped_count.fetch_add(1, Ordering::AcqRel);
    }

    fn set_waiting_for_drips(&self) {
        self.waiting_for_drips.store(true, Ordering::Release);
    }

    fn set_not_waiting_for_drips(&self) {
        self.waiting_for_drips.store(false, Ordering::Release);
    }

    fn waiting_for_drips(&self) -> bool {
        self.waiting_for_drips.load(Ordering::Acquire)
    }
}
