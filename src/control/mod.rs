//! Print control layer
//!
//! The layer writer turns geometric commands into modulated audio; the layer
//! processor wraps it with Z synchronization, trigger commands, and status
//! reporting. External hardware is reached only through the `Commander` and
//! `StatusSink` seams.

mod layer_writer;
mod processor;
mod status;
mod trigger;

pub use layer_writer::LayerWriter;
pub use processor::LayerProcessor;
pub use status::{PrintStatus, StatusSink};
pub use trigger::{Commander, NullCommander, StreamCommander};
