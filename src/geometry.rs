//! Domain types shared across the print pipeline
//!
//! Positions are in machine units (millimeters). Commands and layers are
//! produced by an external geometry source and consumed exactly once by the
//! layer writer.

use serde::{Deserialize, Serialize};

/// A 2D position in machine units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position2 {
    pub x: f64,
    pub y: f64,
}

impl Position2 {
    pub fn new(x: f64, y: f64) -> Self {
        Position2 { x, y }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: Position2) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// A 3D position in machine units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position3 { x, y, z }
    }

    /// The lateral component of this position
    pub fn xy(&self) -> Position2 {
        Position2::new(self.x, self.y)
    }
}

/// A single motion command within a layer
///
/// Order within a layer is significant. Draw commands carry their own start
/// so the writer can detect (and bridge) positional discontinuities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Reposition without curing resin
    LateralMove { to: Position2, speed: f64 },
    /// Cure a straight segment from `start` to `end`
    LateralDraw {
        start: Position2,
        end: Position2,
        speed: f64,
    },
}

/// An ordered set of commands sharing one Z height
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub z: f64,
    pub commands: Vec<Command>,
}

impl Layer {
    pub fn new(z: f64, commands: Vec<Command>) -> Self {
        Layer { z, commands }
    }
}

/// Commanded printer position and speed
///
/// Owned exclusively by the layer writer and updated only after a segment has
/// been fully handed to the device writer. Reflects *commanded* position, not
/// necessarily rendered hardware motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrinterState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub speed: f64,
}

impl PrinterState {
    pub fn new() -> Self {
        PrinterState {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            speed: 1.0,
        }
    }

    pub fn xy(&self) -> Position2 {
        Position2::new(self.x, self.y)
    }

    pub fn xyz(&self) -> Position3 {
        Position3::new(self.x, self.y, self.z)
    }

    pub fn set_state(&mut self, to: Position3, speed: f64) {
        self.x = to.x;
        self.y = to.y;
        self.z = to.z;
        self.speed = speed;
    }
}

impl Default for PrinterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-layer extents telemetry, recomputed from scratch for every layer
///
/// Only draw endpoints extend the box; moves do not cure resin and are
/// excluded. `None` until the first draw command is folded in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuditBoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub z: f64,
}

impl AuditBoundingBox {
    /// Start a box at a single point
    pub fn at_point(p: Position2, z: f64) -> Self {
        AuditBoundingBox {
            min_x: p.x,
            max_x: p.x,
            min_y: p.y,
            max_y: p.y,
            z,
        }
    }

    /// Grow the box to include a point
    pub fn include(&mut self, p: Position2) {
        if p.x < self.min_x {
            self.min_x = p.x;
        }
        if p.x > self.max_x {
            self.max_x = p.x;
        }
        if p.y < self.min_y {
            self.min_y = p.y;
        }
        if p.y > self.max_y {
            self.max_y = p.y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance() {
        let a = Position2::new(0.0, 0.0);
        let b = Position2::new(3.0, 4.0);
        assert_relative_eq!(a.distance_to(b), 5.0);
    }

    #[test]
    fn test_bounding_box_growth() {
        let mut bbox = AuditBoundingBox::at_point(Position2::new(1.0, 1.0), 0.5);
        bbox.include(Position2::new(-2.0, 3.0));
        bbox.include(Position2::new(4.0, 0.0));

        assert_relative_eq!(bbox.min_x, -2.0);
        assert_relative_eq!(bbox.max_x, 4.0);
        assert_relative_eq!(bbox.min_y, 0.0);
        assert_relative_eq!(bbox.max_y, 3.0);
        assert_relative_eq!(bbox.z, 0.5);
    }

    #[test]
    fn test_printer_state_update() {
        let mut state = PrinterState::new();
        state.set_state(Position3::new(1.0, 2.0, 3.0), 50.0);
        assert_eq!(state.xy(), Position2::new(1.0, 2.0));
        assert_relative_eq!(state.speed, 50.0);
    }
}
