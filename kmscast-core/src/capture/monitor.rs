//! Monitor resolution
//!
//! Maps the requested output name to the DRM connectors that drive it, once,
//! when the backend starts. Monitor reconfiguration after start is not tracked.

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};
use crate::types::{Rotation, Vec2i};

/// Upper bound on connectors recorded for one monitor name
pub const MAX_CONNECTOR_IDS: usize = 32;

/// An active output as seen by the display server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    /// DRM connector id (only meaningful on DRM connections)
    pub connector_id: u32,
    pub position: Vec2i,
    pub size: Vec2i,
}

/// Output enumeration over the display server connection
pub trait OutputSource {
    /// Every active output, in enumeration order
    fn active_outputs(&self) -> Vec<OutputInfo>;

    /// The output with exactly this name
    fn output_by_name(&self, name: &str) -> Option<OutputInfo>;

    /// Rotation the display server applies to the output
    fn rotation(&self, output: &OutputInfo) -> Rotation;
}

/// The monitor being captured, resolved at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub name: String,
    pub position: Vec2i,
    /// Size before rotation
    pub size: Vec2i,
    pub rotation: Rotation,
    pub connector_ids: Vec<u32>,
}

impl MonitorTarget {
    /// Size of the captured image in output space
    pub fn capture_size(&self) -> Vec2i {
        if self.rotation.swaps_axes() {
            self.size.swapped()
        } else {
            self.size
        }
    }

    /// Encoder frame size: capture size rounded up to even, at least 2
    pub fn encoder_size(&self) -> Vec2i {
        let size = self.capture_size();
        Vec2i::new(even_dimension(size.x), even_dimension(size.y))
    }
}

/// Round up to the next even value and clamp to 2
pub fn even_dimension(value: i32) -> i32 {
    ((value + 1) & !1).max(2)
}

/// Resolve `name` against the active outputs
pub fn resolve_monitor(outputs: &dyn OutputSource, name: &str) -> Result<MonitorTarget> {
    let mut connector_ids = Vec::new();
    for output in outputs.active_outputs() {
        if output.name.len() != name.len() || output.name.as_bytes() != name.as_bytes() {
            continue;
        }

        if connector_ids.len() < MAX_CONNECTOR_IDS {
            connector_ids.push(output.connector_id);
        }

        if connector_ids.len() == MAX_CONNECTOR_IDS {
            warn!("Reached max connector ids ({}) for {}", MAX_CONNECTOR_IDS, name);
            break;
        }
    }

    let output = outputs
        .output_by_name(name)
        .ok_or_else(|| CaptureError::MonitorNotFound(name.to_string()))?;
    let rotation = outputs.rotation(&output);

    debug!(
        "Resolved monitor {}: connectors {:?}, pos {:?}, size {}, rotation {}",
        name, connector_ids, output.position, output.size, rotation
    );

    Ok(MonitorTarget {
        name: name.to_string(),
        position: output.position,
        size: output.size,
        rotation,
        connector_ids,
    })
}
