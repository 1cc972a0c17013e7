//! Per-frame plane selection
//!
//! Picks the plane that shows the captured monitor and, independently, the
//! hardware cursor plane out of the current plane set.

use super::plane::PlaneDescriptor;

/// Planes chosen for one frame, as indices into the plane set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedPlanes {
    pub primary: usize,
    pub cursor: Option<usize>,
    /// The primary plane is a combined plane or came from the fallback path;
    /// its x/y are not output-relative and the monitor position is used instead
    pub capture_is_combined_plane: bool,
}

impl SelectedPlanes {
    pub fn primary<'a>(&self, planes: &'a [PlaneDescriptor]) -> &'a PlaneDescriptor {
        &planes[self.primary]
    }

    pub fn cursor<'a>(&self, planes: &'a [PlaneDescriptor]) -> Option<&'a PlaneDescriptor> {
        self.cursor.map(|i| &planes[i])
    }
}

/// Non-cursor plane on `connector_id`, preferring non-combined planes
fn find_by_connector(planes: &[PlaneDescriptor], connector_id: u32) -> Option<usize> {
    let mut combined = None;
    for (i, plane) in planes.iter().enumerate() {
        if plane.connector_id != connector_id || plane.is_cursor {
            continue;
        }
        if !plane.is_combined_plane {
            return Some(i);
        }
        combined = Some(i);
    }
    combined
}

fn find_first_combined(planes: &[PlaneDescriptor]) -> Option<usize> {
    planes
        .iter()
        .position(|p| p.is_combined_plane && !p.is_cursor)
}

/// Largest non-cursor plane; the first one wins ties
fn find_largest(planes: &[PlaneDescriptor]) -> Option<usize> {
    let mut largest: Option<(usize, i64)> = None;
    for (i, plane) in planes.iter().enumerate() {
        if plane.is_cursor {
            continue;
        }
        match largest {
            Some((_, area)) if plane.area() <= area => {}
            _ => largest = Some((i, plane.area())),
        }
    }
    largest.map(|(i, _)| i)
}

fn find_cursor(planes: &[PlaneDescriptor]) -> Option<usize> {
    planes.iter().position(|p| p.is_cursor)
}

/// Select the primary and cursor planes for the given connectors
///
/// Returns `None` when no non-cursor plane exists at all.
pub fn select_planes(planes: &[PlaneDescriptor], connector_ids: &[u32]) -> Option<SelectedPlanes> {
    let mut from_fallback = false;

    let primary = match connector_ids
        .iter()
        .find_map(|&id| find_by_connector(planes, id))
    {
        Some(index) => index,
        None => {
            // Only expected when the target output went away, or on multi-plane
            // Wayland setups before the first real layout
            from_fallback = true;
            find_first_combined(planes).or_else(|| find_largest(planes))?
        }
    };

    let mut cursor = find_cursor(planes);
    if !from_fallback {
        if let Some(c) = cursor {
            if planes[c].connector_id != planes[primary].connector_id {
                cursor = None;
            }
        }
    }

    Some(SelectedPlanes {
        primary,
        cursor,
        capture_is_combined_plane: from_fallback || planes[primary].is_combined_plane,
    })
}
