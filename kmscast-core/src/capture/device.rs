//! DRM device paths
//!
//! VA-API wants the render node (`/dev/dri/renderD128`) while the plane
//! helper and the render context speak in card nodes (`/dev/dri/card0`).
//! Nodes are matched by device number, so symlinks such as
//! `/dev/dri/by-path/*-card` resolve to the same GPU.

use std::path::{Path, PathBuf};

use smithay::backend::drm::{DrmNode, NodeType};
use tracing::debug;

use crate::error::{CaptureError, Result};

/// Render node that belongs to the same GPU as `card_path`
pub fn render_node(card_path: &Path) -> Result<PathBuf> {
    let node = DrmNode::from_path(card_path).map_err(|e| {
        CaptureError::hw_context(format!(
            "{} is not a DRM device node: {}",
            card_path.display(),
            e
        ))
    })?;

    let path = node.dev_path_with_type(NodeType::Render).ok_or_else(|| {
        CaptureError::hw_context(format!(
            "No render node found for {} ({})",
            card_path.display(),
            node
        ))
    })?;

    debug!("Render node for {} ({}): {}", card_path.display(), node, path.display());
    Ok(path)
}
