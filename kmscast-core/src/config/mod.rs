//! Configuration types for kmscast
//!
//! Backend construction parameters and the on-disk config they can be built from.

mod file;

pub use file::{sample_config, CaptureSection, ConfigFile, GpuSection};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CaptureError, Result};
use crate::render::Renderer;
use crate::types::{ColorRange, GpuInfo};

/// Where the DRM card node comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePath {
    /// Explicit card node, e.g. `/dev/dri/card0`
    Card(PathBuf),
    /// The card the render context was created on
    #[default]
    RenderContext,
}

/// Construction parameters for the KMS capture backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsCaptureParams {
    /// Output name to capture, e.g. `DP-1`
    pub display: String,

    /// GPU the render context runs on
    pub gpu: GpuInfo,

    /// Request HDR output (P010 surfaces and HDR side data)
    #[serde(default)]
    pub hdr: bool,

    /// Output color range
    #[serde(default)]
    pub color_range: ColorRange,

    /// DRM card node
    #[serde(default)]
    pub device: DevicePath,
}

impl KmsCaptureParams {
    /// Parameters with defaults for everything but the display and GPU
    pub fn new(display: impl Into<String>, gpu: GpuInfo) -> Self {
        Self {
            display: display.into(),
            gpu,
            hdr: false,
            color_range: ColorRange::default(),
            device: DevicePath::default(),
        }
    }

    /// Check that the parameters can be used to start a capture
    pub fn validate(&self) -> Result<()> {
        if self.display.is_empty() {
            return Err(CaptureError::config("Display name must not be empty"));
        }
        if let DevicePath::Card(path) = &self.device {
            if path.as_os_str().is_empty() {
                return Err(CaptureError::config("Device path must not be empty"));
            }
        }
        Ok(())
    }

    /// Resolve the DRM card node against the render context
    pub fn card_path(&self, renderer: &dyn Renderer) -> Result<PathBuf> {
        match &self.device {
            DevicePath::Card(path) => Ok(path.clone()),
            DevicePath::RenderContext => renderer.card_path().ok_or_else(|| {
                CaptureError::config("Render context does not know its DRM card")
            }),
        }
    }
}
