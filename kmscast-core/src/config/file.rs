//! Configuration file loading
//!
//! Loads user configuration from `~/.config/kmscast/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{DevicePath, KmsCaptureParams};
use crate::error::{CaptureError, Result};
use crate::types::{ColorRange, GpuInfo, GpuVendor};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture settings
    #[serde(default)]
    pub capture: CaptureSection,

    /// GPU settings
    #[serde(default)]
    pub gpu: GpuSection,
}

/// `[capture]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Output to capture (e.g. "DP-1")
    #[serde(default)]
    pub display: String,

    /// Request HDR output
    #[serde(default)]
    pub hdr: bool,

    /// Color range: limited or full
    #[serde(default)]
    pub color_range: ColorRange,

    /// DRM card node; the render context's card when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
}

/// `[gpu]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuSection {
    /// amd, intel or nvidia
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<GpuVendor>,

    /// Driver version (0 = unknown)
    #[serde(default)]
    pub version: u32,
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("kmscast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("kmscast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/kmscast/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Build backend parameters from the file
    pub fn capture_params(&self) -> Result<KmsCaptureParams> {
        let vendor = self
            .gpu
            .vendor
            .ok_or_else(|| CaptureError::config("gpu.vendor is not set"))?;

        let params = KmsCaptureParams {
            display: self.capture.display.clone(),
            gpu: GpuInfo {
                vendor,
                version: self.gpu.version,
            },
            hdr: self.capture.hdr,
            color_range: self.capture.color_range,
            device: match &self.capture.device {
                Some(path) => DevicePath::Card(path.clone()),
                None => DevicePath::RenderContext,
            },
        };
        params.validate()?;
        Ok(params)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# kmscast configuration

[capture]
# Output to capture, as named by the display server (e.g. "DP-1", "HDMI-A-1")
display = "DP-1"

# Encode HDR10 (P010) and forward the monitor's HDR metadata
hdr = false

# Color range: "limited" (default) or "full"
color_range = "limited"

# DRM card node; defaults to the card of the render context
# device = "/dev/dri/card0"

[gpu]
# amd, intel or nvidia (nvidia uses the CUDA path, the others VA-API)
vendor = "amd"

# Driver version, 0 if unknown
version = 0
"#
    .to_string()
}
