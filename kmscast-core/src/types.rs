//! Core types for kmscast
//!
//! Small value types shared by the capture, render and encode modules.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Integer 2D vector used for positions and sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vec2i {
    pub x: i32,
    pub y: i32,
}

impl Vec2i {
    /// Create a new vector
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Vector with x and y exchanged
    pub const fn swapped(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
        }
    }
}

impl From<(i32, i32)> for Vec2i {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Vec2i {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Display rotation as reported by the display server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Deg0,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "270")]
    Deg270,
}

impl Rotation {
    /// Rotation angle passed to the composite draw
    pub fn radians(self) -> f32 {
        match self {
            Self::Deg0 => 0.0,
            Self::Deg90 => FRAC_PI_2,
            Self::Deg180 => PI,
            Self::Deg270 => PI + FRAC_PI_2,
        }
    }

    /// Whether width and height trade places in output space
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Rotation in degrees
    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// GPU vendor of the render device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Amd,
    Intel,
    Nvidia,
}

impl std::str::FromStr for GpuVendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amd" | "radeon" => Ok(Self::Amd),
            "intel" => Ok(Self::Intel),
            "nvidia" => Ok(Self::Nvidia),
            _ => Err(format!("Unknown GPU vendor: {}", s)),
        }
    }
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amd => write!(f, "AMD"),
            Self::Intel => write!(f, "Intel"),
            Self::Nvidia => write!(f, "NVIDIA"),
        }
    }
}

/// GPU vendor and version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub vendor: GpuVendor,
    /// 0 if unknown
    #[serde(default)]
    pub version: u32,
}

impl GpuInfo {
    /// Whether frames go through the CUDA interop path instead of VA-API
    pub fn uses_cuda(&self) -> bool {
        self.vendor == GpuVendor::Nvidia
    }
}

/// Output color range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    /// Studio swing (16-235)
    #[default]
    Limited,
    /// Full swing (0-255)
    Full,
}

impl std::str::FromStr for ColorRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "limited" | "tv" | "mpeg" => Ok(Self::Limited),
            "full" | "pc" | "jpeg" => Ok(Self::Full),
            _ => Err(format!("Unknown color range: {}", s)),
        }
    }
}

impl From<ColorRange> for ffmpeg_next::util::color::Range {
    fn from(range: ColorRange) -> Self {
        match range {
            ColorRange::Limited => Self::MPEG,
            ColorRange::Full => Self::JPEG,
        }
    }
}
