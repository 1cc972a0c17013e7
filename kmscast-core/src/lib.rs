//! kmscast Core Library
//!
//! Zero-copy DRM/KMS monitor capture for hardware video encoders.
//!
//! This library provides:
//! - Primary and cursor plane selection for a named monitor
//! - DMA-BUF import into GL textures through EGLImage
//! - Rotation-aware compositing of the cursor plane
//! - HDR10 metadata forwarding onto encoder frames
//! - VA-API (AMD/Intel) and CUDA (NVIDIA) hand-off into FFmpeg hardware frames
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌────────────────┐    ┌───────────────┐
//! │ Plane Source │───▶│ EGLImage     │───▶│ Color Convert  │───▶│ VA surface /  │
//! │ (DMA-BUF fds)│    │ Import       │    │ (+ cursor)     │    │ CUDA frame    │
//! └──────────────┘    └──────────────┘    └────────────────┘    └───────────────┘
//! ```
//!
//! The render context, the display server's output list and the privileged
//! plane helper are supplied by the caller through [`render::Renderer`],
//! [`capture::OutputSource`] and [`capture::PlaneSource`].

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod interop;
pub mod render;
pub mod types;

pub use capture::{Capture, CaptureContext, KmsCapture, StopState};
pub use config::{ConfigFile, DevicePath, KmsCaptureParams};
pub use encode::EncoderSettings;
pub use error::{CaptureError, Result};
pub use types::{ColorRange, GpuInfo, GpuVendor, Rotation, Vec2i};
