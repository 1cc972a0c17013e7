//! Encoder-side plumbing
//!
//! This module provides:
//! - FFmpeg hardware device and frames contexts for VA-API and CUDA
//! - Encoder settings written by the capture backend on start
//! - HDR mastering display and content light side data

pub mod hdr;
pub mod hwcontext;

pub use hdr::{attach_to_frame, read_from_frame, should_attach, ContentLight, MasteringDisplay};
pub use hwcontext::{
    allocate_frame, EncoderSettings, HwContexts, HwDeviceContext, HwFramesContext,
};

use crate::error::{CaptureError, Result};

/// Initialize FFmpeg
///
/// Safe to call more than once.
pub fn init() -> Result<()> {
    ffmpeg_next::init().map_err(|e| CaptureError::encoder(format!("Failed to initialize FFmpeg: {}", e)))
}
