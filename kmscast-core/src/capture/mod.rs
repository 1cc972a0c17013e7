//! DRM/KMS monitor capture
//!
//! This module handles:
//! - Resolving the requested monitor to DRM connectors
//! - Picking the primary and cursor planes out of each plane set
//! - Driving the per-frame capture through [`Capture`]

pub mod device;
pub mod kms;
pub mod monitor;
pub mod plane;
pub mod select;

pub use kms::{CaptureContext, KmsCapture};
pub use monitor::{resolve_monitor, MonitorTarget, OutputInfo, OutputSource};
pub use plane::{PlaneDescriptor, PlaneResponse, PlaneSource};
pub use select::{select_planes, SelectedPlanes};

use ffmpeg_next::frame::Video;

use crate::encode::hwcontext::EncoderSettings;
use crate::error::Result;

/// Whether the encoding loop has to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopState {
    #[default]
    Continue,
    Stop {
        /// The backend stopped because something failed
        error: bool,
    },
}

impl StopState {
    pub fn should_stop(self) -> bool {
        matches!(self, Self::Stop { .. })
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::Stop { error: true })
    }
}

/// Suppresses repeats of a log message
#[derive(Debug, Default)]
pub struct LogOnce(bool);

impl LogOnce {
    /// True the first time only
    pub fn first(&mut self) -> bool {
        !std::mem::replace(&mut self.0, true)
    }
}

/// Capture backend driven by the encoding loop
///
/// Per output frame the loop calls [`tick`](Capture::tick), then
/// [`capture`](Capture::capture), then always [`capture_end`](Capture::capture_end),
/// and polls [`should_stop`](Capture::should_stop) in between.
pub trait Capture {
    /// Acquire everything needed to capture and size the encoder
    ///
    /// Nothing stays acquired when this fails.
    fn start(&mut self, settings: &mut EncoderSettings) -> Result<()>;

    /// Per-frame preparation; lazily creates GPU resources on the first call
    fn tick(&mut self, settings: &EncoderSettings, frame: &mut Video);

    /// Capture one frame into `frame`
    ///
    /// Recoverable errors drop the frame. Other errors latch
    /// [`should_stop`](Capture::should_stop).
    fn capture(&mut self, frame: &mut Video) -> Result<()>;

    /// Release per-frame resources; runs after every `capture`
    fn capture_end(&mut self, frame: &mut Video);

    fn should_stop(&self) -> StopState;

    /// Release everything; idempotent and safe after a failed `start`
    fn stop(&mut self);

    /// Stop and drop the backend
    fn destroy(mut self: Box<Self>) {
        self.stop();
    }
}
