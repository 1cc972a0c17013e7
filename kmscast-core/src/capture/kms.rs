//! KMS capture backend
//!
//! One state machine for every GPU. Monitor resolution, plane selection,
//! DMA-BUF import and compositing are shared; the hand-off into the encoder's
//! frame is delegated to a [`GpuInterop`].

use std::sync::Arc;

use ffmpeg_next::frame::Video;
use tracing::{debug, error, info, trace, warn};

use super::monitor::{resolve_monitor, MonitorTarget, OutputSource};
use super::plane::{PlaneResponse, PlaneSource};
use super::select::select_planes;
use super::{Capture, LogOnce, StopState};
use crate::config::KmsCaptureParams;
use crate::encode::hdr;
use crate::encode::hwcontext::EncoderSettings;
use crate::error::{CaptureError, Result, ResultExt};
use crate::interop::{CudaApi, CudaInterop, GpuInterop, VaApi, VaapiInterop};
use crate::render::composite::{composite, CompositePlan, CursorPlacement};
use crate::render::import::{import_plane, ModifierPolicy};
use crate::render::{
    ColorConversion, ColorConversionParams, Renderer, SourceColor, Texture, TextureStorage,
    TextureTarget,
};
use crate::types::Vec2i;

/// Collaborators owned by the caller's display and GPU setup
pub struct CaptureContext {
    pub renderer: Arc<dyn Renderer>,
    pub outputs: Box<dyn OutputSource>,
    pub planes: Box<dyn PlaneSource>,
}

/// Per-frame errors that are only logged the first time
#[derive(Debug, Default)]
struct FrameErrorLog {
    request_failed: LogOnce,
    no_planes: LogOnce,
    no_primary: LogOnce,
}

/// DRM/KMS monitor capture
pub struct KmsCapture {
    params: KmsCaptureParams,
    renderer: Arc<dyn Renderer>,
    outputs: Box<dyn OutputSource>,
    planes: Box<dyn PlaneSource>,
    interop: Box<dyn GpuInterop>,

    monitor: Option<MonitorTarget>,
    capture_size: Vec2i,
    plane_source_open: bool,
    response: Option<PlaneResponse>,

    created_hw_frame: bool,
    input_texture: Option<Texture>,
    cursor_texture: Option<Texture>,
    color_conversion: Option<Box<dyn ColorConversion>>,

    stop_state: StopState,
    log: FrameErrorLog,
}

impl KmsCapture {
    /// Create a backend with an explicit hand-off
    pub fn new(
        params: KmsCaptureParams,
        context: CaptureContext,
        interop: Box<dyn GpuInterop>,
    ) -> Self {
        Self {
            params,
            renderer: context.renderer,
            outputs: context.outputs,
            planes: context.planes,
            interop,
            monitor: None,
            capture_size: Vec2i::default(),
            plane_source_open: false,
            response: None,
            created_hw_frame: false,
            input_texture: None,
            cursor_texture: None,
            color_conversion: None,
            stop_state: StopState::Continue,
            log: FrameErrorLog::default(),
        }
    }

    /// Backend rendering into VA-API surfaces
    pub fn vaapi(params: KmsCaptureParams, context: CaptureContext, va: Box<dyn VaApi>) -> Self {
        Self::new(params, context, Box::new(VaapiInterop::new(va)))
    }

    /// Backend copying into CUDA frames
    pub fn cuda(params: KmsCaptureParams, context: CaptureContext, cuda: Box<dyn CudaApi>) -> Self {
        Self::new(params, context, Box::new(CudaInterop::new(cuda)))
    }

    pub fn params(&self) -> &KmsCaptureParams {
        &self.params
    }

    /// Monitor resolved on start
    pub fn monitor(&self) -> Option<&MonitorTarget> {
        self.monitor.as_ref()
    }

    /// Post-rotation capture size
    pub fn capture_size(&self) -> Vec2i {
        self.capture_size
    }

    /// Plane descriptors held from the last request
    pub fn open_plane_fds(&self) -> usize {
        self.response.as_ref().map_or(0, PlaneResponse::fd_count)
    }

    fn latch_error(&mut self) {
        self.stop_state = StopState::Stop { error: true };
    }

    fn try_start(&mut self, settings: &mut EncoderSettings) -> Result<()> {
        self.params.validate()?;
        let card_path = self.params.card_path(self.renderer.as_ref())?;

        self.planes
            .open(&card_path)
            .context("Failed to initialize plane source")?;
        self.plane_source_open = true;
        self.probe_planes()?;

        let monitor = resolve_monitor(self.outputs.as_ref(), &self.params.display)?;
        self.capture_size = monitor.capture_size();
        let encoder_size = monitor.encoder_size();

        // No vsync throttling on the render surface
        self.renderer.set_swap_interval(0);

        let requested = (settings.width, settings.height);
        settings.width = encoder_size.x;
        settings.height = encoder_size.y;
        if let Err(e) = self
            .interop
            .create_hw_context(&card_path, self.params.hdr, settings)
        {
            (settings.width, settings.height) = requested;
            return Err(e.with_context("Failed to create hardware context"));
        }

        info!(
            "Capturing {} via {} ({}, {} at {:?}, rotation {}), encoding {}",
            monitor.name,
            self.interop.name(),
            card_path.display(),
            self.capture_size,
            monitor.position,
            monitor.rotation,
            encoder_size
        );
        self.monitor = Some(monitor);
        Ok(())
    }

    /// First request; a failure here means the helper can never serve us
    fn probe_planes(&mut self) -> Result<()> {
        let response = self.planes.request()?;
        if !response.is_ok() {
            return Err(CaptureError::plane_source(format!(
                "Plane request failed, error: {} ({})",
                response.result, response.error_message
            )));
        }
        if response.is_empty() {
            return Err(CaptureError::NoPlanes);
        }
        debug!("Plane source reported {} planes", response.planes.len());
        Ok(())
    }

    fn create_frame_resources(&mut self, settings: &EncoderSettings, frame: &mut Video) -> Result<()> {
        if self.monitor.is_none() {
            return Err(CaptureError::NotStarted);
        }
        let renderer = Arc::clone(&self.renderer);

        self.interop.allocate_frame(settings, frame)?;

        let input = renderer
            .create_texture(TextureTarget::Texture2D, TextureStorage::Empty)
            .map_err(|status| CaptureError::gpu("glGenTextures", status))?;
        self.input_texture = Some(input);

        let cursor = renderer
            .create_texture(self.interop.cursor_target(), TextureStorage::Empty)
            .map_err(|status| CaptureError::gpu("glGenTextures", status))?;
        self.cursor_texture = Some(cursor);

        let size = Vec2i::new(settings.width, settings.height);
        let target = self.interop.import_target(renderer.as_ref(), frame, size)?;

        let params = ColorConversionParams {
            source_color: SourceColor::Rgb,
            destination_color: target.destination_color,
            destination_textures: target.texture.textures(),
            color_range: self.params.color_range,
        };
        let conversion = renderer
            .create_color_conversion(&params)
            .map_err(|status| CaptureError::gpu("color conversion init", status))?;
        self.color_conversion = Some(conversion);

        debug!(
            "Created capture textures (input {}, cursor {}), converting to {:?}",
            input.id, cursor.id, target.destination_color
        );
        Ok(())
    }

    fn capture_planes(&mut self, response: &PlaneResponse, frame: &mut Video) -> Result<()> {
        if !response.is_ok() {
            if self.log.request_failed.first() {
                error!(
                    "Failed to get planes, error: {} ({})",
                    response.result, response.error_message
                );
            }
            return Err(CaptureError::plane_source(format!(
                "Plane request failed, error: {}",
                response.result
            )));
        }

        if response.is_empty() {
            if self.log.no_planes.first() {
                error!("No DRM planes found, capture will fail");
            }
            return Err(CaptureError::NoPlanes);
        }

        let monitor = self.monitor.as_ref().ok_or(CaptureError::NotStarted)?;
        let Some(selected) = select_planes(&response.planes, &monitor.connector_ids) else {
            if self.log.no_primary.first() {
                warn!("No primary plane found for {}", monitor.name);
            }
            return Err(CaptureError::NoPrimaryPlane);
        };
        let primary = selected.primary(&response.planes);
        let cursor = selected.cursor(&response.planes);

        trace!(
            "Selected plane {}x{} on connector {} (combined: {}), cursor: {}",
            primary.width,
            primary.height,
            primary.connector_id,
            selected.capture_is_combined_plane,
            cursor.is_some()
        );

        if let Some(metadata) = hdr::should_attach(primary, self.params.hdr) {
            hdr::attach_to_frame(frame, metadata)?;
        }

        let renderer = self.renderer.as_ref();
        let input = self.input_texture.ok_or(CaptureError::NotStarted)?;
        import_plane(renderer, input, primary, self.interop.primary_modifiers())?;

        let capture_pos = if selected.capture_is_combined_plane {
            monitor.position
        } else {
            Vec2i::new(primary.x, primary.y)
        };

        let cursor = match cursor {
            Some(plane) => {
                let texture = self.cursor_texture.ok_or(CaptureError::NotStarted)?;
                import_plane(renderer, texture, plane, ModifierPolicy::Include)?;
                Some(CursorPlacement {
                    texture,
                    position: Vec2i::new(plane.x, plane.y),
                    size: Vec2i::new(plane.width as i32, plane.height as i32),
                })
            }
            None => None,
        };

        let plan = CompositePlan::new(monitor.rotation, input, capture_pos, self.capture_size, cursor);
        let conversion = self
            .color_conversion
            .as_deref_mut()
            .ok_or(CaptureError::NotStarted)?;
        composite(renderer, conversion, &plan);
        renderer.swap_buffers();

        self.interop.transfer_to_encoder_buffer(frame)
    }
}

impl Capture for KmsCapture {
    fn start(&mut self, settings: &mut EncoderSettings) -> Result<()> {
        if self.monitor.is_some() {
            return Err(CaptureError::config("Capture already started"));
        }

        self.try_start(settings).map_err(|e| {
            error!("Failed to start {} capture: {}", self.interop.name(), e);
            self.stop();
            e
        })
    }

    fn tick(&mut self, settings: &EncoderSettings, frame: &mut Video) {
        if self.created_hw_frame || self.stop_state.should_stop() {
            return;
        }
        self.created_hw_frame = true;

        if let Err(e) = self.create_frame_resources(settings, frame) {
            error!("Failed to prepare {} capture: {}", self.interop.name(), e);
            self.latch_error();
        }
    }

    fn capture(&mut self, frame: &mut Video) -> Result<()> {
        if self.color_conversion.is_none() {
            return Err(CaptureError::NotStarted);
        }

        // Close the previous frame's descriptors before asking for new ones
        self.response = None;

        let response = match self.planes.request() {
            Ok(response) => response,
            Err(e) => {
                if self.log.request_failed.first() {
                    error!("Failed to get planes: {}", e);
                }
                return Err(CaptureError::plane_source(e.to_string()));
            }
        };

        let result = self.capture_planes(&response, frame);
        self.response = Some(response);

        if let Err(e) = &result {
            if !e.is_recoverable() {
                error!("{} capture failed: {}", self.interop.name(), e);
                self.latch_error();
            }
        }
        result
    }

    fn capture_end(&mut self, _frame: &mut Video) {
        self.response = None;
    }

    fn should_stop(&self) -> StopState {
        self.stop_state
    }

    fn stop(&mut self) {
        self.color_conversion = None;

        let renderer = Arc::clone(&self.renderer);
        let textures = [self.input_texture.take(), self.cursor_texture.take()];
        if renderer.has_context() {
            for texture in textures.into_iter().flatten() {
                renderer.delete_texture(texture);
            }
        }
        self.interop.release(renderer.as_ref());

        self.response = None;
        if self.plane_source_open {
            self.planes.close();
            self.plane_source_open = false;
        }

        if self.monitor.take().is_some() {
            debug!("Stopped {} capture of {}", self.interop.name(), self.params.display);
        }
        self.created_hw_frame = false;
    }
}

impl Drop for KmsCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
