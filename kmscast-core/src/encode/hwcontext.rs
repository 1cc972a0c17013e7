//! FFmpeg hardware device and frames contexts
//!
//! Thin owners around `AVBufferRef` with the reference dropped on `Drop`,
//! plus the encoder-facing settings the capture backend negotiates on start.

use std::ffi::{c_uint, c_void, CString};
use std::path::Path;
use std::ptr::null_mut;

use ffmpeg_next::ffi::{
    av_buffer_ref, av_buffer_unref, av_hwdevice_ctx_alloc, av_hwdevice_ctx_create,
    av_hwdevice_ctx_init, av_hwframe_ctx_alloc, av_hwframe_ctx_init, av_hwframe_get_buffer,
    AVBufferRef, AVHWDeviceContext, AVHWDeviceType, AVHWFramesContext,
};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::util::chroma;
use ffmpeg_next::util::color;
use tracing::{debug, error};

use crate::error::{CaptureError, Result};

/// Frames kept in the hardware pool
const INITIAL_POOL_SIZE: i32 = 1;

/// `AVCUDADeviceContext` from `libavutil/hwcontext_cuda.h`
#[repr(C)]
struct AVCUDADeviceContext {
    cuda_ctx: *mut c_void,
    stream: *mut c_void,
    internal: *mut c_void,
}

/// `AVVAAPIDeviceContext` from `libavutil/hwcontext_vaapi.h`
#[repr(C)]
struct AVVAAPIDeviceContext {
    display: *mut c_void,
    driver_quirks: c_uint,
}

/// Hardware device context reference
#[derive(Debug)]
pub struct HwDeviceContext {
    ptr: *mut AVBufferRef,
}

impl HwDeviceContext {
    /// Open a VA-API device on the given DRM render node
    pub fn vaapi(render_node: &Path) -> Result<Self> {
        let device = CString::new(render_node.as_os_str().as_encoded_bytes()).map_err(|_| {
            CaptureError::hw_context(format!("Invalid device path {}", render_node.display()))
        })?;

        let mut ptr = null_mut();
        // SAFETY: `ptr` receives a new reference on success; the device string
        // outlives the call.
        let ret = unsafe {
            av_hwdevice_ctx_create(
                &mut ptr,
                AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
                device.as_ptr(),
                null_mut(),
                0,
            )
        };
        if ret < 0 || ptr.is_null() {
            error!(
                "Failed to create VA-API hardware device context on {}: {}",
                render_node.display(),
                ffmpeg_next::Error::from(ret)
            );
            return Err(CaptureError::hw_context(
                "Failed to create hardware device context",
            ));
        }
        Ok(Self { ptr })
    }

    /// Wrap an existing CUDA context
    ///
    /// The caller must have `cuda_ctx` pushed as the current context.
    pub fn cuda(cuda_ctx: *mut c_void) -> Result<Self> {
        // SAFETY: alloc returns a fresh reference or null. The hwctx of a CUDA
        // device context is an AVCUDADeviceContext.
        unsafe {
            let mut ptr = av_hwdevice_ctx_alloc(AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA);
            if ptr.is_null() {
                return Err(CaptureError::hw_context(
                    "Failed to create hardware device context",
                ));
            }

            let device = (*ptr).data as *mut AVHWDeviceContext;
            let cuda = (*device).hwctx as *mut AVCUDADeviceContext;
            (*cuda).cuda_ctx = cuda_ctx;

            let ret = av_hwdevice_ctx_init(ptr);
            if ret < 0 {
                av_buffer_unref(&mut ptr);
                error!(
                    "Failed to initialize CUDA hardware device context: {}",
                    ffmpeg_next::Error::from(ret)
                );
                return Err(CaptureError::hw_context(
                    "Failed to create hardware device context",
                ));
            }
            Ok(Self { ptr })
        }
    }

    /// `VADisplay` of a VA-API device
    pub fn vaapi_display(&self) -> *mut c_void {
        // SAFETY: only called on contexts created by `vaapi`, whose hwctx is an
        // AVVAAPIDeviceContext.
        unsafe {
            let device = (*self.ptr).data as *mut AVHWDeviceContext;
            let vaapi = (*device).hwctx as *mut AVVAAPIDeviceContext;
            (*vaapi).display
        }
    }

    /// New reference to the same device
    pub fn try_clone(&self) -> Result<Self> {
        clone_ref(self.ptr).map(|ptr| Self { ptr })
    }

    pub fn as_ptr(&self) -> *mut AVBufferRef {
        self.ptr
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        // SAFETY: we own one reference.
        unsafe {
            av_buffer_unref(&mut self.ptr);
        }
    }
}

/// Hardware frames pool reference
#[derive(Debug)]
pub struct HwFramesContext {
    ptr: *mut AVBufferRef,
}

impl HwFramesContext {
    /// Create a frames pool of `format` surfaces backed by `sw_format`
    pub fn new(
        device: &HwDeviceContext,
        format: Pixel,
        sw_format: Pixel,
        width: i32,
        height: i32,
    ) -> Result<Self> {
        // SAFETY: the device reference is valid; the frames context is fully
        // configured before init and released on every failure path.
        unsafe {
            let mut ptr = av_hwframe_ctx_alloc(device.as_ptr());
            if ptr.is_null() {
                return Err(CaptureError::hw_context("Failed to create hwframe context"));
            }

            let frames = (*ptr).data as *mut AVHWFramesContext;
            (*frames).format = format.into();
            (*frames).sw_format = sw_format.into();
            (*frames).width = width;
            (*frames).height = height;
            (*frames).initial_pool_size = INITIAL_POOL_SIZE;

            let ret = av_hwframe_ctx_init(ptr);
            if ret < 0 {
                av_buffer_unref(&mut ptr);
                error!(
                    "Failed to initialize hardware frame context: {}",
                    ffmpeg_next::Error::from(ret)
                );
                return Err(CaptureError::hw_context(
                    "Failed to initialize hardware frame context",
                ));
            }

            debug!(
                "Created hardware frames context {:?}/{:?} {}x{}",
                format, sw_format, width, height
            );
            Ok(Self { ptr })
        }
    }

    /// Attach a pool surface to `frame`
    pub fn get_buffer(&self, frame: &mut Video) -> Result<()> {
        // SAFETY: both pointers are valid; ffmpeg takes a new surface reference
        // that is owned by the frame.
        match unsafe { av_hwframe_get_buffer(self.ptr, frame.as_mut_ptr(), 0) } {
            0 => Ok(()),
            e => {
                let err = ffmpeg_next::Error::from(e);
                error!("av_hwframe_get_buffer failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// New reference to the same pool
    pub fn try_clone(&self) -> Result<Self> {
        clone_ref(self.ptr).map(|ptr| Self { ptr })
    }

    pub fn as_ptr(&self) -> *mut AVBufferRef {
        self.ptr
    }
}

impl Drop for HwFramesContext {
    fn drop(&mut self) {
        // SAFETY: we own one reference.
        unsafe {
            av_buffer_unref(&mut self.ptr);
        }
    }
}

fn clone_ref(ptr: *mut AVBufferRef) -> Result<*mut AVBufferRef> {
    // SAFETY: `ptr` is a live reference owned by the caller.
    let clone = unsafe { av_buffer_ref(ptr) };
    if clone.is_null() {
        Err(CaptureError::hw_context("Failed to reference hardware context"))
    } else {
        Ok(clone)
    }
}

/// Device and frames context pair produced on start
#[derive(Debug)]
pub struct HwContexts {
    pub device: HwDeviceContext,
    pub frames: HwFramesContext,
}

impl HwContexts {
    /// Second set of references for the encoder
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            device: self.device.try_clone()?,
            frames: self.frames.try_clone()?,
        })
    }
}

/// Encoder configuration shared between the encoder and the capture backend
///
/// The encoder fills in pixel format and color description. On start the
/// backend writes the negotiated size and its hardware contexts back.
#[derive(Debug)]
pub struct EncoderSettings {
    pub width: i32,
    pub height: i32,
    /// Hardware pixel format (`VAAPI` or `CUDA`)
    pub pixel_format: Pixel,
    pub color_range: color::Range,
    pub color_primaries: color::Primaries,
    pub color_trc: color::TransferCharacteristic,
    pub colorspace: color::Space,
    pub chroma_location: chroma::Location,
    pub hw: Option<HwContexts>,
}

impl EncoderSettings {
    /// Settings for the given hardware pixel format, unsized
    pub fn new(pixel_format: Pixel) -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format,
            color_range: color::Range::MPEG,
            color_primaries: color::Primaries::BT709,
            color_trc: color::TransferCharacteristic::BT709,
            colorspace: color::Space::BT709,
            chroma_location: chroma::Location::Left,
            hw: None,
        }
    }

    /// Color description for HDR10 output
    pub fn hdr10(mut self) -> Self {
        self.color_primaries = color::Primaries::BT2020;
        self.color_trc = color::TransferCharacteristic::SMPTE2084;
        self.colorspace = color::Space::BT2020NCL;
        self
    }
}

/// Reset `frame` to the encoder's format and attach a hardware surface
pub fn allocate_frame(settings: &EncoderSettings, frame: &mut Video) -> Result<()> {
    let hw = settings
        .hw
        .as_ref()
        .ok_or_else(|| CaptureError::hw_context("No hardware frames context"))?;

    *frame = Video::empty();
    describe_frame(settings, frame);
    hw.frames.get_buffer(frame)
}

/// Copy format, size and color description onto `frame`
pub fn describe_frame(settings: &EncoderSettings, frame: &mut Video) {
    frame.set_format(settings.pixel_format);
    frame.set_width(settings.width as u32);
    frame.set_height(settings.height as u32);
    frame.set_color_range(settings.color_range);
    frame.set_color_primaries(settings.color_primaries);
    frame.set_color_transfer_characteristic(settings.color_trc);
    frame.set_color_space(settings.colorspace);
    frame.set_chroma_location(settings.chroma_location);
}
