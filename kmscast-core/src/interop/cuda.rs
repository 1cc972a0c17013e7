//! CUDA hand-off
//!
//! The conversion stage renders BGR into a GL texture that is registered with
//! CUDA and kept mapped. Each frame the mapped array is copied into the
//! encoder's device memory.
//!
//! Every CUDA call is made with the capture's CUDA context pushed, through
//! [`CudaContextGuard`].

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::path::Path;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use tracing::{debug, error, info, warn};

use super::{GpuInterop, ImportedTexture, InteropTarget};
use crate::encode::hwcontext::{EncoderSettings, HwContexts, HwDeviceContext, HwFramesContext};
use crate::error::{CaptureError, Result};
use crate::render::import::ModifierPolicy;
use crate::render::{
    DestinationColor, Renderer, Texture, TextureStorage, TextureTarget, GL_TEXTURE_2D,
};
use crate::types::Vec2i;

pub type CUresult = i32;
pub type CUcontext = *mut c_void;
pub type CUgraphicsResource = *mut c_void;
pub type CUarray = *mut c_void;
pub type CUdeviceptr = u64;

pub const CUDA_SUCCESS: CUresult = 0;
pub const CU_GRAPHICS_REGISTER_FLAGS_NONE: u32 = 0;
pub const CU_GRAPHICS_MAP_RESOURCE_FLAGS_NONE: u32 = 0;

/// `CUmemorytype`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CUmemorytype {
    HOST = 1,
    DEVICE = 2,
    ARRAY = 3,
    UNIFIED = 4,
}

/// `CUDA_MEMCPY2D`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CUDA_MEMCPY2D {
    pub srcXInBytes: usize,
    pub srcY: usize,
    pub srcMemoryType: CUmemorytype,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub srcPitch: usize,
    pub dstXInBytes: usize,
    pub dstY: usize,
    pub dstMemoryType: CUmemorytype,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub dstPitch: usize,
    pub WidthInBytes: usize,
    pub Height: usize,
}

impl CUDA_MEMCPY2D {
    /// Copy `width_in_bytes` x `height` from an array to device memory
    pub fn array_to_device(
        src: CUarray,
        dst: CUdeviceptr,
        pitch: usize,
        width_in_bytes: usize,
        height: usize,
    ) -> Self {
        Self {
            srcXInBytes: 0,
            srcY: 0,
            srcMemoryType: CUmemorytype::ARRAY,
            srcHost: std::ptr::null(),
            srcDevice: 0,
            srcArray: src,
            srcPitch: pitch,
            dstXInBytes: 0,
            dstY: 0,
            dstMemoryType: CUmemorytype::DEVICE,
            dstHost: std::ptr::null_mut(),
            dstDevice: dst,
            dstArray: std::ptr::null_mut(),
            dstPitch: pitch,
            WidthInBytes: width_in_bytes,
            Height: height,
        }
    }
}

/// CUDA driver entry points used by the hand-off, plus the context they run in
///
/// Errors carry the raw `CUresult`.
pub trait CudaApi {
    /// Context created by the caller for this capture
    fn context(&self) -> CUcontext;

    /// `cuCtxPushCurrent`
    fn ctx_push_current(&self, ctx: CUcontext) -> std::result::Result<(), CUresult>;

    /// `cuCtxPopCurrent`
    fn ctx_pop_current(&self) -> std::result::Result<(), CUresult>;

    /// `cuGraphicsGLRegisterImage`
    fn graphics_gl_register_image(
        &self,
        image: u32,
        target: u32,
        flags: u32,
    ) -> std::result::Result<CUgraphicsResource, CUresult>;

    /// `cuGraphicsResourceSetMapFlags`
    fn graphics_resource_set_map_flags(
        &self,
        resource: CUgraphicsResource,
        flags: u32,
    ) -> std::result::Result<(), CUresult>;

    /// `cuGraphicsMapResources` for a single resource on the default stream
    fn graphics_map_resources(&self, resource: CUgraphicsResource) -> std::result::Result<(), CUresult>;

    /// `cuGraphicsSubResourceGetMappedArray` for index 0, level 0
    fn graphics_sub_resource_get_mapped_array(
        &self,
        resource: CUgraphicsResource,
    ) -> std::result::Result<CUarray, CUresult>;

    /// `cuGraphicsUnmapResources`
    fn graphics_unmap_resources(&self, resource: CUgraphicsResource) -> std::result::Result<(), CUresult>;

    /// `cuGraphicsUnregisterResource`
    fn graphics_unregister_resource(&self, resource: CUgraphicsResource) -> std::result::Result<(), CUresult>;

    /// `cuMemcpy2D`
    fn memcpy_2d(&self, copy: &CUDA_MEMCPY2D) -> std::result::Result<(), CUresult>;

    /// `cuGetErrorString`
    fn error_string(&self, code: CUresult) -> String;
}

/// Keeps the capture's CUDA context current until dropped
pub struct CudaContextGuard<'a> {
    cuda: &'a dyn CudaApi,
}

impl<'a> CudaContextGuard<'a> {
    pub fn push(cuda: &'a dyn CudaApi) -> Result<Self> {
        cuda.ctx_push_current(cuda.context())
            .map_err(|code| cuda_error(cuda, "cuCtxPushCurrent", code))?;
        Ok(Self { cuda })
    }
}

impl Drop for CudaContextGuard<'_> {
    fn drop(&mut self) {
        if let Err(code) = self.cuda.ctx_pop_current() {
            warn!("cuCtxPopCurrent failed: {}", self.cuda.error_string(code));
        }
    }
}

fn cuda_error(cuda: &dyn CudaApi, operation: &'static str, code: CUresult) -> CaptureError {
    let message = cuda.error_string(code);
    error!("{} failed, error: {} ({})", operation, code, message);
    CaptureError::Cuda {
        operation,
        code,
        message,
    }
}

/// Drop `value` with the CUDA context current
///
/// The hardware device and frames contexts own CUDA allocations.
pub fn drop_in_context<T>(cuda: &dyn CudaApi, value: T) {
    let _current = CudaContextGuard::push(cuda)
        .map_err(|e| warn!("Releasing CUDA resources without a current context: {}", e))
        .ok();
    drop(value);
}

/// Registered, mapped GL texture
#[derive(Debug)]
struct MappedTexture {
    texture: Texture,
    resource: Option<CUgraphicsResource>,
    mapped: bool,
    array: CUarray,
}

/// Copies the rendered texture into CUDA frames
pub struct CudaInterop {
    cuda: Box<dyn CudaApi>,
    hw: Option<HwContexts>,
    target: Option<MappedTexture>,
}

impl CudaInterop {
    pub fn new(cuda: Box<dyn CudaApi>) -> Self {
        Self {
            cuda,
            hw: None,
            target: None,
        }
    }

    fn register(&self, target: &mut MappedTexture) -> Result<()> {
        let cuda = self.cuda.as_ref();
        let _current = CudaContextGuard::push(cuda)?;

        let resource = cuda
            .graphics_gl_register_image(
                target.texture.id,
                GL_TEXTURE_2D,
                CU_GRAPHICS_REGISTER_FLAGS_NONE,
            )
            .map_err(|code| cuda_error(cuda, "cuGraphicsGLRegisterImage", code))?;
        target.resource = Some(resource);

        cuda.graphics_resource_set_map_flags(resource, CU_GRAPHICS_MAP_RESOURCE_FLAGS_NONE)
            .map_err(|code| cuda_error(cuda, "cuGraphicsResourceSetMapFlags", code))?;
        cuda.graphics_map_resources(resource)
            .map_err(|code| cuda_error(cuda, "cuGraphicsMapResources", code))?;
        target.mapped = true;

        target.array = cuda
            .graphics_sub_resource_get_mapped_array(resource)
            .map_err(|code| cuda_error(cuda, "cuGraphicsSubResourceGetMappedArray", code))?;
        Ok(())
    }

    fn unregister(&self, target: &mut MappedTexture) {
        let Some(resource) = target.resource.take() else {
            return;
        };
        let cuda = self.cuda.as_ref();
        let _current = match CudaContextGuard::push(cuda) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Leaking CUDA graphics resource: {}", e);
                return;
            }
        };

        if target.mapped {
            if let Err(code) = cuda.graphics_unmap_resources(resource) {
                warn!("cuGraphicsUnmapResources failed: {}", cuda.error_string(code));
            }
            target.mapped = false;
        }
        if let Err(code) = cuda.graphics_unregister_resource(resource) {
            warn!("cuGraphicsUnregisterResource failed: {}", cuda.error_string(code));
        }
        target.array = std::ptr::null_mut();
    }
}

impl GpuInterop for CudaInterop {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn cursor_target(&self) -> TextureTarget {
        TextureTarget::ExternalOes
    }

    fn primary_modifiers(&self) -> ModifierPolicy {
        ModifierPolicy::Include
    }

    fn create_hw_context(
        &mut self,
        _card_path: &Path,
        _hdr: bool,
        settings: &mut EncoderSettings,
    ) -> Result<()> {
        let contexts = {
            let _current = CudaContextGuard::push(self.cuda.as_ref())?;
            let device = HwDeviceContext::cuda(self.cuda.context())?;
            let frames = HwFramesContext::new(
                &device,
                settings.pixel_format,
                Pixel::BGRZERO,
                settings.width,
                settings.height,
            )?;
            HwContexts { device, frames }
        };

        settings.hw = Some(contexts.try_clone()?);
        self.hw = Some(contexts);

        info!("CUDA context ({}x{}, BGR0)", settings.width, settings.height);
        Ok(())
    }

    fn import_target(
        &mut self,
        renderer: &dyn Renderer,
        _frame: &Video,
        size: Vec2i,
    ) -> Result<InteropTarget> {
        let texture = renderer
            .create_texture(
                TextureTarget::Texture2D,
                TextureStorage::Rgb {
                    width: size.x,
                    height: size.y,
                },
            )
            .map_err(|status| {
                error!("Failed to create opengl texture: {}", status);
                CaptureError::gpu("glTexImage2D", status)
            })?;

        let mut target = MappedTexture {
            texture,
            resource: None,
            mapped: false,
            array: std::ptr::null_mut(),
        };
        let registered = self.register(&mut target);
        self.target = Some(target);
        registered?;

        debug!("Registered texture {} with CUDA ({})", texture.id, size);
        Ok(InteropTarget {
            texture: ImportedTexture::Single(texture),
            destination_color: DestinationColor::Bgr,
        })
    }

    fn transfer_to_encoder_buffer(&mut self, frame: &mut Video) -> Result<()> {
        let array = match &self.target {
            Some(target) if target.mapped => target.array,
            _ => return Err(CaptureError::NotStarted),
        };

        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let pitch = width * 4;

        // SAFETY: data[0] of a CUDA frame is a CUdeviceptr sized for the pool
        // surface; the linesize matches the pitch of the copy below.
        let dst = unsafe {
            let ptr = frame.as_mut_ptr();
            (*ptr).linesize[0] = pitch as i32;
            (*ptr).data[0] as CUdeviceptr
        };

        let cuda = self.cuda.as_ref();
        let _current = CudaContextGuard::push(cuda)?;
        cuda.memcpy_2d(&CUDA_MEMCPY2D::array_to_device(array, dst, pitch, pitch, height))
            .map_err(|code| cuda_error(cuda, "cuMemcpy2D", code))
    }

    fn release(&mut self, renderer: &dyn Renderer) {
        if let Some(mut target) = self.target.take() {
            self.unregister(&mut target);
            if renderer.has_context() {
                renderer.delete_texture(target.texture);
            }
        }
        if let Some(hw) = self.hw.take() {
            drop_in_context(self.cuda.as_ref(), hw);
        }
    }
}
