//! VA-API hand-off
//!
//! The encoder's VA surface is exported once as separate DRM PRIME layers and
//! each layer is imported as a GL texture. The conversion stage then renders
//! NV12/P010 straight into the surface the encoder reads.

use std::ffi::c_void;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use drm_fourcc::DrmFourcc;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use tracing::{debug, error, info, warn};

use super::{GpuInterop, ImportedTexture, InteropTarget};
use crate::capture::device;
use crate::encode::hwcontext::{EncoderSettings, HwContexts, HwDeviceContext, HwFramesContext};
use crate::error::{CaptureError, Result};
use crate::render::import::{import_layers, layer_size, DmabufImage, ModifierPolicy};
use crate::render::{DestinationColor, Renderer, TextureTarget};
use crate::types::Vec2i;

pub type VaDisplay = *mut c_void;
pub type VaSurfaceId = u32;

pub const VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2: u32 = 0x4000_0000;
pub const VA_EXPORT_SURFACE_WRITE_ONLY: u32 = 0x0002;
pub const VA_EXPORT_SURFACE_SEPARATE_LAYERS: u32 = 0x0004;

/// One exported memory object; the descriptor is closed on drop
#[derive(Debug)]
pub struct PrimeObject {
    pub fd: OwnedFd,
    pub size: u32,
    pub drm_format_modifier: u64,
}

/// One exported layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimeLayer {
    pub drm_format: u32,
    pub num_planes: u32,
    pub object_index: [u32; 4],
    pub offset: [u32; 4],
    pub pitch: [u32; 4],
}

/// `VADRMPRIMESurfaceDescriptor` with owned descriptors
#[derive(Debug)]
pub struct PrimeSurface {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub objects: Vec<PrimeObject>,
    pub layers: Vec<PrimeLayer>,
}

/// libva entry points used by the hand-off
///
/// Errors carry the raw `VAStatus`.
pub trait VaApi {
    /// `vaExportSurfaceHandle`
    fn export_surface_handle(
        &self,
        display: VaDisplay,
        surface: VaSurfaceId,
        mem_type: u32,
        flags: u32,
    ) -> std::result::Result<PrimeSurface, i32>;

    /// `vaSyncSurface`
    fn sync_surface(&self, display: VaDisplay, surface: VaSurfaceId) -> std::result::Result<(), i32>;
}

/// Software format of the VA surfaces
pub fn sw_format(hdr: bool) -> Pixel {
    if hdr { Pixel::P010LE } else { Pixel::NV12 }
}

/// Texture formats for the luma and chroma layers of a surface format
pub fn layer_formats(fourcc: u32) -> Option<([u32; 2], DestinationColor)> {
    match DrmFourcc::try_from(fourcc).ok()? {
        DrmFourcc::Nv12 => Some((
            [DrmFourcc::R8 as u32, DrmFourcc::Gr88 as u32],
            DestinationColor::Nv12,
        )),
        DrmFourcc::P010 => Some((
            [DrmFourcc::R16 as u32, DrmFourcc::Gr1616 as u32],
            DestinationColor::P010,
        )),
        _ => None,
    }
}

/// Renders into the encoder's exported VA surface
pub struct VaapiInterop {
    va: Box<dyn VaApi>,
    hw: Option<HwContexts>,
    display: VaDisplay,
    prime: Option<PrimeSurface>,
    target: Option<ImportedTexture>,
}

impl VaapiInterop {
    pub fn new(va: Box<dyn VaApi>) -> Self {
        Self {
            va,
            hw: None,
            display: std::ptr::null_mut(),
            prime: None,
            target: None,
        }
    }

    /// Number of exported object descriptors currently held
    pub fn exported_fds(&self) -> usize {
        self.prime.as_ref().map_or(0, |prime| prime.objects.len())
    }

    fn layer_images(prime: &PrimeSurface, formats: [u32; 2]) -> Result<Vec<DmabufImage>> {
        formats
            .iter()
            .enumerate()
            .map(|(index, &fourcc)| {
                let layer = prime.layers.get(index).ok_or_else(|| {
                    CaptureError::hw_context(format!(
                        "Exported surface has {} layers, expected 2",
                        prime.layers.len()
                    ))
                })?;
                let object = prime
                    .objects
                    .get(layer.object_index[0] as usize)
                    .ok_or_else(|| {
                        CaptureError::hw_context(format!(
                            "Layer {} references missing object {}",
                            index, layer.object_index[0]
                        ))
                    })?;

                let (width, height) = layer_size(prime.width, prime.height, index);
                Ok(DmabufImage {
                    fourcc,
                    width,
                    height,
                    fd: object.fd.as_raw_fd(),
                    offset: layer.offset[0],
                    pitch: layer.pitch[0],
                    modifier: object.drm_format_modifier,
                })
            })
            .collect()
    }
}

impl GpuInterop for VaapiInterop {
    fn name(&self) -> &'static str {
        "vaapi"
    }

    fn cursor_target(&self) -> TextureTarget {
        TextureTarget::Texture2D
    }

    fn primary_modifiers(&self) -> ModifierPolicy {
        ModifierPolicy::Omit
    }

    fn create_hw_context(
        &mut self,
        card_path: &Path,
        hdr: bool,
        settings: &mut EncoderSettings,
    ) -> Result<()> {
        let render_node = device::render_node(card_path)?;
        let device = HwDeviceContext::vaapi(&render_node)?;
        let frames = HwFramesContext::new(
            &device,
            settings.pixel_format,
            sw_format(hdr),
            settings.width,
            settings.height,
        )?;

        self.display = device.vaapi_display();
        let contexts = HwContexts { device, frames };
        settings.hw = Some(contexts.try_clone()?);
        self.hw = Some(contexts);

        info!(
            "VA-API context on {} ({}x{}, {:?})",
            render_node.display(),
            settings.width,
            settings.height,
            sw_format(hdr)
        );
        Ok(())
    }

    fn import_target(
        &mut self,
        renderer: &dyn Renderer,
        frame: &Video,
        _size: Vec2i,
    ) -> Result<InteropTarget> {
        // SAFETY: VA-API frames carry the VASurfaceID in data[3].
        let surface = unsafe { (*frame.as_ptr()).data[3] as usize as VaSurfaceId };

        let prime = self
            .va
            .export_surface_handle(
                self.display,
                surface,
                VA_SURFACE_ATTRIB_MEM_TYPE_DRM_PRIME_2,
                VA_EXPORT_SURFACE_WRITE_ONLY | VA_EXPORT_SURFACE_SEPARATE_LAYERS,
            )
            .map_err(|code| {
                error!("vaExportSurfaceHandle failed, error: {}", code);
                CaptureError::Vaapi {
                    operation: "vaExportSurfaceHandle",
                    code,
                }
            })?;

        if let Err(code) = self.va.sync_surface(self.display, surface) {
            warn!("vaSyncSurface failed, error: {}", code);
        }

        let prime = self.prime.insert(prime);
        let (formats, destination_color) = layer_formats(prime.fourcc).ok_or_else(|| {
            error!(
                "Unexpected fourcc 0x{:08x} for output drm fd, expected nv12 or p010",
                prime.fourcc
            );
            CaptureError::UnsupportedFormat(prime.fourcc)
        })?;

        let images = Self::layer_images(prime, formats)?;
        let textures = import_layers(renderer, &images)?;
        let texture = ImportedTexture::SemiPlanar {
            luma: textures[0],
            chroma: textures[1],
        };
        self.target = Some(texture);

        debug!(
            "Imported VA surface {} ({}x{}, {} objects) as {:?}",
            surface,
            prime.width,
            prime.height,
            prime.objects.len(),
            destination_color
        );
        Ok(InteropTarget {
            texture,
            destination_color,
        })
    }

    fn transfer_to_encoder_buffer(&mut self, _frame: &mut Video) -> Result<()> {
        // Rendering already wrote into the encoder's surface
        Ok(())
    }

    fn release(&mut self, renderer: &dyn Renderer) {
        if let Some(target) = self.target.take() {
            if renderer.has_context() {
                for texture in target.textures() {
                    renderer.delete_texture(texture);
                }
            }
        }
        self.prime = None;
        self.hw = None;
        self.display = std::ptr::null_mut();
    }
}
