//! Zero-copy DMA-BUF import
//!
//! A plane's DMA-BUF is described to EGL as a `EGL_LINUX_DMA_BUF_EXT` image,
//! bound to a texture and released straight away. The texture keeps
//! referencing the buffer; the descriptor stays owned by the plane response
//! and is closed with it.

use std::os::fd::RawFd;
use tracing::error;

use super::{EglImage, Renderer, Texture, TextureStorage, TextureTarget};
use crate::capture::plane::PlaneDescriptor;
use crate::error::{CaptureError, Result};

pub const EGL_NONE: isize = 0x3038;
pub const EGL_HEIGHT: isize = 0x3056;
pub const EGL_WIDTH: isize = 0x3057;
pub const EGL_LINUX_DMA_BUF_EXT: isize = 0x3270;
pub const EGL_LINUX_DRM_FOURCC_EXT: isize = 0x3271;
pub const EGL_DMA_BUF_PLANE0_FD_EXT: isize = 0x3272;
pub const EGL_DMA_BUF_PLANE0_OFFSET_EXT: isize = 0x3273;
pub const EGL_DMA_BUF_PLANE0_PITCH_EXT: isize = 0x3274;
pub const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: isize = 0x3443;
pub const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: isize = 0x3444;

/// Whether the format modifier goes into the attribute list
///
/// Cursor planes always carry it. The primary plane carries it unless the
/// hand-off says otherwise ([`GpuInterop::primary_modifiers`]): amdgpu VA-API
/// encoding intermittently fails CPB allocation when the primary plane is
/// imported with its modifier (kmsgrab shows the same).
///
/// [`GpuInterop::primary_modifiers`]: crate::interop::GpuInterop::primary_modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierPolicy {
    Omit,
    Include,
}

/// Single-plane DMA-BUF image description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmabufImage {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub fd: RawFd,
    pub offset: u32,
    pub pitch: u32,
    pub modifier: u64,
}

impl DmabufImage {
    /// Describe a KMS plane
    pub fn from_plane(plane: &PlaneDescriptor) -> Self {
        Self {
            fourcc: plane.pixel_format,
            width: plane.width,
            height: plane.height,
            fd: plane.raw_fd(),
            offset: plane.offset,
            pitch: plane.pitch,
            modifier: plane.modifier,
        }
    }

    /// `EGL_NONE`-terminated attribute list for `eglCreateImage`
    pub fn attributes(&self, modifiers: ModifierPolicy) -> Vec<isize> {
        let mut attributes = vec![
            EGL_LINUX_DRM_FOURCC_EXT,
            self.fourcc as isize,
            EGL_WIDTH,
            self.width as isize,
            EGL_HEIGHT,
            self.height as isize,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            self.fd as isize,
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            self.offset as isize,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            self.pitch as isize,
        ];
        if modifiers == ModifierPolicy::Include {
            attributes.extend_from_slice(&[
                EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT,
                (self.modifier & 0xFFFF_FFFF) as isize,
                EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT,
                (self.modifier >> 32) as isize,
            ]);
        }
        attributes.push(EGL_NONE);
        attributes
    }
}

/// Size of layer `index` of a semi-planar surface; chroma is half size
pub fn layer_size(width: u32, height: u32, index: usize) -> (u32, u32) {
    let div = if index == 0 { 1 } else { 2 };
    (width / div, height / div)
}

/// Destroys the wrapped EGLImage when dropped
pub struct ImageGuard<'a> {
    renderer: &'a dyn Renderer,
    image: Option<EglImage>,
}

impl<'a> ImageGuard<'a> {
    /// Create the image described by `attributes`
    pub fn create(renderer: &'a dyn Renderer, attributes: &[isize]) -> Result<Self> {
        let image = renderer
            .create_image(attributes)
            .map_err(|status| CaptureError::gpu("eglCreateImage", status))?;
        Ok(Self {
            renderer,
            image: Some(image),
        })
    }

    pub fn image(&self) -> Option<&EglImage> {
        self.image.as_ref()
    }
}

impl Drop for ImageGuard<'_> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            self.renderer.destroy_image(image);
        }
    }
}

/// Import `image` into `texture`
///
/// Failures here are driver-level incompatibilities and are fatal for the
/// backend, unlike a missing plane.
pub fn import_image(
    renderer: &dyn Renderer,
    texture: Texture,
    image: &DmabufImage,
    modifiers: ModifierPolicy,
) -> Result<()> {
    let guard = ImageGuard::create(renderer, &image.attributes(modifiers)).map_err(|e| {
        error!(
            "Failed to create egl image from drm fd {} ({}x{}, fourcc 0x{:08x}): {}",
            image.fd, image.width, image.height, image.fourcc, e
        );
        e
    })?;

    if let Some(egl_image) = guard.image() {
        renderer.bind_image(texture, egl_image).map_err(|status| {
            error!("Failed to bind egl image to gl texture {}: {}", texture.id, status);
            CaptureError::gpu("glEGLImageTargetTexture2DOES", status)
        })?;
    }
    Ok(())
}

/// Import a KMS plane into `texture`
pub fn import_plane(
    renderer: &dyn Renderer,
    texture: Texture,
    plane: &PlaneDescriptor,
    modifiers: ModifierPolicy,
) -> Result<()> {
    import_image(renderer, texture, &DmabufImage::from_plane(plane), modifiers)
}

/// Create one 2D texture per layer and import each layer into it
///
/// Modifiers are omitted. On failure every texture created so far is deleted.
pub fn import_layers(renderer: &dyn Renderer, layers: &[DmabufImage]) -> Result<Vec<Texture>> {
    let mut textures = Vec::with_capacity(layers.len());
    for layer in layers {
        let imported = renderer
            .create_texture(TextureTarget::Texture2D, TextureStorage::Empty)
            .map_err(|status| CaptureError::gpu("glGenTextures", status))
            .and_then(|texture| {
                textures.push(texture);
                import_image(renderer, texture, layer, ModifierPolicy::Omit)
            });

        if let Err(e) = imported {
            for texture in textures.drain(..) {
                renderer.delete_texture(texture);
            }
            return Err(e);
        }
    }
    Ok(textures)
}
