//! Render context seam
//!
//! EGL/GL loading, context creation and the color conversion shaders live
//! outside this crate. The capture backend reaches them through [`Renderer`]
//! and [`ColorConversion`], which map one-to-one onto the EGL/GL calls the
//! import and composite stages need.

pub mod composite;
pub mod import;

use std::path::PathBuf;

use crate::error::GpuStatus;
use crate::types::{ColorRange, Vec2i};

/// `GL_TEXTURE_2D`
pub const GL_TEXTURE_2D: u32 = 0x0DE1;
/// `GL_TEXTURE_EXTERNAL_OES`
pub const GL_TEXTURE_EXTERNAL_OES: u32 = 0x8D65;

/// Texture binding point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    ExternalOes,
}

impl TextureTarget {
    /// GL enum for the binding point
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Texture2D => GL_TEXTURE_2D,
            Self::ExternalOes => GL_TEXTURE_EXTERNAL_OES,
        }
    }

    /// Whether the conversion shader has to sample through `samplerExternalOES`
    pub fn is_external(self) -> bool {
        self == Self::ExternalOes
    }
}

/// Texture storage allocated at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureStorage {
    /// No storage; filled by binding an image
    Empty,
    /// `GL_RGB` storage of the given size with nearest filtering
    Rgb { width: i32, height: i32 },
}

/// GL texture name plus the binding point it was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture {
    pub id: u32,
    pub target: TextureTarget,
}

/// EGLImage handle
///
/// Created from a DMA-BUF attribute list. Holding one does not keep the
/// DMA-BUF descriptor open and destroying it does not close the descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct EglImage(pub usize);

/// Color layout of the textures fed into the conversion stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceColor {
    Rgb,
}

/// Color layout of the textures the conversion stage renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationColor {
    /// 8-bit luma + interleaved chroma
    Nv12,
    /// 10-bit luma + interleaved chroma
    P010,
    /// Packed BGR, 4 bytes per pixel
    Bgr,
}

/// Parameters for creating the color conversion stage
#[derive(Debug, Clone, PartialEq)]
pub struct ColorConversionParams {
    pub source_color: SourceColor,
    pub destination_color: DestinationColor,
    pub destination_textures: Vec<Texture>,
    pub color_range: ColorRange,
}

/// The color conversion stage, consumed as an opaque draw call
pub trait ColorConversion {
    /// Draw `texture_size` pixels at `texture_pos` of `texture` into the
    /// destination at `dest_pos` with size `dest_size`, rotated by `rotation`
    /// radians. `external` selects the `samplerExternalOES` shader.
    #[allow(clippy::too_many_arguments)]
    fn draw(
        &mut self,
        texture: Texture,
        dest_pos: Vec2i,
        dest_size: Vec2i,
        texture_pos: Vec2i,
        texture_size: Vec2i,
        rotation: f32,
        external: bool,
    );
}

/// EGL/GL render context owned by the caller
///
/// All calls are made from the capture thread with the context current.
pub trait Renderer {
    /// Whether a GL context exists; GL objects are only deleted when it does
    fn has_context(&self) -> bool;

    /// DRM card node the context was created on, if known
    fn card_path(&self) -> Option<PathBuf>;

    /// `eglSwapInterval`
    fn set_swap_interval(&self, interval: i32);

    /// `glGenTextures` with clamp-to-edge wrapping and storage allocation
    fn create_texture(
        &self,
        target: TextureTarget,
        storage: TextureStorage,
    ) -> std::result::Result<Texture, GpuStatus>;

    /// `glDeleteTextures`
    fn delete_texture(&self, texture: Texture);

    /// `eglCreateImage(display, EGL_NO_CONTEXT, EGL_LINUX_DMA_BUF_EXT, NULL, attributes)`
    fn create_image(&self, attributes: &[isize]) -> std::result::Result<EglImage, GpuStatus>;

    /// `eglDestroyImage`
    fn destroy_image(&self, image: EglImage);

    /// `glEGLImageTargetTexture2DOES` on the texture's binding point
    fn bind_image(&self, texture: Texture, image: &EglImage) -> std::result::Result<(), GpuStatus>;

    /// `glClearColor` + `glClear(GL_COLOR_BUFFER_BIT)`
    fn clear(&self, color: [f32; 4]);

    /// `eglSwapBuffers` on the context's surface
    fn swap_buffers(&self);

    /// Build the conversion stage rendering into `params.destination_textures`
    fn create_color_conversion(
        &self,
        params: &ColorConversionParams,
    ) -> std::result::Result<Box<dyn ColorConversion>, GpuStatus>;
}
