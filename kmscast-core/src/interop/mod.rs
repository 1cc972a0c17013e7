//! GPU-to-encoder hand-off
//!
//! The import and composite pipeline is the same for every GPU. What differs
//! is where the conversion stage renders to and how that ends up in the
//! encoder's frame: VA-API renders straight into the exported surface, CUDA
//! renders into a texture and copies its mapped array into device memory.

pub mod cuda;
pub mod vaapi;

use std::path::Path;

use ffmpeg_next::frame::Video;

use crate::encode::hwcontext::{self, EncoderSettings};
use crate::error::Result;
use crate::render::import::ModifierPolicy;
use crate::render::{DestinationColor, Renderer, Texture, TextureTarget};
use crate::types::Vec2i;

pub use cuda::{CudaApi, CudaInterop};
pub use vaapi::{VaApi, VaapiInterop};

/// Textures the conversion stage renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportedTexture {
    /// Packed RGB/BGR
    Single(Texture),
    /// Luma plus half-size interleaved chroma
    SemiPlanar { luma: Texture, chroma: Texture },
}

impl ImportedTexture {
    pub fn textures(&self) -> Vec<Texture> {
        match *self {
            Self::Single(texture) => vec![texture],
            Self::SemiPlanar { luma, chroma } => vec![luma, chroma],
        }
    }
}

/// Conversion target prepared on the first tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteropTarget {
    pub texture: ImportedTexture,
    pub destination_color: DestinationColor,
}

/// Backend-specific part of the capture pipeline
pub trait GpuInterop {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Binding point the cursor plane is sampled through
    fn cursor_target(&self) -> TextureTarget;

    /// Whether the primary plane is imported with its format modifier
    fn primary_modifiers(&self) -> ModifierPolicy;

    /// Create the hardware device and frames contexts sized to `settings`
    /// and store them in `settings.hw`
    fn create_hw_context(
        &mut self,
        card_path: &Path,
        hdr: bool,
        settings: &mut EncoderSettings,
    ) -> Result<()>;

    /// Reset `frame` and attach a surface from the frames pool
    fn allocate_frame(&mut self, settings: &EncoderSettings, frame: &mut Video) -> Result<()> {
        hwcontext::allocate_frame(settings, frame)
    }

    /// Prepare the textures the conversion stage renders into for `frame`
    fn import_target(
        &mut self,
        renderer: &dyn Renderer,
        frame: &Video,
        size: Vec2i,
    ) -> Result<InteropTarget>;

    /// Move the rendered image into the encoder's frame
    fn transfer_to_encoder_buffer(&mut self, frame: &mut Video) -> Result<()>;

    /// Release everything acquired since `create_hw_context`; idempotent
    fn release(&mut self, renderer: &dyn Renderer);
}
