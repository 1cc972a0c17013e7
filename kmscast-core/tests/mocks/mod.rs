//! Mock infrastructure for testing
//!
//! Fake render context, display server, plane helper and GPU interop. Every
//! fake records what it was asked to do in a shared log so tests can inspect
//! it after handing the fake to the backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use parking_lot::Mutex;

use kmscast_core::capture::plane::{
    Chromaticity, HdrMetadataInfoframe, HdrOutputMetadata, HDMI_EOTF_SMPTE_ST2084,
    HDMI_STATIC_METADATA_TYPE1,
};
use kmscast_core::capture::{
    CaptureContext, OutputInfo, OutputSource, PlaneDescriptor, PlaneResponse, PlaneSource,
};
use kmscast_core::encode::hwcontext::{describe_frame, EncoderSettings};
use kmscast_core::error::{CaptureError, GpuStatus, Result};
use kmscast_core::interop::cuda::{
    CUarray, CUcontext, CUgraphicsResource, CUresult, CudaApi, CUDA_MEMCPY2D,
};
use kmscast_core::interop::vaapi::{PrimeLayer, PrimeObject, PrimeSurface, VaApi, VaDisplay, VaSurfaceId};
use kmscast_core::interop::{GpuInterop, ImportedTexture, InteropTarget};
use kmscast_core::render::import::ModifierPolicy;
use kmscast_core::render::{
    ColorConversion, ColorConversionParams, DestinationColor, EglImage, Renderer, Texture,
    TextureStorage, TextureTarget,
};
use kmscast_core::types::{GpuInfo, GpuVendor, Rotation, Vec2i};
use kmscast_core::KmsCaptureParams;

/// `DRM_FORMAT_XRGB8888`
pub const FOURCC_XRGB8888: u32 = 0x3432_5258;
/// `DRM_FORMAT_ARGB8888`
pub const FOURCC_ARGB8888: u32 = 0x3432_5241;
/// `DRM_FORMAT_NV12`
pub const FOURCC_NV12: u32 = 0x3231_564e;

pub const CARD_PATH: &str = "/dev/dri/card0";

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kmscast_core=trace")
        .with_test_writer()
        .try_init();
}

/// A descriptor backed by one end of a socket pair
///
/// The peer stays with the test and tells whether the descriptor was closed.
pub fn fd_pair() -> (OwnedFd, UnixStream) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    theirs.set_nonblocking(true).unwrap();
    (OwnedFd::from(ours), theirs)
}

/// Whether the descriptor paired with `peer` is still open
pub fn is_open(peer: &UnixStream) -> bool {
    let mut buf = [0u8; 1];
    match (&*peer).read(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => e.kind() == ErrorKind::WouldBlock,
    }
}

pub fn count_open(peers: &[UnixStream]) -> usize {
    peers.iter().filter(|peer| is_open(peer)).count()
}

pub fn amd_params(display: &str) -> KmsCaptureParams {
    KmsCaptureParams::new(
        display,
        GpuInfo {
            vendor: GpuVendor::Amd,
            version: 0,
        },
    )
}

/// PQ static metadata as a typical HDR monitor reports it
pub fn pq_metadata() -> HdrOutputMetadata {
    HdrOutputMetadata::type1(HdrMetadataInfoframe {
        eotf: HDMI_EOTF_SMPTE_ST2084,
        metadata_type: HDMI_STATIC_METADATA_TYPE1,
        display_primaries: [
            Chromaticity { x: 35400, y: 14600 },
            Chromaticity { x: 8500, y: 39850 },
            Chromaticity { x: 6550, y: 2300 },
        ],
        white_point: Chromaticity { x: 15635, y: 16450 },
        max_display_mastering_luminance: 1000,
        min_display_mastering_luminance: 50,
        max_cll: 1000,
        max_fall: 400,
    })
}

// ---------------------------------------------------------------------------
// Render context
// ---------------------------------------------------------------------------

/// One draw issued through the conversion stage
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub texture: Texture,
    pub dest_pos: Vec2i,
    pub dest_size: Vec2i,
    pub texture_pos: Vec2i,
    pub texture_size: Vec2i,
    pub rotation: f32,
    pub external: bool,
}

#[derive(Debug, Default)]
pub struct RenderLog {
    pub next_id: u32,
    pub next_image: usize,
    pub created: Vec<(Texture, TextureStorage)>,
    pub deleted: Vec<Texture>,
    pub images: Vec<Vec<isize>>,
    pub live_images: usize,
    pub binds: Vec<Texture>,
    pub draws: Vec<DrawRecord>,
    pub clears: usize,
    pub swaps: usize,
    pub swap_interval: Option<i32>,
    pub conversions: Vec<ColorConversionParams>,
    pub fail_create_image: bool,
    pub fail_bind: bool,
}

impl RenderLog {
    /// Textures created and not deleted yet
    pub fn live_textures(&self) -> usize {
        self.created.len() - self.deleted.len()
    }
}

pub struct FakeRenderer {
    pub log: Arc<Mutex<RenderLog>>,
    pub card: Option<PathBuf>,
    pub context: bool,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(RenderLog::default())),
            card: Some(PathBuf::from(CARD_PATH)),
            context: true,
        }
    }
}

impl Renderer for FakeRenderer {
    fn has_context(&self) -> bool {
        self.context
    }

    fn card_path(&self) -> Option<PathBuf> {
        self.card.clone()
    }

    fn set_swap_interval(&self, interval: i32) {
        self.log.lock().swap_interval = Some(interval);
    }

    fn create_texture(
        &self,
        target: TextureTarget,
        storage: TextureStorage,
    ) -> std::result::Result<Texture, GpuStatus> {
        let mut log = self.log.lock();
        log.next_id += 1;
        let texture = Texture {
            id: log.next_id,
            target,
        };
        log.created.push((texture, storage));
        Ok(texture)
    }

    fn delete_texture(&self, texture: Texture) {
        self.log.lock().deleted.push(texture);
    }

    fn create_image(&self, attributes: &[isize]) -> std::result::Result<EglImage, GpuStatus> {
        let mut log = self.log.lock();
        log.images.push(attributes.to_vec());
        if log.fail_create_image {
            return Err(GpuStatus::with_message(0x3003, "EGL_BAD_ALLOC"));
        }
        log.next_image += 1;
        log.live_images += 1;
        Ok(EglImage(log.next_image))
    }

    fn destroy_image(&self, _image: EglImage) {
        self.log.lock().live_images -= 1;
    }

    fn bind_image(&self, texture: Texture, _image: &EglImage) -> std::result::Result<(), GpuStatus> {
        let mut log = self.log.lock();
        if log.fail_bind {
            return Err(GpuStatus::code(0x0502));
        }
        log.binds.push(texture);
        Ok(())
    }

    fn clear(&self, _color: [f32; 4]) {
        self.log.lock().clears += 1;
    }

    fn swap_buffers(&self) {
        self.log.lock().swaps += 1;
    }

    fn create_color_conversion(
        &self,
        params: &ColorConversionParams,
    ) -> std::result::Result<Box<dyn ColorConversion>, GpuStatus> {
        self.log.lock().conversions.push(params.clone());
        Ok(Box::new(FakeConversion {
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeConversion {
    log: Arc<Mutex<RenderLog>>,
}

impl ColorConversion for FakeConversion {
    fn draw(
        &mut self,
        texture: Texture,
        dest_pos: Vec2i,
        dest_size: Vec2i,
        texture_pos: Vec2i,
        texture_size: Vec2i,
        rotation: f32,
        external: bool,
    ) {
        self.log.lock().draws.push(DrawRecord {
            texture,
            dest_pos,
            dest_size,
            texture_pos,
            texture_size,
            rotation,
            external,
        });
    }
}

// ---------------------------------------------------------------------------
// Display server
// ---------------------------------------------------------------------------

pub struct FakeOutputs {
    pub outputs: Vec<OutputInfo>,
    pub rotation: Rotation,
}

impl FakeOutputs {
    /// One output at the origin
    pub fn single(name: &str, connector_id: u32, size: Vec2i) -> Self {
        Self {
            outputs: vec![output(name, connector_id, Vec2i::new(0, 0), size)],
            rotation: Rotation::Deg0,
        }
    }
}

pub fn output(name: &str, connector_id: u32, position: Vec2i, size: Vec2i) -> OutputInfo {
    OutputInfo {
        name: name.to_string(),
        connector_id,
        position,
        size,
    }
}

impl OutputSource for FakeOutputs {
    fn active_outputs(&self) -> Vec<OutputInfo> {
        self.outputs.clone()
    }

    fn output_by_name(&self, name: &str) -> Option<OutputInfo> {
        self.outputs.iter().find(|o| o.name == name).cloned()
    }

    fn rotation(&self, _output: &OutputInfo) -> Rotation {
        self.rotation
    }
}

// ---------------------------------------------------------------------------
// Plane helper
// ---------------------------------------------------------------------------

/// Plane without a descriptor; one is attached for every response
#[derive(Debug, Clone)]
pub struct PlaneSpec {
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub modifier: u64,
    pub connector_id: u32,
    pub is_cursor: bool,
    pub is_combined_plane: bool,
    pub x: i32,
    pub y: i32,
    pub hdr_metadata: Option<HdrOutputMetadata>,
}

impl PlaneSpec {
    pub fn primary(connector_id: u32, width: u32, height: u32) -> Self {
        Self {
            pixel_format: FOURCC_XRGB8888,
            width,
            height,
            pitch: width * 4,
            modifier: 0x0200_0000_0000_0001,
            connector_id,
            is_cursor: false,
            is_combined_plane: false,
            x: 0,
            y: 0,
            hdr_metadata: None,
        }
    }

    pub fn cursor(connector_id: u32, x: i32, y: i32) -> Self {
        Self {
            pixel_format: FOURCC_ARGB8888,
            width: 64,
            height: 64,
            pitch: 256,
            modifier: 0x0200_0000_0000_0002,
            connector_id,
            is_cursor: true,
            is_combined_plane: false,
            x,
            y,
            hdr_metadata: None,
        }
    }

    pub fn combined(mut self) -> Self {
        self.is_combined_plane = true;
        self
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_hdr(mut self, metadata: HdrOutputMetadata) -> Self {
        self.hdr_metadata = Some(metadata);
        self
    }

    fn descriptor(&self, fd: OwnedFd) -> PlaneDescriptor {
        PlaneDescriptor {
            fd: Some(fd),
            pixel_format: self.pixel_format,
            width: self.width,
            height: self.height,
            offset: 0,
            pitch: self.pitch,
            modifier: self.modifier,
            connector_id: self.connector_id,
            is_cursor: self.is_cursor,
            is_combined_plane: self.is_combined_plane,
            x: self.x,
            y: self.y,
            hdr_metadata: self.hdr_metadata,
        }
    }
}

/// One scripted reply of the plane helper
#[derive(Debug, Clone)]
pub enum Reply {
    Planes(Vec<PlaneSpec>),
    Failed(i32, String),
    ChannelError,
}

#[derive(Debug, Default)]
pub struct PlaneSourceLog {
    pub opened: Option<PathBuf>,
    pub is_open: bool,
    pub closes: usize,
    pub requests: usize,
    pub fail_open: bool,
    /// Replies used before falling back to `default_planes`
    pub script: VecDeque<Reply>,
    pub default_planes: Vec<PlaneSpec>,
    /// Peers of every descriptor handed out
    pub peers: Vec<UnixStream>,
}

impl PlaneSourceLog {
    pub fn open_descriptors(&self) -> usize {
        count_open(&self.peers)
    }
}

pub struct FakePlaneSource {
    pub log: Arc<Mutex<PlaneSourceLog>>,
}

impl FakePlaneSource {
    pub fn new(default_planes: Vec<PlaneSpec>) -> Self {
        let log = PlaneSourceLog {
            default_planes,
            ..Default::default()
        };
        Self {
            log: Arc::new(Mutex::new(log)),
        }
    }
}

impl PlaneSource for FakePlaneSource {
    fn open(&mut self, card_path: &Path) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_open {
            return Err(CaptureError::plane_source("helper failed to start"));
        }
        log.opened = Some(card_path.to_path_buf());
        log.is_open = true;
        Ok(())
    }

    fn request(&mut self) -> Result<PlaneResponse> {
        let mut log = self.log.lock();
        if !log.is_open {
            return Err(CaptureError::plane_source("channel not open"));
        }
        log.requests += 1;

        let reply = log
            .script
            .pop_front()
            .unwrap_or_else(|| Reply::Planes(log.default_planes.clone()));
        match reply {
            Reply::Planes(specs) => {
                let planes = specs
                    .iter()
                    .map(|spec| {
                        let (fd, peer) = fd_pair();
                        log.peers.push(peer);
                        spec.descriptor(fd)
                    })
                    .collect();
                Ok(PlaneResponse::ok(planes))
            }
            Reply::Failed(code, message) => Ok(PlaneResponse::failed(code, message)),
            Reply::ChannelError => Err(CaptureError::Io(std::io::Error::from(
                ErrorKind::BrokenPipe,
            ))),
        }
    }

    fn close(&mut self) {
        let mut log = self.log.lock();
        log.is_open = false;
        log.closes += 1;
    }
}

// ---------------------------------------------------------------------------
// GPU interop
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InteropLog {
    pub hw_context: Option<(PathBuf, bool, Vec2i)>,
    pub allocations: usize,
    pub imports: usize,
    pub transfers: usize,
    pub releases: usize,
    pub target: Option<Texture>,
    pub fail_create: bool,
    pub fail_import: bool,
    pub fail_transfer: bool,
}

/// Hand-off that renders into a plain texture and never touches FFmpeg's
/// hardware contexts
pub struct FakeInterop {
    pub log: Arc<Mutex<InteropLog>>,
    pub cursor_target: TextureTarget,
    pub primary_modifiers: ModifierPolicy,
}

impl FakeInterop {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(InteropLog::default())),
            cursor_target: TextureTarget::Texture2D,
            primary_modifiers: ModifierPolicy::Omit,
        }
    }
}

impl GpuInterop for FakeInterop {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn cursor_target(&self) -> TextureTarget {
        self.cursor_target
    }

    fn primary_modifiers(&self) -> ModifierPolicy {
        self.primary_modifiers
    }

    fn create_hw_context(
        &mut self,
        card_path: &Path,
        hdr: bool,
        settings: &mut EncoderSettings,
    ) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_create {
            return Err(CaptureError::hw_context("Failed to create device"));
        }
        log.hw_context = Some((
            card_path.to_path_buf(),
            hdr,
            Vec2i::new(settings.width, settings.height),
        ));
        Ok(())
    }

    fn allocate_frame(&mut self, settings: &EncoderSettings, frame: &mut Video) -> Result<()> {
        self.log.lock().allocations += 1;
        *frame = Video::empty();
        describe_frame(settings, frame);
        Ok(())
    }

    fn import_target(
        &mut self,
        renderer: &dyn Renderer,
        _frame: &Video,
        size: Vec2i,
    ) -> Result<InteropTarget> {
        let mut log = self.log.lock();
        log.imports += 1;
        if log.fail_import {
            return Err(CaptureError::UnsupportedFormat(FOURCC_XRGB8888));
        }
        let texture = renderer
            .create_texture(
                TextureTarget::Texture2D,
                TextureStorage::Rgb {
                    width: size.x,
                    height: size.y,
                },
            )
            .map_err(|status| CaptureError::gpu("glTexImage2D", status))?;
        log.target = Some(texture);
        Ok(InteropTarget {
            texture: ImportedTexture::Single(texture),
            destination_color: DestinationColor::Bgr,
        })
    }

    fn transfer_to_encoder_buffer(&mut self, _frame: &mut Video) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_transfer {
            return Err(CaptureError::Cuda {
                operation: "cuMemcpy2D",
                code: 700,
                message: "an illegal memory access was encountered".into(),
            });
        }
        log.transfers += 1;
        Ok(())
    }

    fn release(&mut self, renderer: &dyn Renderer) {
        let mut log = self.log.lock();
        log.releases += 1;
        if let Some(texture) = log.target.take() {
            if renderer.has_context() {
                renderer.delete_texture(texture);
            }
        }
    }
}

/// Encoder settings as the encoder hands them to `start`
pub fn settings() -> EncoderSettings {
    EncoderSettings::new(Pixel::VAAPI)
}

/// Everything a backend test needs, with handles to every fake's log
pub struct Harness {
    pub renderer: Arc<Mutex<RenderLog>>,
    pub planes: Arc<Mutex<PlaneSourceLog>>,
    pub interop: Arc<Mutex<InteropLog>>,
}

impl Harness {
    /// Build the fakes; returns the handles plus the pieces for the backend
    pub fn new(
        outputs: FakeOutputs,
        default_planes: Vec<PlaneSpec>,
    ) -> (Self, CaptureContext, FakeInterop) {
        let renderer = FakeRenderer::new();
        let planes = FakePlaneSource::new(default_planes);
        let interop = FakeInterop::new();
        let harness = Self {
            renderer: Arc::clone(&renderer.log),
            planes: Arc::clone(&planes.log),
            interop: Arc::clone(&interop.log),
        };
        let context = CaptureContext {
            renderer: Arc::new(renderer),
            outputs: Box::new(outputs),
            planes: Box::new(planes),
        };
        (harness, context, interop)
    }
}

// ---------------------------------------------------------------------------
// VA-API
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct VaLog {
    pub exports: Vec<(VaSurfaceId, u32, u32)>,
    pub syncs: usize,
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub export_error: Option<i32>,
    pub sync_error: Option<i32>,
    pub peers: Vec<UnixStream>,
}

pub struct FakeVaApi {
    pub log: Arc<Mutex<VaLog>>,
}

impl FakeVaApi {
    pub fn new(fourcc: u32, width: u32, height: u32) -> Self {
        let log = VaLog {
            fourcc,
            width,
            height,
            ..Default::default()
        };
        Self {
            log: Arc::new(Mutex::new(log)),
        }
    }
}

impl VaApi for FakeVaApi {
    fn export_surface_handle(
        &self,
        _display: VaDisplay,
        surface: VaSurfaceId,
        mem_type: u32,
        flags: u32,
    ) -> std::result::Result<PrimeSurface, i32> {
        let mut log = self.log.lock();
        log.exports.push((surface, mem_type, flags));
        if let Some(code) = log.export_error {
            return Err(code);
        }

        let (fd, peer) = fd_pair();
        log.peers.push(peer);
        let width = log.width;
        let chroma_offset = width * log.height;
        Ok(PrimeSurface {
            fourcc: log.fourcc,
            width,
            height: log.height,
            objects: vec![PrimeObject {
                fd,
                size: chroma_offset * 3 / 2,
                drm_format_modifier: 0,
            }],
            layers: vec![
                PrimeLayer {
                    num_planes: 1,
                    pitch: [width, 0, 0, 0],
                    ..Default::default()
                },
                PrimeLayer {
                    num_planes: 1,
                    offset: [chroma_offset, 0, 0, 0],
                    pitch: [width, 0, 0, 0],
                    ..Default::default()
                },
            ],
        })
    }

    fn sync_surface(&self, _display: VaDisplay, _surface: VaSurfaceId) -> std::result::Result<(), i32> {
        let mut log = self.log.lock();
        log.syncs += 1;
        match log.sync_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// CUDA
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CudaLog {
    pub calls: Vec<&'static str>,
    /// Context push depth; back to zero after every operation
    pub depth: i32,
    pub max_depth: i32,
    pub registered: Vec<(u32, u32, u32)>,
    pub copies: Vec<(usize, usize, usize, usize)>,
    /// Operation that fails with `CUDA_ERROR_INVALID_VALUE`
    pub fail_on: Option<&'static str>,
}

pub struct FakeCudaApi {
    pub log: Arc<Mutex<CudaLog>>,
}

impl FakeCudaApi {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(CudaLog::default())),
        }
    }

    fn call(&self, name: &'static str) -> std::result::Result<(), CUresult> {
        let mut log = self.log.lock();
        log.calls.push(name);
        if log.fail_on == Some(name) { Err(1) } else { Ok(()) }
    }
}

const RESOURCE: usize = 0x5000;
const ARRAY: usize = 0x6000;

impl CudaApi for FakeCudaApi {
    fn context(&self) -> CUcontext {
        0x1000usize as CUcontext
    }

    fn ctx_push_current(&self, _ctx: CUcontext) -> std::result::Result<(), CUresult> {
        self.call("cuCtxPushCurrent")?;
        let mut log = self.log.lock();
        log.depth += 1;
        log.max_depth = log.max_depth.max(log.depth);
        Ok(())
    }

    fn ctx_pop_current(&self) -> std::result::Result<(), CUresult> {
        self.call("cuCtxPopCurrent")?;
        self.log.lock().depth -= 1;
        Ok(())
    }

    fn graphics_gl_register_image(
        &self,
        image: u32,
        target: u32,
        flags: u32,
    ) -> std::result::Result<CUgraphicsResource, CUresult> {
        self.call("cuGraphicsGLRegisterImage")?;
        self.log.lock().registered.push((image, target, flags));
        Ok(RESOURCE as CUgraphicsResource)
    }

    fn graphics_resource_set_map_flags(
        &self,
        _resource: CUgraphicsResource,
        _flags: u32,
    ) -> std::result::Result<(), CUresult> {
        self.call("cuGraphicsResourceSetMapFlags")
    }

    fn graphics_map_resources(&self, _resource: CUgraphicsResource) -> std::result::Result<(), CUresult> {
        self.call("cuGraphicsMapResources")
    }

    fn graphics_sub_resource_get_mapped_array(
        &self,
        _resource: CUgraphicsResource,
    ) -> std::result::Result<CUarray, CUresult> {
        self.call("cuGraphicsSubResourceGetMappedArray")?;
        Ok(ARRAY as CUarray)
    }

    fn graphics_unmap_resources(&self, _resource: CUgraphicsResource) -> std::result::Result<(), CUresult> {
        self.call("cuGraphicsUnmapResources")
    }

    fn graphics_unregister_resource(&self, _resource: CUgraphicsResource) -> std::result::Result<(), CUresult> {
        self.call("cuGraphicsUnregisterResource")
    }

    fn memcpy_2d(&self, copy: &CUDA_MEMCPY2D) -> std::result::Result<(), CUresult> {
        self.call("cuMemcpy2D")?;
        self.log
            .lock()
            .copies
            .push((copy.srcPitch, copy.dstPitch, copy.WidthInBytes, copy.Height));
        Ok(())
    }

    fn error_string(&self, code: CUresult) -> String {
        format!("CUDA error {}", code)
    }
}
