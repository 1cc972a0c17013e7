//! DRM plane descriptors and the plane source channel
//!
//! A privileged helper enumerates the KMS planes on every request and hands
//! back one DMA-BUF file descriptor per plane. Those descriptors are owned by
//! the receiver for exactly one frame: dropping a [`PlaneResponse`] closes all
//! of them, used or not.

use bytemuck::{Pod, Zeroable};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use crate::error::Result;

/// `HDMI_STATIC_METADATA_TYPE1` from the kernel uapi
pub const HDMI_STATIC_METADATA_TYPE1: u8 = 0;

/// `HDMI_EOTF_SMPTE_ST2084` (PQ) from the kernel uapi
pub const HDMI_EOTF_SMPTE_ST2084: u8 = 2;

/// Chromaticity coordinate in units of 0.00002
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Chromaticity {
    pub x: u16,
    pub y: u16,
}

/// `struct hdr_metadata_infoframe`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HdrMetadataInfoframe {
    pub eotf: u8,
    pub metadata_type: u8,
    pub display_primaries: [Chromaticity; 3],
    pub white_point: Chromaticity,
    /// cd/m²
    pub max_display_mastering_luminance: u16,
    /// Units of 0.0001 cd/m²
    pub min_display_mastering_luminance: u16,
    pub max_cll: u16,
    pub max_fall: u16,
}

/// `struct hdr_output_metadata` as attached to a connector's HDR blob
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HdrOutputMetadata {
    pub metadata_type: u32,
    pub hdmi_metadata_type1: HdrMetadataInfoframe,
    _tail: u16,
}

impl HdrOutputMetadata {
    /// Build static type 1 metadata
    pub fn type1(infoframe: HdrMetadataInfoframe) -> Self {
        Self {
            metadata_type: HDMI_STATIC_METADATA_TYPE1 as u32,
            hdmi_metadata_type1: infoframe,
            _tail: 0,
        }
    }

    /// Parse the raw property blob
    ///
    /// Blobs shorter than the kernel struct (without tail padding) are rejected.
    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        const BLOB_LEN: usize = std::mem::size_of::<HdrOutputMetadata>() - 2;
        if blob.len() < BLOB_LEN {
            return None;
        }
        let mut bytes = [0u8; std::mem::size_of::<HdrOutputMetadata>()];
        bytes[..BLOB_LEN].copy_from_slice(&blob[..BLOB_LEN]);
        Some(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Static metadata type 1 with the PQ transfer function
    pub fn is_supported(&self) -> bool {
        self.metadata_type == HDMI_STATIC_METADATA_TYPE1 as u32
            && self.hdmi_metadata_type1.metadata_type == HDMI_STATIC_METADATA_TYPE1
            && self.hdmi_metadata_type1.eotf == HDMI_EOTF_SMPTE_ST2084
    }
}

/// One plane of the current KMS state
#[derive(Debug)]
pub struct PlaneDescriptor {
    /// DMA-BUF backing the plane, closed when the descriptor is dropped
    pub fd: Option<OwnedFd>,
    /// DRM fourcc
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub offset: u32,
    pub pitch: u32,
    pub modifier: u64,
    pub connector_id: u32,
    pub is_cursor: bool,
    pub is_combined_plane: bool,
    /// Plane position on its CRTC
    pub x: i32,
    pub y: i32,
    pub hdr_metadata: Option<HdrOutputMetadata>,
}

impl PlaneDescriptor {
    /// Raw descriptor for import; -1 if the plane came without one
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_ref().map(|fd| fd.as_raw_fd()).unwrap_or(-1)
    }

    /// Whether the plane declares HDR metadata
    pub fn has_hdr_metadata(&self) -> bool {
        self.hdr_metadata.is_some()
    }

    /// Pixel area used by the largest-plane fallback
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// Response to one plane request; lives for exactly one frame
#[derive(Debug, Default)]
pub struct PlaneResponse {
    /// Zero on success
    pub result: i32,
    pub error_message: String,
    pub planes: Vec<PlaneDescriptor>,
}

impl PlaneResponse {
    /// Successful response carrying `planes`
    pub fn ok(planes: Vec<PlaneDescriptor>) -> Self {
        Self {
            result: 0,
            error_message: String::new(),
            planes,
        }
    }

    /// Failed response
    pub fn failed(result: i32, error_message: impl Into<String>) -> Self {
        Self {
            result,
            error_message: error_message.into(),
            planes: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == 0
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Number of descriptors this response owns
    pub fn fd_count(&self) -> usize {
        self.planes.iter().filter(|p| p.fd.is_some()).count()
    }
}

/// Request/response channel to the privileged plane enumerator
///
/// `request` blocks for the whole round-trip. Transport failures are returned
/// as errors; a failed enumeration comes back as a response with a non-zero
/// result code.
pub trait PlaneSource {
    /// Open the channel for the given DRM card
    fn open(&mut self, card_path: &Path) -> Result<()>;

    /// Enumerate the current planes
    fn request(&mut self) -> Result<PlaneResponse>;

    /// Shut the channel down; must tolerate being called when not open
    fn close(&mut self);
}
