//! HDR static metadata bridge
//!
//! Copies the connector's HDR infoframe into the encoder frame as
//! mastering-display and content-light side data.

use ffmpeg_next::ffi::{
    av_content_light_metadata_create_side_data, av_frame_get_side_data,
    av_mastering_display_metadata_create_side_data, AVContentLightMetadata, AVFrameSideDataType,
    AVMasteringDisplayMetadata,
};
use ffmpeg_next::frame::Video;
use ffmpeg_next::Rational;
use tracing::trace;

use crate::capture::plane::{HdrMetadataInfoframe, HdrOutputMetadata, PlaneDescriptor};
use crate::error::{CaptureError, Result};

/// Chromaticity units per 1.0
pub const CHROMATICITY_DEN: i32 = 50000;
/// Min mastering luminance units per cd/m²
pub const MIN_LUMINANCE_DEN: i32 = 10000;
/// Max mastering luminance is in whole cd/m²
pub const MAX_LUMINANCE_DEN: i32 = 1;

/// Mastering display color volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasteringDisplay {
    /// R, G, B as (x, y)
    pub display_primaries: [[Rational; 2]; 3],
    pub white_point: [Rational; 2],
    pub min_luminance: Rational,
    pub max_luminance: Rational,
    pub has_primaries: bool,
    pub has_luminance: bool,
}

impl From<&HdrMetadataInfoframe> for MasteringDisplay {
    fn from(info: &HdrMetadataInfoframe) -> Self {
        let chroma = |v: u16| Rational::new(v as i32, CHROMATICITY_DEN);
        let display_primaries = info
            .display_primaries
            .map(|primary| [chroma(primary.x), chroma(primary.y)]);
        let max_luminance = Rational::new(
            info.max_display_mastering_luminance as i32,
            MAX_LUMINANCE_DEN,
        );

        Self {
            display_primaries,
            white_point: [chroma(info.white_point.x), chroma(info.white_point.y)],
            min_luminance: Rational::new(
                info.min_display_mastering_luminance as i32,
                MIN_LUMINANCE_DEN,
            ),
            max_luminance,
            has_primaries: display_primaries[0][0].numerator() > 0,
            has_luminance: max_luminance.numerator() > 0,
        }
    }
}

/// Content light levels in cd/m²
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentLight {
    pub max_cll: u32,
    pub max_fall: u32,
}

impl From<&HdrMetadataInfoframe> for ContentLight {
    fn from(info: &HdrMetadataInfoframe) -> Self {
        Self {
            max_cll: info.max_cll as u32,
            max_fall: info.max_fall as u32,
        }
    }
}

/// Metadata to attach for `plane`, if any
///
/// Requires that the plane declares metadata, HDR output was requested and
/// the metadata is static type 1 with PQ. Anything else is skipped silently.
pub fn should_attach(plane: &PlaneDescriptor, hdr_requested: bool) -> Option<&HdrOutputMetadata> {
    if !hdr_requested {
        return None;
    }
    plane
        .hdr_metadata
        .as_ref()
        .filter(|metadata| metadata.is_supported())
}

/// Write `metadata` into the frame's side data
///
/// Existing side data on the frame is reused, so calling this for every
/// capture never adds duplicate entries.
pub fn attach_to_frame(frame: &mut Video, metadata: &HdrOutputMetadata) -> Result<()> {
    let info = &metadata.hdmi_metadata_type1;
    let mastering = MasteringDisplay::from(info);
    let light = ContentLight::from(info);

    // SAFETY: the frame pointer is valid for the lifetime of `frame`. Side data
    // returned by ffmpeg is owned by the frame and sized for the struct type
    // matching its side data kind.
    unsafe {
        let ptr = frame.as_mut_ptr();

        let mut display = existing_side_data::<AVMasteringDisplayMetadata>(
            ptr,
            AVFrameSideDataType::AV_FRAME_DATA_MASTERING_DISPLAY_METADATA,
        );
        if display.is_null() {
            display = av_mastering_display_metadata_create_side_data(ptr);
        }
        if display.is_null() {
            return Err(CaptureError::encoder("Failed to allocate mastering display side data"));
        }

        let mut content = existing_side_data::<AVContentLightMetadata>(
            ptr,
            AVFrameSideDataType::AV_FRAME_DATA_CONTENT_LIGHT_LEVEL,
        );
        if content.is_null() {
            content = av_content_light_metadata_create_side_data(ptr);
        }
        if content.is_null() {
            return Err(CaptureError::encoder("Failed to allocate content light side data"));
        }

        let display = &mut *display;
        for (dst, src) in display
            .display_primaries
            .iter_mut()
            .zip(mastering.display_primaries)
        {
            *dst = [src[0].into(), src[1].into()];
        }
        display.white_point = [mastering.white_point[0].into(), mastering.white_point[1].into()];
        display.min_luminance = mastering.min_luminance.into();
        display.max_luminance = mastering.max_luminance.into();
        display.has_primaries = mastering.has_primaries as _;
        display.has_luminance = mastering.has_luminance as _;

        let content = &mut *content;
        content.MaxCLL = light.max_cll as _;
        content.MaxFALL = light.max_fall as _;
    }

    trace!(
        "Attached HDR metadata: max luminance {}, MaxCLL {}, MaxFALL {}",
        mastering.max_luminance,
        light.max_cll,
        light.max_fall
    );
    Ok(())
}

/// Read back the HDR side data of a frame
pub fn read_from_frame(frame: &Video) -> (Option<MasteringDisplay>, Option<ContentLight>) {
    // SAFETY: side data pointers come from the frame and are only read while
    // `frame` is borrowed.
    unsafe {
        let ptr = frame.as_ptr() as *mut _;

        let display = existing_side_data::<AVMasteringDisplayMetadata>(
            ptr,
            AVFrameSideDataType::AV_FRAME_DATA_MASTERING_DISPLAY_METADATA,
        )
        .as_ref()
        .map(|d| MasteringDisplay {
            display_primaries: d.display_primaries.map(|p| [p[0].into(), p[1].into()]),
            white_point: [d.white_point[0].into(), d.white_point[1].into()],
            min_luminance: d.min_luminance.into(),
            max_luminance: d.max_luminance.into(),
            has_primaries: d.has_primaries != 0,
            has_luminance: d.has_luminance != 0,
        });

        let content = existing_side_data::<AVContentLightMetadata>(
            ptr,
            AVFrameSideDataType::AV_FRAME_DATA_CONTENT_LIGHT_LEVEL,
        )
        .as_ref()
        .map(|c| ContentLight {
            max_cll: c.MaxCLL as u32,
            max_fall: c.MaxFALL as u32,
        });

        (display, content)
    }
}

/// Payload of the frame's side data of `kind`, or null
unsafe fn existing_side_data<T>(
    frame: *mut ffmpeg_next::ffi::AVFrame,
    kind: AVFrameSideDataType,
) -> *mut T {
    // SAFETY: caller guarantees `frame` is a valid AVFrame.
    let side_data = unsafe { av_frame_get_side_data(frame, kind) };
    if side_data.is_null() {
        std::ptr::null_mut()
    } else {
        // SAFETY: non-null side data always carries a data pointer.
        unsafe { (*side_data).data as *mut T }
    }
}
