//! Error types for kmscast

use thiserror::Error;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Status reported by a GPU API call (EGL/GL error code plus optional driver text)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuStatus {
    /// Numeric status code as returned by the API
    pub code: i64,
    /// Driver-provided description, when available
    pub message: Option<String>,
}

impl GpuStatus {
    /// Status with only a numeric code
    pub fn code(code: i64) -> Self {
        Self { code, message: None }
    }

    /// Status with a code and a driver message
    pub fn with_message(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl std::fmt::Display for GpuStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Main error type for capture operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Plane source channel failed (init, transport or non-zero result code)
    #[error("Plane source error: {0}")]
    PlaneSource(String),

    /// Requested monitor does not exist
    #[error("Monitor not found: \"{0}\"")]
    MonitorNotFound(String),

    /// The plane source returned an empty plane set
    #[error("No DRM planes found, capture will fail")]
    NoPlanes,

    /// No plane in the set can serve as the primary capture plane
    #[error("No primary plane found for the captured monitor")]
    NoPrimaryPlane,

    /// EGL/GL operation failed
    #[error("GPU error: {operation} failed, error: {status}")]
    Gpu {
        /// Name of the failing operation
        operation: &'static str,
        /// Status returned by the driver
        status: GpuStatus,
    },

    /// CUDA driver API call failed
    #[error("CUDA error: {operation} failed, error: {code} ({message})")]
    Cuda {
        /// Name of the failing operation
        operation: &'static str,
        /// CUresult code
        code: i32,
        /// String from cuGetErrorString
        message: String,
    },

    /// VA-API call failed
    #[error("VA-API error: {operation} failed, error: {code}")]
    Vaapi {
        /// Name of the failing operation
        operation: &'static str,
        /// VAStatus code
        code: i32,
    },

    /// Pixel format we cannot render into
    #[error("Unsupported pixel format: 0x{0:08x}")]
    UnsupportedFormat(u32),

    /// Hardware device/frames context error
    #[error("Hardware context error: {0}")]
    HwContext(String),

    /// FFmpeg error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation requires a started backend
    #[error("Capture backend not started")]
    NotStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Create a plane source error
    pub fn plane_source(msg: impl Into<String>) -> Self {
        Self::PlaneSource(msg.into())
    }

    /// Create a GPU error
    pub fn gpu(operation: &'static str, status: GpuStatus) -> Self {
        Self::Gpu { operation, status }
    }

    /// Create a hardware context error
    pub fn hw_context(msg: impl Into<String>) -> Self {
        Self::HwContext(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error only costs the current frame
    ///
    /// Recoverable errors skip the frame and the capture loop continues.
    /// Everything else means the pipeline has to be stopped.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::PlaneSource(_) | Self::NoPlanes | Self::NoPrimaryPlane => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Negative status code for callers that speak the C-style contract
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            Self::WithContext { source, .. } => source.status_code(),
            _ => -1,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<ffmpeg_next::Error> for CaptureError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}

impl From<toml::de::Error> for CaptureError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config: {}", err))
    }
}
