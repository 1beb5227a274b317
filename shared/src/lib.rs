#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod event;
pub mod image_processing;
pub mod model;
pub mod patch;
pub mod resolver;
pub mod transport;
pub mod upload;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::{App, Model, ViewModel};
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::Event;

pub const SNAPSHOT_KEY: &str = "site_tracker_snapshot_v1";
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 8192;
pub const MAX_IMAGE_ALLOC: u64 = 256 * 1024 * 1024;
pub const MAX_UPLOAD_DIMENSION: u32 = 1280;
pub const UPLOAD_JPEG_QUALITY: u8 = 60;

pub const UPLOAD_TIMEOUT_MS: u64 = 45_000;
pub const PERSIST_TIMEOUT_MS: u64 = 30_000;
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

pub const MAX_UPLOAD_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 800;
pub const BACKOFF_MULTIPLIER: f64 = 1.5;
pub const MAX_BACKOFF_MS: u64 = 60_000;
pub const JITTER_MAX_MS: u64 = 250;

pub const MEDIA_CACHE_CAPACITY: usize = 32;
pub const MIN_BARE_FILE_ID_LEN: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Rejected,
    Validation,
    NotFound,
    Storage,
    Serialization,
    Deserialization,
    ImageProcessing,
    ImageTooLarge,
    ImageFormatUnsupported,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Rejected => "REJECTED",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::ImageProcessing => "IMAGE_PROCESSING_ERROR",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::ImageFormatUnsupported => "IMAGE_FORMAT_UNSUPPORTED",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Rejected
            | Self::Validation
            | Self::NotFound
            | Self::ImageProcessing
            | Self::ImageTooLarge
            | Self::ImageFormatUnsupported
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::RateLimited => {
                "Too many requests. Please wait a moment and try again.".into()
            }
            ErrorKind::Rejected | ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Storage => "Unable to save data locally.".into(),
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "A data error occurred. Please contact support if this persists.".into()
            }
            ErrorKind::ImageProcessing => {
                "Unable to process the image. Please try a different photo.".into()
            }
            ErrorKind::ImageTooLarge => format!(
                "The file is too large. Please use a file smaller than {} MB.",
                MAX_IMAGE_BYTES / 1_000_000
            ),
            ErrorKind::ImageFormatUnsupported => {
                "This image format is not supported. Please use JPEG, PNG, or WebP.".into()
            }
            ErrorKind::InvalidState | ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<model::ValidationError> for AppError {
    fn from(e: model::ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<patch::PatchError> for AppError {
    fn from(e: patch::PatchError) -> Self {
        AppError::new(ErrorKind::InvalidState, e.to_string())
    }
}

impl From<image_processing::ImageError> for AppError {
    fn from(e: image_processing::ImageError) -> Self {
        let kind = match &e {
            image_processing::ImageError::TooLarge { .. } => ErrorKind::ImageTooLarge,
            image_processing::ImageError::UnsupportedFormat => ErrorKind::ImageFormatUnsupported,
            image_processing::ImageError::DecodeFailed(_)
            | image_processing::ImageError::EncodeFailed(_) => ErrorKind::ImageProcessing,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<transport::TransportError> for AppError {
    fn from(e: transport::TransportError) -> Self {
        let kind = match &e.cause {
            transport::ScriptError::Network { .. } => ErrorKind::Network,
            transport::ScriptError::Timeout { .. } => ErrorKind::Timeout,
            transport::ScriptError::Status { status, .. } if *status == 429 => {
                ErrorKind::RateLimited
            }
            transport::ScriptError::Status { .. } => ErrorKind::Network,
            transport::ScriptError::Rejected { .. } => ErrorKind::Rejected,
            transport::ScriptError::InvalidResponse { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string()).with_context("attempts", e.attempts.to_string())
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    #[must_use]
    pub fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub created_at_ms: u64,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            created_at_ms: get_current_time_ms(),
            duration_ms: kind.default_duration_ms(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.duration_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    #[must_use]
    pub const fn default_duration_ms(self) -> u64 {
        match self {
            Self::Info => 3000,
            Self::Success => 2000,
            Self::Warning => 4000,
            Self::Error => 5000,
        }
    }
}
