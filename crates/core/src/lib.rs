pub mod config;
pub mod error;
pub mod headers;
pub mod model;

pub use config::{
    BodySource, CaptureConfig, CaptureSelector, KeySource, ReplayConfig, RetryConfig, ServerConfig,
};
pub use error::{Error, Result};
pub use model::{CaptureRecord, CaptureSummary, ReplayResult};
