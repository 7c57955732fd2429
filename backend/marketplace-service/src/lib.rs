pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{ErrorCode, PipelineError, Result, ServiceError};
pub use services::{
    build_pipeline, GenerationOptions, GenerationResult, GroupingService, Pipeline,
};
