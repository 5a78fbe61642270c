pub mod cancel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod util;

pub use cancel::CancelToken;
pub use error::ProcessError;
pub use pipeline::{AggregatedResult, Pipeline, PipelineSettings, RunHandle};
pub use progress::{ProgressEvent, ProgressObserver, Status};
