pub mod artifact;
pub mod calibration;
pub mod config;
pub mod elo;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod historical_dataset;
pub mod leakage;
pub mod learners;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod sample;
pub mod split;
pub mod table_io;
pub mod tree;

pub use error::{PipelineError, PipelineResult, PipelineWarning};
pub use pipeline::{TrainConfig, train, train_targets};
pub use predict::predict;
