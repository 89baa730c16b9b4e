pub mod artifacts;
pub mod config;
pub mod data;
mod dispatcher;
pub mod error;
mod lifecycle;
mod link;
pub mod model;
pub mod tracker;

pub use artifacts::{Artifact, ArtifactProvider};
pub use config::RunnerConfig;
pub use data::{ArtifactLoader, DataLoader};
pub use dispatcher::serve;
pub use error::{Result, RunnerErr};
pub use model::{EvalOutput, ModelInstance, ModelProgram, ProgramLoader};
pub use tracker::{Metric, TrainingTracker};
