//! The seam between this runtime and the user's trainable-model program.

use async_trait::async_trait;

use crate::{
    artifacts::ArtifactProvider,
    data::{ArtifactLoader, DataLoader},
    error::Result,
    tracker::TrainingTracker,
};

/// One named evaluation output. Its segments are concatenated into the
/// reply's trailing payload; their byte sizes travel as metadata so the
/// host can re-split them.
#[derive(Debug)]
pub struct EvalOutput {
    pub name: String,
    pub data: Vec<Vec<u8>>,
}

/// The operations a user model program must expose.
///
/// Implementations may complete synchronously or suspend; either way the
/// runtime awaits them without blocking its read loop. A failure is
/// reported to the host as an `exception` reply, never swallowed.
#[async_trait]
pub trait ModelProgram: Send + Sync {
    /// Produces initial model state from the given inputs.
    async fn create_state(
        &self,
        params: Vec<DataLoader>,
        other_artifacts: Vec<ArtifactLoader>,
    ) -> Result<()>;

    /// Loads an artifact into a live model instance.
    async fn instantiate(
        &self,
        artifact: Vec<ArtifactLoader>,
        other_artifacts: Vec<ArtifactLoader>,
    ) -> Result<Box<dyn ModelInstance>>;
}

/// The handle an instantiation returns.
#[async_trait]
pub trait ModelInstance: Send + Sync {
    /// Runs one training session against the given inputs, reporting
    /// through `tracker` and observing cancellation on it.
    async fn train(&self, params: Vec<DataLoader>, tracker: TrainingTracker) -> Result<()>;

    /// Computes named outputs for the given inputs.
    async fn evaluate(&self, params: Vec<DataLoader>) -> Result<Vec<EvalOutput>>;

    /// Exports this instance's state through `artifacts`.
    async fn get_state(&self, artifacts: ArtifactProvider) -> Result<()>;

    /// Optional teardown hook, runs once when the handle is disposed.
    async fn dispose(&self) {}
}

/// Builds a `ModelProgram` from the location an `initialize` command
/// names. The built program is installed once for the process lifetime
/// and never reloaded.
pub trait ProgramLoader: Send + Sync + 'static {
    fn load(&self, path: &str) -> Result<Box<dyn ModelProgram>>;
}

impl<F> ProgramLoader for F
where
    F: Fn(&str) -> Result<Box<dyn ModelProgram>> + Send + Sync + 'static,
{
    fn load(&self, path: &str) -> Result<Box<dyn ModelProgram>> {
        self(path)
    }
}
