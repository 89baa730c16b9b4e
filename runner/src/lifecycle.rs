//! Lifecycle management of instantiated models and training sessions.
//!
//! All in-flight state lives in owned maps inside `ModelRuntime`; there
//! are no ambient globals. The handle map admits a handle whose
//! instantiation callback is still pending, so a concurrent dispose can
//! target it: disposal is then deferred and applied the instant the
//! callback resolves, instead of publishing the instance.

use std::{collections::HashMap, sync::Arc};

use framing::{DatasetParam, EvalOutputMeta};
use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    artifacts::ArtifactProvider,
    data::{ArtifactLoader, DataLoader},
    error::{Result, RunnerErr},
    link::{HostLink, OpScope},
    model::{ModelInstance, ModelProgram},
    tracker::TrainingTracker,
};

enum HandleState {
    Pending { dispose_requested: bool },
    Ready(Arc<dyn ModelInstance>),
}

pub(crate) struct ModelRuntime {
    link: Arc<HostLink>,
    program: Mutex<Option<Arc<dyn ModelProgram>>>,
    handles: Mutex<HashMap<String, HandleState>>,
    sessions: Mutex<HashMap<String, TrainingTracker>>,
}

impl ModelRuntime {
    pub(crate) fn new(link: Arc<HostLink>) -> Self {
        Self {
            link,
            program: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Installs the loaded user program, once per process lifetime.
    pub(crate) fn install_program(&self, program: Box<dyn ModelProgram>) -> Result<()> {
        let mut slot = self.program.lock();
        if slot.is_some() {
            return Err(RunnerErr::InvalidArgument(
                "a model program is already initialized".to_string(),
            ));
        }
        *slot = Some(Arc::from(program));
        Ok(())
    }

    fn program(&self) -> Result<Arc<dyn ModelProgram>> {
        self.program.lock().clone().ok_or_else(|| {
            RunnerErr::Exception("no model program has been initialized".to_string())
        })
    }

    fn instance(&self, instantiated_id: &str) -> Result<Arc<dyn ModelInstance>> {
        match self.handles.lock().get(instantiated_id) {
            Some(HandleState::Ready(instance)) => Ok(instance.clone()),
            _ => Err(RunnerErr::InstantiatedModelNotFound {
                instantiated_id: instantiated_id.to_string(),
            }),
        }
    }

    fn loaders(&self, params: Vec<DatasetParam>, scope: &OpScope) -> Vec<DataLoader> {
        params
            .into_iter()
            .map(|param| DataLoader::new(param, self.link.clone(), scope.clone()))
            .collect()
    }

    fn artifact_loaders(
        &self,
        params: Vec<DatasetParam>,
        scope: &OpScope,
    ) -> Result<Vec<ArtifactLoader>> {
        params
            .into_iter()
            .map(|param| {
                ArtifactLoader::new(DataLoader::new(param, self.link.clone(), scope.clone()))
            })
            .collect()
    }

    pub(crate) async fn create_state(
        &self,
        id: &str,
        params: Vec<DatasetParam>,
        other_artifacts: Vec<DatasetParam>,
    ) -> Result<()> {
        let program = self.program()?;
        debug!("creating state: id={id}");

        let scope = OpScope::new();
        let result = async {
            let params = self.loaders(params, &scope);
            let other_artifacts = self.artifact_loaders(other_artifacts, &scope)?;
            program.create_state(params, other_artifacts).await
        }
        .await;
        scope.close();

        result
    }

    pub(crate) async fn instantiate(
        &self,
        id: &str,
        instantiated_id: String,
        artifact: Vec<DatasetParam>,
        other_artifacts: Vec<DatasetParam>,
    ) -> Result<()> {
        let program = self.program()?;
        debug!("instantiating model: id={id} instantiated_id={instantiated_id}");

        // The handle is registered before the user callback runs so a
        // concurrent dispose has something to target.
        {
            let mut handles = self.handles.lock();
            if handles.contains_key(&instantiated_id) {
                return Err(RunnerErr::InvalidArgument(format!(
                    "instantiated model id {instantiated_id} is already in use"
                )));
            }
            handles.insert(
                instantiated_id.clone(),
                HandleState::Pending {
                    dispose_requested: false,
                },
            );
        }

        let scope = OpScope::new();
        let result = async {
            let artifact = self.artifact_loaders(artifact, &scope)?;
            let other_artifacts = self.artifact_loaders(other_artifacts, &scope)?;
            program.instantiate(artifact, other_artifacts).await
        }
        .await;
        scope.close();

        match result {
            Ok(instance) => {
                let instance: Arc<dyn ModelInstance> = Arc::from(instance);
                let publish = {
                    let mut handles = self.handles.lock();
                    let keep = matches!(
                        handles.get(&instantiated_id),
                        Some(HandleState::Pending {
                            dispose_requested: false,
                        })
                    );
                    if keep {
                        handles.insert(
                            instantiated_id.clone(),
                            HandleState::Ready(instance.clone()),
                        );
                    } else {
                        handles.remove(&instantiated_id);
                    }
                    keep
                };

                if !publish {
                    debug!(
                        "disposal was requested mid-instantiation: instantiated_id={instantiated_id}"
                    );
                    instance.dispose().await;
                }
                Ok(())
            }
            Err(e) => {
                self.handles.lock().remove(&instantiated_id);
                Err(e)
            }
        }
    }

    /// Disposes the handle `instantiated_id`. Unknown ids are a defined
    /// no-op; a still-pending handle is disposed when it resolves.
    pub(crate) async fn dispose(&self, instantiated_id: &str) {
        let ready = {
            let mut handles = self.handles.lock();
            let ready = match handles.get_mut(instantiated_id) {
                None => {
                    debug!("dispose of unknown handle is a no-op: instantiated_id={instantiated_id}");
                    None
                }
                Some(HandleState::Pending { dispose_requested }) => {
                    *dispose_requested = true;
                    None
                }
                Some(HandleState::Ready(instance)) => Some(instance.clone()),
            };
            if ready.is_some() {
                handles.remove(instantiated_id);
            }
            ready
        };

        if let Some(instance) = ready {
            instance.dispose().await;
        }
    }

    pub(crate) async fn train(
        &self,
        training_session_id: String,
        instantiated_id: &str,
        params: Vec<DatasetParam>,
    ) -> Result<()> {
        let instance = self.instance(instantiated_id)?;
        info!("training session started: session_id={training_session_id}");

        let tracker = TrainingTracker::new(training_session_id.clone(), self.link.clone());
        // A later train call with the same id supersedes the old session.
        self.sessions
            .lock()
            .insert(training_session_id.clone(), tracker.clone());

        let scope = OpScope::new();
        let result = instance.train(self.loaders(params, &scope), tracker.clone()).await;
        scope.close();
        tracker.complete();

        {
            let mut sessions = self.sessions.lock();
            if sessions
                .get(&training_session_id)
                .is_some_and(|t| t.same_as(&tracker))
            {
                sessions.remove(&training_session_id);
            }
        }

        info!("training session finished: session_id={training_session_id}");
        result
    }

    /// Cancels the session `training_session_id`. Unknown ids are a
    /// defined no-op. Cancel callbacks run synchronously in this turn.
    pub(crate) fn cancel_train(&self, training_session_id: &str) {
        match self.sessions.lock().remove(training_session_id) {
            Some(tracker) => {
                info!("cancelling training session: session_id={training_session_id}");
                tracker.cancel();
            }
            None => debug!(
                "cancel of unknown training session is a no-op: session_id={training_session_id}"
            ),
        }
    }

    pub(crate) async fn evaluate(
        &self,
        instantiated_id: &str,
        params: Vec<DatasetParam>,
    ) -> Result<(Vec<EvalOutputMeta>, Vec<u8>)> {
        let instance = self.instance(instantiated_id)?;

        let scope = OpScope::new();
        let result = instance.evaluate(self.loaders(params, &scope)).await;
        scope.close();

        let mut outputs = Vec::new();
        let mut payload = Vec::new();
        for output in result? {
            outputs.push(EvalOutputMeta {
                name: output.name,
                byte_sizes: output.data.iter().map(|s| s.len() as u64).collect(),
            });
            for segment in output.data {
                payload.extend_from_slice(&segment);
            }
        }
        Ok((outputs, payload))
    }

    pub(crate) async fn get_state(
        &self,
        id: &str,
        instantiated_id: &str,
        command_id: u64,
    ) -> Result<()> {
        let instance = self.instance(instantiated_id)?;
        debug!("exporting state: id={id} instantiated_id={instantiated_id}");

        let scope = OpScope::new();
        let provider = ArtifactProvider::new(command_id, self.link.clone(), scope.clone());
        let result = instance.get_state(provider).await;
        scope.close();

        result
    }
}
