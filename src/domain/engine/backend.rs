use std::fmt;
use std::sync::{Arc, RwLock};

use crate::domain::pod::builder::ExecutionSpec;
use crate::domain::utils::id::TaskKey;
use crate::error::Result;

/// The cluster that actually runs containers.
///
/// Calls are fire-and-forget; outcomes come back to the engine as pod status events.
pub trait ClusterBackend: fmt::Debug + Send + Sync {
    fn launch(&self, spec: &ExecutionSpec) -> Result<()>;
    fn terminate(&self, task: &TaskKey) -> Result<()>;
}

/// Accepts every request and does nothing.
#[derive(Debug, Default)]
pub struct NullBackend;

impl ClusterBackend for NullBackend {
    fn launch(&self, spec: &ExecutionSpec) -> Result<()> {
        log::debug!("Launch {} on node '{}' (no backend).", spec.key, spec.node);
        Ok(())
    }

    fn terminate(&self, task: &TaskKey) -> Result<()> {
        log::debug!("Terminate {} (no backend).", task);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    launched: Vec<ExecutionSpec>,
    terminated: Vec<TaskKey>,
}

/// Records launches and terminations. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<RwLock<Recorded>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> Vec<ExecutionSpec> {
        self.inner.read().expect("RwLock poisoned").launched.clone()
    }

    pub fn terminated(&self) -> Vec<TaskKey> {
        self.inner.read().expect("RwLock poisoned").terminated.clone()
    }
}

impl ClusterBackend for RecordingBackend {
    fn launch(&self, spec: &ExecutionSpec) -> Result<()> {
        self.inner.write().expect("RwLock poisoned").launched.push(spec.clone());
        Ok(())
    }

    fn terminate(&self, task: &TaskKey) -> Result<()> {
        self.inner.write().expect("RwLock poisoned").terminated.push(task.clone());
        Ok(())
    }
}
