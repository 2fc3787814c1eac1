//! Recurring tasks submitted to the scheduler.

use crate::permissions::PermissionInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Where the scheduler runs a task.
///
/// `Inline` tasks are serialised on the host's main loop. `Background` tasks
/// may run concurrently on worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    #[default]
    Inline,
    Background,
}

#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed interval between runs. Must be non-zero.
    fn interval(&self) -> Duration;

    fn affinity(&self) -> Affinity {
        Affinity::Inline
    }

    fn permissions(&self) -> Vec<(String, PermissionInfo)> {
        Vec::new()
    }

    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task as submitted to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRegistration {
    pub id: TaskId,
    pub module: String,
    pub name: String,
    #[serde(with = "millis")]
    pub interval: Duration,
    pub affinity: Affinity,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(interval.as_millis() as u64)
    }
}
