//! Scheduler collaborator and a tokio-backed implementation.

use crate::context::OwnerToken;
use crate::error::HostError;
use crate::task::{Affinity, ScheduledTask, TaskId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// The host's repeating-task scheduler.
pub trait Scheduler: Send + Sync {
    /// Submits a task that runs every `interval` until shutdown.
    fn submit(
        &self,
        owner: &OwnerToken,
        id: TaskId,
        task: Arc<dyn ScheduledTask>,
        interval: Duration,
        affinity: Affinity,
    ) -> Result<(), HostError>;

    /// Stops a submitted task. Unknown ids are ignored.
    fn cancel(&self, id: TaskId) -> Result<(), HostError>;
}

/// A queued inline run and the flag marking it pending.
type MainLoopJob = (Arc<dyn ScheduledTask>, Arc<AtomicBool>);

/// Scheduler running on the current tokio runtime.
///
/// [`Affinity::Inline`] tasks are funnelled through a single main-loop task and
/// never run concurrently with each other. Each inline task has at most one
/// run queued: a tick that finds a run still pending is dropped.
/// [`Affinity::Background`] tasks each get their own ticker on the runtime's
/// worker threads.
pub struct TokioScheduler {
    main_tx: mpsc::UnboundedSender<MainLoopJob>,
    main_rx: Mutex<Option<mpsc::UnboundedReceiver<MainLoopJob>>>,
    handles: DashMap<TaskId, JoinHandle<()>>,
    main_loop: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        let (main_tx, main_rx) = mpsc::unbounded_channel();
        Self {
            main_tx,
            main_rx: Mutex::new(Some(main_rx)),
            handles: DashMap::new(),
            main_loop: Mutex::new(None),
        }
    }

    /// Number of submitted tasks still scheduled.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Aborts every scheduled task and the main loop.
    pub fn shutdown(&self) {
        let ids: Vec<TaskId> = self.handles.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.handles.remove(&id) {
                handle.abort();
            }
        }
        if let Ok(mut main_loop) = self.main_loop.lock() {
            if let Some(handle) = main_loop.take() {
                handle.abort();
            }
        }
        debug!("Scheduler shut down");
    }

    fn ensure_main_loop(&self, runtime: &tokio::runtime::Handle) -> Result<(), HostError> {
        let receiver = self
            .main_rx
            .lock()
            .map_err(|_| HostError::Scheduler("main loop lock poisoned".to_string()))?
            .take();

        if let Some(mut rx) = receiver {
            let handle = runtime.spawn(async move {
                while let Some((task, pending)) = rx.recv().await {
                    run_task(task.as_ref()).await;
                    pending.store(false, Ordering::Release);
                }
            });
            if let Ok(mut main_loop) = self.main_loop.lock() {
                *main_loop = Some(handle);
            }
        }
        Ok(())
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn submit(
        &self,
        owner: &OwnerToken,
        id: TaskId,
        task: Arc<dyn ScheduledTask>,
        interval: Duration,
        affinity: Affinity,
    ) -> Result<(), HostError> {
        if interval.is_zero() {
            return Err(HostError::InvalidInterval(task.name().to_string()));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::Scheduler(format!("no tokio runtime: {}", e)))?;
        self.ensure_main_loop(&runtime)?;

        debug!(
            "⏱️ Scheduling {} for {} every {:?} ({:?})",
            task.name(),
            owner,
            interval,
            affinity
        );

        let main_tx = self.main_tx.clone();
        let pending = Arc::new(AtomicBool::new(false));
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match affinity {
                    Affinity::Inline => {
                        if pending.swap(true, Ordering::AcqRel) {
                            continue;
                        }
                        if main_tx.send((task.clone(), pending.clone())).is_err() {
                            break;
                        }
                    }
                    Affinity::Background => run_task(task.as_ref()).await,
                }
            }
        });

        self.handles.insert(id, handle);
        Ok(())
    }

    fn cancel(&self, id: TaskId) -> Result<(), HostError> {
        if let Some((_, handle)) = self.handles.remove(&id) {
            handle.abort();
            debug!("Cancelled task {:?}", id);
        }
        Ok(())
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_task(task: &dyn ScheduledTask) {
    if let Err(e) = task.run().await {
        error!("❌ Scheduled task {} failed: {}", task.name(), e);
    }
}
