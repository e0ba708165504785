use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use docship_core::Repository;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::engine::{ProgressEvent, RunRequest, RunSummary, SyncEngine};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no run is in progress")]
    NotRunning,
}

/// Owns at most one engine run at a time. `start` spawns the run on a worker
/// task, `cancel` requests a cooperative stop, and the summary of the latest
/// finished run stays available until the next one starts.
pub struct RunController {
    repository: Arc<dyn Repository>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<RunSummary>>,
    last_summary: Arc<Mutex<Option<RunSummary>>>,
}

impl RunController {
    pub fn new(
        repository: Arc<dyn Repository>,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            repository,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            last_summary: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Spawns a run. Rejected while a previous run is still in flight; once
    /// that run's worker has finished, the controller is restartable.
    pub fn start(&mut self, request: RunRequest) -> Result<(), ControllerError> {
        if self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }

        self.cancel.store(false, Ordering::SeqCst);
        let engine = SyncEngine::new(
            Arc::clone(&self.repository),
            self.events.clone(),
            Arc::clone(&self.cancel),
        );
        let last_summary = Arc::clone(&self.last_summary);
        self.worker = Some(tokio::spawn(async move {
            let summary = engine.run(request).await;
            *last_summary
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary);
            summary
        }));
        Ok(())
    }

    /// Requests a cooperative stop. The engine keeps going until its next
    /// cancellation check; any upload already streaming runs to completion.
    pub fn cancel(&self) -> Result<(), ControllerError> {
        if !self.is_running() {
            return Err(ControllerError::NotRunning);
        }
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        *self
            .last_summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for the current run's worker, if any, and returns its summary.
    pub async fn wait(&mut self) -> Option<RunSummary> {
        match self.worker.take() {
            Some(worker) => worker.await.ok(),
            None => None,
        }
    }
}
