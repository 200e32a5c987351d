//! Supervisor for background subagent runs.
//!
//! A spawn returns to the model immediately; the run itself continues as a
//! tracked task. Each run gets a child of the supervisor's shutdown token, so
//! a single run or all of them can be cancelled, and shutdown can wait for
//! outstanding runs to drain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Handle to one background run.
#[derive(Debug, Clone)]
pub struct SubagentHandle {
    pub run_id: String,
    pub session_key: String,
    pub label: Option<String>,
    cancel: CancellationToken,
}

impl SubagentHandle {
    /// Ask the run to stop. The run reports the cancellation in its announcement.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

type RunMap = Arc<Mutex<HashMap<String, SubagentHandle>>>;

/// Tracks every in-flight subagent run.
pub struct SubagentSupervisor {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runs: RunMap,
}

impl SubagentSupervisor {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Launch `run` as an independent task. The closure receives the run's
    /// cancellation token; the returned handle can cancel it.
    pub fn launch<F, Fut>(
        &self,
        run_id: impl Into<String>,
        session_key: impl Into<String>,
        label: Option<String>,
        run: F,
    ) -> SubagentHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = SubagentHandle {
            run_id: run_id.into(),
            session_key: session_key.into(),
            label,
            cancel: self.shutdown.child_token(),
        };

        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.run_id.clone(), handle.clone());

        let runs = Arc::clone(&self.runs);
        let run_id = handle.run_id.clone();
        let fut = run(handle.cancel.clone());
        self.tracker.spawn(async move {
            fut.await;
            runs.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&run_id);
            debug!(run_id = %run_id, "Subagent run finished");
        });

        handle
    }

    /// Runs that have not finished yet.
    pub fn active(&self) -> Vec<SubagentHandle> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cancel one run by id. Returns false when no such run is active.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
        {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active run.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Wait for all runs launched so far to finish.
    ///
    /// Runs launched after this returns are tracked again, so a supervisor
    /// can be drained more than once.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for SubagentSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
