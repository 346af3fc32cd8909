//! Shared state of one in-flight execution.
//!
//! The scheduler task and the engine facade both hold a [`RunState`]. Every
//! lifecycle change goes through [`RunState::transition`], which applies it
//! to the record and reports it to the execution store in order.

use crate::context::ExecutionContext;
use crate::error::TransitionError;
use crate::execution::{Execution, ExecutionStatus, ExecutionUpdate};
use crate::log::{ExecutionLogSink, LogEntry};
use crate::node::NodeId;
use crate::store::ExecutionStore;
use autoflow_core::ExecutionId;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error recorded on executions that end through cancellation.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled";

/// Lifecycle, context and log of one execution.
pub struct RunState {
    execution_id: ExecutionId,
    execution: Mutex<Execution>,
    context: Arc<ExecutionContext>,
    logs: ExecutionLogSink,
    store: Arc<dyn ExecutionStore>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    done: watch::Sender<bool>,
    /// Serializes transitions so the store sees them in order.
    persist: tokio::sync::Mutex<()>,
    dispatch_batches: Mutex<Vec<Vec<NodeId>>>,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("execution_id", &self.execution_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl RunState {
    #[must_use]
    pub fn new(execution: Execution, store: Arc<dyn ExecutionStore>) -> Self {
        let execution_id = execution.id;
        let (paused, _) = watch::channel(execution.status == ExecutionStatus::Paused);
        let (done, _) = watch::channel(execution.status.is_terminal());
        Self {
            execution_id,
            execution: Mutex::new(execution),
            context: Arc::new(ExecutionContext::new()),
            logs: ExecutionLogSink::new(execution_id, Arc::clone(&store)),
            store,
            cancel: CancellationToken::new(),
            paused,
            done,
            persist: tokio::sync::Mutex::new(()),
            dispatch_batches: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.lock_execution().status
    }

    /// Returns a copy of the execution record.
    #[must_use]
    pub fn snapshot(&self) -> Execution {
        self.lock_execution().clone()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    #[must_use]
    pub fn logs(&self) -> &ExecutionLogSink {
        &self.logs
    }

    /// Returns the log entries appended so far, in sequence order.
    #[must_use]
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.logs.entries()
    }

    /// Returns the run-wide cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Subscribes to the paused flag.
    #[must_use]
    pub fn subscribe_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Records one group of nodes dispatched together.
    pub fn record_batch(&self, batch: Vec<NodeId>) {
        self.dispatch_batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
    }

    /// Returns every dispatch batch so far, in dispatch order.
    #[must_use]
    pub fn dispatch_batches(&self) -> Vec<Vec<NodeId>> {
        self.dispatch_batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_execution(&self) -> std::sync::MutexGuard<'_, Execution> {
        self.execution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a lifecycle change and reports it to the store.
    ///
    /// On entry into a terminal state the context is closed and waiters are
    /// released. A store failure is logged; the in-memory record stays
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Returns the `TransitionError` from `apply`; nothing is persisted then.
    pub async fn transition<F>(&self, apply: F) -> Result<ExecutionStatus, TransitionError>
    where
        F: FnOnce(&mut Execution) -> Result<(), TransitionError>,
    {
        let _persist = self.persist.lock().await;
        let update = {
            let mut execution = self.lock_execution();
            apply(&mut execution)?;
            execution.update()
        };
        Ok(self.publish(update).await)
    }

    /// Reports an applied change. Callers hold `persist`.
    async fn publish(&self, update: ExecutionUpdate) -> ExecutionStatus {
        let status = update.status;
        debug!(execution_id = %self.execution_id, %status, "execution transitioned");

        if status.is_terminal() {
            self.context.close();
        }
        if let Err(report) = self
            .store
            .update_execution_status(self.execution_id, update)
            .await
        {
            warn!(
                execution_id = %self.execution_id,
                %status,
                error = %report,
                "failed to persist execution status"
            );
        }
        if status.is_terminal() {
            self.done.send_replace(true);
        }
        status
    }

    /// Requests cooperative cancellation.
    ///
    /// A PENDING execution is cancelled on the spot, its notice logged before
    /// waiters are released. A RUNNING or PAUSED one reaches CANCELLED once
    /// its in-flight nodes drain. Returns false if the execution is already
    /// terminal.
    pub async fn cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel.cancel();

        let _persist = self.persist.lock().await;
        if self.status() != ExecutionStatus::Pending {
            return true;
        }
        self.logs.warn(None, CANCELLED_MESSAGE).await;
        let update = {
            let mut execution = self.lock_execution();
            if execution.cancel(CANCELLED_MESSAGE, None, None).is_err() {
                return true;
            }
            execution.update()
        };
        self.publish(update).await;
        true
    }

    /// RUNNING -> PAUSED; dispatch stops until resumed.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is RUNNING.
    pub async fn pause(&self) -> Result<(), TransitionError> {
        self.transition(|execution| {
            execution.pause()?;
            self.paused.send_replace(true);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// PAUSED -> RUNNING; dispatch continues.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is PAUSED.
    pub async fn resume(&self) -> Result<(), TransitionError> {
        self.transition(|execution| {
            execution.resume()?;
            self.paused.send_replace(false);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Waits until the execution is terminal and returns the final record.
    pub async fn wait(&self) -> Execution {
        let mut done = self.done.subscribe();
        // The sender lives as long as `self`, so this only returns once done.
        let _ = done.wait_for(|finished| *finished).await;
        self.snapshot()
    }
}
