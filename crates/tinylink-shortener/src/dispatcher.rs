use crate::shortener::Shortener;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use typed_builder::TypedBuilder;

pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct DispatcherConfig {
    /// Upper bound on a single background deletion.
    #[builder(default = DEFAULT_DELETE_TIMEOUT)]
    pub timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs bulk deletions in the background so the caller can acknowledge the
/// request before the storage work completes.
///
/// Each deletion is bounded by the configured timeout. Failures are logged
/// and never reported back to the requester. [`DeletionDispatcher::shutdown`]
/// waits for deletions still in flight.
pub struct DeletionDispatcher {
    shortener: Arc<dyn Shortener>,
    config: DispatcherConfig,
    tasks: Mutex<JoinSet<()>>,
}

impl DeletionDispatcher {
    pub fn new(shortener: Arc<dyn Shortener>, config: DispatcherConfig) -> Self {
        Self {
            shortener,
            config,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Schedules the deletion of `codes` owned by `owner_id` and returns
    /// immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, owner_id: impl Into<String>, codes: Vec<String>) {
        let owner_id = owner_id.into();
        let shortener = Arc::clone(&self.shortener);
        let timeout = self.config.timeout;

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let count = codes.len();
            match tokio::time::timeout(timeout, shortener.delete_many(&owner_id, &codes)).await {
                Ok(Ok(())) => debug!(owner = %owner_id, count, "background deletion finished"),
                Ok(Err(e)) => error!(
                    owner = %owner_id,
                    count,
                    error = %e,
                    "background deletion failed"
                ),
                Err(_) => error!(
                    owner = %owner_id,
                    count,
                    timeout_ms = timeout.as_millis() as u64,
                    "background deletion timed out"
                ),
            }
        });
    }

    /// Number of deletions that have not been reaped yet.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Waits for every scheduled deletion to finish or time out.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let pending = tasks.len();
        if pending > 0 {
            info!(pending, "waiting for background deletions");
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "background deletion task aborted");
            }
        }
    }
}
