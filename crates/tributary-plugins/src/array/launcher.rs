//! Submission and termination of array jobs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tributary_core::BitSet;

use super::ParentAggregateState;
use crate::admission::rate_limit::ExternalCallLimiter;
use crate::cache::job_store::BatchClient;
use crate::config::ArrayConfig;
use crate::error::{Error, Result};

/// Submits array jobs to a [`BatchClient`] behind a write limiter.
pub struct ArrayJobLauncher {
    client: Arc<dyn BatchClient>,
    limiter: Arc<ExternalCallLimiter>,
    config: ArrayConfig,
}

impl std::fmt::Debug for ArrayJobLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayJobLauncher")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArrayJobLauncher {
    /// Creates a launcher.
    #[must_use]
    pub fn new(
        client: Arc<dyn BatchClient>,
        limiter: Arc<ExternalCallLimiter>,
        config: ArrayConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            config,
        }
    }

    /// Submits one child per position not set in `cached_indexes` and
    /// returns the initial state for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns an error if there is nothing to execute, the array exceeds the
    /// configured maximum, the limiter wait is cancelled, or submission fails.
    pub async fn submit(
        &self,
        job_name: &str,
        min_successes: u64,
        cached_indexes: BitSet,
        cancel: &CancellationToken,
    ) -> Result<ParentAggregateState> {
        let size = cached_indexes.count_unset();
        if size == 0 {
            return Err(Error::invalid_state(format!(
                "array job {job_name} has no children to execute"
            )));
        }
        if size > self.config.max_array_size {
            return Err(Error::invalid_state(format!(
                "array size {size} exceeds the maximum of {}",
                self.config.max_array_size
            )));
        }

        self.limiter.acquire(cancel).await?;
        let job_id = self.client.submit_job(job_name, size).await?;
        info!(job_name, job_id = %job_id, array_size = size, "array job submitted");
        Ok(ParentAggregateState::new(job_id, min_successes, cached_indexes))
    }

    /// Terminates the external job behind `state`, if one was submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the limiter wait is cancelled or termination fails.
    pub async fn abort(
        &self,
        state: &ParentAggregateState,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(job_id) = state.external_job_id.as_deref() else {
            return Ok(());
        };
        self.limiter.acquire(cancel).await?;
        self.client.terminate_job(job_id, reason).await?;
        info!(job_id, reason, "array job terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::job_store::SubJob;
    use crate::config::RateLimiterConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        submitted: Mutex<Vec<(String, usize)>>,
        terminated: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BatchClient for Recorder {
        async fn submit_job(&self, job_name: &str, array_size: usize) -> Result<String> {
            self.submitted
                .lock()
                .unwrap()
                .push((job_name.to_string(), array_size));
            Ok(format!("job-{job_name}"))
        }

        async fn describe_job(&self, _job_id: &str) -> Result<Vec<SubJob>> {
            Ok(vec![])
        }

        async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()> {
            self.terminated
                .lock()
                .unwrap()
                .push((job_id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    fn launcher(client: Arc<Recorder>, max_array_size: usize) -> ArrayJobLauncher {
        let limiter = Arc::new(ExternalCallLimiter::new(
            "write",
            RateLimiterConfig { qps: 100, burst: 100 },
        ));
        let config = ArrayConfig {
            max_array_size,
            ..ArrayConfig::default()
        };
        ArrayJobLauncher::new(client, limiter, config)
    }

    #[tokio::test]
    async fn submits_only_uncached_children() -> Result<()> {
        let client = Arc::new(Recorder::default());
        let launcher = launcher(Arc::clone(&client), 100);
        let cancel = CancellationToken::new();

        let cached = BitSet::with_set(5, [1, 3])?;
        let state = launcher.submit("exec-1", 4, cached, &cancel).await?;
        assert_eq!(state.execution_size(), 3);
        assert_eq!(state.external_job_id.as_deref(), Some("job-exec-1"));
        assert_eq!(client.submitted.lock().unwrap()[0], ("exec-1".to_string(), 3));

        launcher.abort(&state, "user abort", &cancel).await?;
        assert_eq!(
            client.terminated.lock().unwrap()[0],
            ("job-exec-1".to_string(), "user abort".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_arrays() -> Result<()> {
        let client = Arc::new(Recorder::default());
        let launcher = launcher(Arc::clone(&client), 2);
        let cancel = CancellationToken::new();

        let all_cached = BitSet::with_set(2, [0, 1])?;
        assert!(launcher.submit("a", 1, all_cached, &cancel).await.is_err());
        assert!(launcher.submit("b", 1, BitSet::new(3), &cancel).await.is_err());
        assert!(client.submitted.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn abort_without_job_is_noop() -> Result<()> {
        let client = Arc::new(Recorder::default());
        let launcher = launcher(Arc::clone(&client), 10);
        let mut state = ParentAggregateState::uncached("job-1", 2, 2);
        state.external_job_id = None;

        launcher
            .abort(&state, "cleanup", &CancellationToken::new())
            .await?;
        assert!(client.terminated.lock().unwrap().is_empty());
        Ok(())
    }
}
