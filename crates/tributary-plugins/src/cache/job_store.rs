//! Job state cache for array tasks.
//!
//! One [`JobRecord`] per execution, keyed by the execution's generated
//! name. The background poller refreshes sub-job slots through a
//! [`BatchClient`]; reconciliation rounds only read.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tributary_core::Phase;

use super::{AutoRefreshCache, CacheEntry, Refreshable, SyncError, SyncFunc, SyncHealth};
use crate::admission::rate_limit::ExternalCallLimiter;
use crate::config::CachingConfig;
use crate::error::{Error, Result};

/// Cache name used in logs and metrics.
pub const JOB_STORE_NAME: &str = "array-jobs";

/// Current state of one sub-job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubJobStatus {
    /// Reported phase.
    pub phase: Phase,
    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubJobStatus {
    /// A status without a message.
    #[must_use]
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            message: None,
        }
    }

    /// A failure status carrying a message.
    #[must_use]
    pub fn failed(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: Some(message.into()),
        }
    }
}

/// One execution attempt of a sub-job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// Log stream holding the attempt's output.
    pub log_stream: String,
}

/// Tracking slot for one child of an array job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubJob {
    /// Current status.
    pub status: SubJobStatus,
    /// Attempts in start order.
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

/// External job tracking record for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// External job identifier.
    pub id: String,
    /// The requesting execution, for cleanup and attribution.
    pub owner: String,
    /// One slot per child.
    pub sub_jobs: Vec<SubJob>,
}

impl JobRecord {
    /// Creates a record with `size` empty sub-job slots.
    #[must_use]
    pub fn new(id: impl Into<String>, owner: impl Into<String>, size: usize) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            sub_jobs: vec![SubJob::default(); size],
        }
    }

    /// Status of child `index` as the reconciliation round should see it.
    ///
    /// Missing slots read as [`Phase::Undefined`]. Unfinished children of an
    /// entry whose refresh has failed for good are permanently failed with
    /// the refresh failure as their message.
    #[must_use]
    pub fn effective_status(&self, index: usize, health: &SyncHealth) -> SubJobStatus {
        let status = self
            .sub_jobs
            .get(index)
            .map(|sub_job| sub_job.status.clone())
            .unwrap_or_default();
        let surfaced = health.surface(status.phase);
        if surfaced == status.phase {
            return status;
        }
        SubJobStatus {
            phase: surfaced,
            message: health.message().map(str::to_string),
        }
    }

    /// Attempts recorded for child `index`.
    #[must_use]
    pub fn attempts(&self, index: usize) -> &[Attempt] {
        self.sub_jobs
            .get(index)
            .map_or(&[], |sub_job| sub_job.attempts.as_slice())
    }
}

impl Refreshable for JobRecord {
    type Update = Vec<SubJob>;

    /// Folds freshly described sub-jobs into this record.
    ///
    /// Children that already reached a terminal phase keep it. Attempts are
    /// only ever appended, so a shorter described list leaves them alone.
    fn merge(&mut self, described: Vec<SubJob>) {
        for (slot, fresh) in self.sub_jobs.iter_mut().zip(described) {
            if slot.status.phase.is_terminal() {
                continue;
            }
            slot.status = fresh.status;
            if fresh.attempts.len() >= slot.attempts.len() {
                slot.attempts = fresh.attempts;
            }
        }
    }
}

/// External batch backend for array jobs.
#[async_trait]
pub trait BatchClient: Send + Sync {
    /// Submits an array job with `array_size` children; returns its id.
    async fn submit_job(&self, job_name: &str, array_size: usize) -> Result<String>;

    /// Describes every child of a job, in child order.
    async fn describe_job(&self, job_id: &str) -> Result<Vec<SubJob>>;

    /// Terminates a job and all of its children.
    async fn terminate_job(&self, job_id: &str, reason: &str) -> Result<()>;
}

/// Refreshes job records from a [`BatchClient`] behind a read limiter.
pub struct BatchJobPoller {
    client: Arc<dyn BatchClient>,
    limiter: Arc<ExternalCallLimiter>,
}

impl std::fmt::Debug for BatchJobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJobPoller")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl BatchJobPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(client: Arc<dyn BatchClient>, limiter: Arc<ExternalCallLimiter>) -> Self {
        Self { client, limiter }
    }
}

#[async_trait]
impl SyncFunc<JobRecord> for BatchJobPoller {
    async fn sync(
        &self,
        _key: &str,
        current: &JobRecord,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<SubJob>, SyncError> {
        self.limiter.acquire(cancel).await?;
        Ok(self.client.describe_job(&current.id).await?)
    }
}

/// Job state cache keyed by execution name.
#[derive(Debug, Clone)]
pub struct JobStore {
    cache: Arc<AutoRefreshCache<JobRecord>>,
}

impl JobStore {
    /// Creates a store refreshed by `sync`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: CachingConfig, sync: Arc<dyn SyncFunc<JobRecord>>) -> Result<Self> {
        Ok(Self {
            cache: Arc::new(AutoRefreshCache::new(JOB_STORE_NAME, config, sync)?),
        })
    }

    /// Creates a store polling `client` behind `limiter`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn with_client(
        config: CachingConfig,
        client: Arc<dyn BatchClient>,
        limiter: Arc<ExternalCallLimiter>,
    ) -> Result<Self> {
        Self::new(config, Arc::new(BatchJobPoller::new(client, limiter)))
    }

    /// Looks up the record for an execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry<JobRecord>>> {
        self.cache.get(key)
    }

    /// Returns the record for an execution, registering `factory()` if absent.
    ///
    /// The flag is true only for the caller whose record was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn get_or_create(
        &self,
        key: &str,
        factory: impl FnOnce() -> JobRecord,
    ) -> Result<(CacheEntry<JobRecord>, bool)> {
        self.cache.get_or_create(key, factory)
    }

    /// Forgets an execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub fn evict(&self, key: &str) -> Result<Option<CacheEntry<JobRecord>>> {
        self.cache.evict(key)
    }

    /// Overwrites the status of one sub-job. Returns false if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`tributary_core::Error::IndexOutOfRange`] if the record has no
    /// slot `index`.
    pub fn update_sub_job(&self, key: &str, index: usize, status: SubJobStatus) -> Result<bool> {
        self.with_slot(key, index, |slot| slot.status = status)
    }

    /// Appends an attempt to one sub-job. Returns false if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`tributary_core::Error::IndexOutOfRange`] if the record has no
    /// slot `index`.
    pub fn record_attempt(&self, key: &str, index: usize, attempt: Attempt) -> Result<bool> {
        self.with_slot(key, index, |slot| slot.attempts.push(attempt))
    }

    fn with_slot(&self, key: &str, index: usize, mutate: impl FnOnce(&mut SubJob)) -> Result<bool> {
        let mut out_of_range = None;
        let found = self.cache.update(key, |record| {
            let len = record.sub_jobs.len();
            match record.sub_jobs.get_mut(index) {
                Some(slot) => mutate(slot),
                None => out_of_range = Some(len),
            }
        })?;
        if let Some(len) = out_of_range {
            return Err(Error::Core(tributary_core::Error::IndexOutOfRange { index, len }));
        }
        Ok(found)
    }

    /// Runs one refresh pass over every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<super::SyncReport> {
        self.cache.sync_all(cancel).await
    }

    /// Starts background refresh until `cancel` fires.
    #[must_use]
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.cache).start(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBatch {
        children: Mutex<Vec<SubJob>>,
        fail: Mutex<Option<Error>>,
    }

    #[async_trait]
    impl BatchClient for FakeBatch {
        async fn submit_job(&self, job_name: &str, _array_size: usize) -> Result<String> {
            Ok(format!("job-{job_name}"))
        }

        async fn describe_job(&self, _job_id: &str) -> Result<Vec<SubJob>> {
            if let Some(err) = self.fail.lock().unwrap().take() {
                return Err(err);
            }
            Ok(self.children.lock().unwrap().clone())
        }

        async fn terminate_job(&self, _job_id: &str, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    fn caching() -> CachingConfig {
        CachingConfig {
            size: 16,
            resync_interval: Duration::from_secs(1),
            workers: 4,
            max_system_failures: 2,
        }
    }

    fn store(client: Arc<FakeBatch>) -> JobStore {
        let limiter = Arc::new(ExternalCallLimiter::new(
            "read",
            RateLimiterConfig { qps: 100, burst: 100 },
        ));
        JobStore::with_client(caching(), client, limiter).unwrap()
    }

    fn sub_job(phase: Phase) -> SubJob {
        SubJob {
            status: SubJobStatus::new(phase),
            attempts: vec![],
        }
    }

    #[test]
    fn get_or_create_registers_once() -> Result<()> {
        let client = Arc::new(FakeBatch {
            children: Mutex::new(vec![]),
            fail: Mutex::new(None),
        });
        let store = store(client);

        let (_, created) = store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 3))?;
        assert!(created);
        let (entry, created) =
            store.get_or_create("exec-1", || JobRecord::new("job-other", "owner", 9))?;
        assert!(!created);
        assert_eq!(entry.value.id, "job-1");
        assert_eq!(entry.value.sub_jobs.len(), 3);
        Ok(())
    }

    #[test]
    fn update_sub_job_checks_bounds() -> Result<()> {
        let client = Arc::new(FakeBatch {
            children: Mutex::new(vec![]),
            fail: Mutex::new(None),
        });
        let store = store(client);
        store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 2))?;

        assert!(store.update_sub_job("exec-1", 1, SubJobStatus::new(Phase::Running))?);
        assert!(!store.update_sub_job("missing", 0, SubJobStatus::new(Phase::Running))?);
        assert!(matches!(
            store.update_sub_job("exec-1", 2, SubJobStatus::new(Phase::Running)),
            Err(Error::Core(tributary_core::Error::IndexOutOfRange { index: 2, len: 2 }))
        ));

        store.record_attempt("exec-1", 1, Attempt { log_stream: "s/1".into() })?;
        let record = store.get("exec-1")?.unwrap().value;
        assert_eq!(record.sub_jobs[1].status.phase, Phase::Running);
        assert_eq!(record.attempts(1).len(), 1);
        assert!(record.attempts(7).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn poller_merges_without_regressing_terminal_children() -> Result<()> {
        let client = Arc::new(FakeBatch {
            children: Mutex::new(vec![sub_job(Phase::Running), sub_job(Phase::Success)]),
            fail: Mutex::new(None),
        });
        let store = store(Arc::clone(&client));
        store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 2))?;
        store.update_sub_job("exec-1", 0, SubJobStatus::failed(Phase::PermanentFailure, "oom"))?;

        store.sync_all(&CancellationToken::new()).await?;
        let record = store.get("exec-1")?.unwrap().value;
        assert_eq!(record.sub_jobs[0].status.phase, Phase::PermanentFailure);
        assert_eq!(record.sub_jobs[1].status.phase, Phase::Success);
        Ok(())
    }

    /// Describes every child as running, after a delay.
    struct SlowDescribe;

    #[async_trait]
    impl SyncFunc<JobRecord> for SlowDescribe {
        async fn sync(
            &self,
            _key: &str,
            current: &JobRecord,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Vec<SubJob>, SyncError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(vec![sub_job(Phase::Running); current.sub_jobs.len()])
        }
    }

    #[tokio::test]
    async fn writes_during_refresh_are_kept() -> Result<()> {
        let store = JobStore::new(caching(), Arc::new(SlowDescribe))?;
        store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 2))?;
        let cancel = CancellationToken::new();

        let write = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.update_sub_job("exec-1", 0, SubJobStatus::failed(Phase::PermanentFailure, "oom"))
        };
        let (report, written) = tokio::join!(store.sync_all(&cancel), write);
        assert_eq!(report?.refreshed, 1);
        assert!(written?);

        let record = store.get("exec-1")?.unwrap().value;
        assert_eq!(
            record.sub_jobs[0].status,
            SubJobStatus::failed(Phase::PermanentFailure, "oom")
        );
        assert_eq!(record.sub_jobs[1].status.phase, Phase::Running);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_of_replaced_entry_is_dropped() -> Result<()> {
        let store = JobStore::new(caching(), Arc::new(SlowDescribe))?;
        store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 2))?;
        let cancel = CancellationToken::new();

        let replace = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store
                .evict("exec-1")
                .and_then(|_| store.get_or_create("exec-1", || JobRecord::new("job-2", "owner", 3)))
        };
        let (report, replaced) = tokio::join!(store.sync_all(&cancel), replace);
        assert_eq!(report?.refreshed, 0);
        assert!(replaced?.1);

        let record = store.get("exec-1")?.unwrap().value;
        assert_eq!(record, JobRecord::new("job-2", "owner", 3));
        Ok(())
    }

    #[test]
    fn merge_keeps_terminal_slots_and_attempts() {
        let mut record = JobRecord::new("job-1", "owner", 2);
        record.sub_jobs[0].status = SubJobStatus::new(Phase::Success);
        record.sub_jobs[1].attempts.push(Attempt { log_stream: "s/1/a".into() });

        record.merge(vec![sub_job(Phase::Running), sub_job(Phase::Queued)]);
        assert_eq!(record.sub_jobs[0].status.phase, Phase::Success);
        assert_eq!(record.sub_jobs[1].status.phase, Phase::Queued);
        assert_eq!(record.attempts(1).len(), 1);
    }

    #[tokio::test]
    async fn repeated_system_failures_surface_as_permanent() -> Result<()> {
        let client = Arc::new(FakeBatch {
            children: Mutex::new(vec![]),
            fail: Mutex::new(None),
        });
        let store = store(Arc::clone(&client));
        store.get_or_create("exec-1", || JobRecord::new("job-1", "owner", 2))?;
        store.update_sub_job("exec-1", 1, SubJobStatus::new(Phase::Success))?;
        let cancel = CancellationToken::new();

        *client.fail.lock().unwrap() = Some(Error::system("throttled"));
        store.sync_all(&cancel).await?;
        let entry = store.get("exec-1")?.unwrap();
        assert!(matches!(entry.health, SyncHealth::Degraded { .. }));
        assert_eq!(
            entry.value.effective_status(0, &entry.health),
            SubJobStatus::new(Phase::Undefined)
        );

        *client.fail.lock().unwrap() = Some(Error::system("throttled"));
        let report = store.sync_all(&cancel).await?;
        assert_eq!(report.tripped, 1);
        let entry = store.get("exec-1")?.unwrap();
        let status = entry.value.effective_status(0, &entry.health);
        assert_eq!(status.phase, Phase::PermanentFailure);
        assert!(status.message.is_some_and(|m| m.contains("throttled")));
        assert_eq!(
            entry.value.effective_status(1, &entry.health).phase,
            Phase::Success
        );
        Ok(())
    }

    #[test]
    fn missing_slots_read_as_undefined() {
        let record = JobRecord::new("job-1", "owner", 1);
        let status = record.effective_status(5, &SyncHealth::Healthy);
        assert_eq!(status, SubJobStatus::new(Phase::Undefined));
    }
}
