//! Keyed caches refreshed in the background.
//!
//! This module provides:
//!
//! - [`AutoRefreshCache`]: LRU-bounded cache whose entries are re-synced on a
//!   fixed interval by a bounded pool of concurrent workers
//! - [`Refreshable`]: values that fold refresh results into themselves
//! - [`SyncFunc`]: the refresh call for one entry, supplied by a plugin
//! - [`SyncHealth`]: per-entry refresh health, including the circuit breaker
//! - [`job_store`]: the array-task specialization keyed by execution name
//!
//! ## Failure Handling
//!
//! A refresh failure is classified as user or system caused. A user failure
//! marks the entry failed immediately. System failures are counted; once
//! `max_system_failures` consecutive system failures accumulate the breaker
//! trips and the entry is marked failed. Failed entries are never refreshed
//! again and stay failed until evicted.
//!
//! ## Concurrent Writers
//!
//! A refresh runs without the lock held. Its result is merged into the live
//! value afterwards, so writes made while the call was in flight are kept.
//! A result for an entry that was evicted (or evicted and re-created) in the
//! meantime is dropped.

pub mod job_store;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use lru::LruCache;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_core::{FailureKind, Phase};

use crate::config::CachingConfig;
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;

/// A classified refresh failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    /// Responsibility classification.
    pub kind: FailureKind,
    /// Description of the failure.
    pub message: String,
}

impl SyncError {
    /// A failure the user must fix.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::User,
            message: message.into(),
        }
    }

    /// A failure of the external system or the platform.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::System,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sync failure: {}", self.kind, self.message)
    }
}

impl From<Error> for SyncError {
    fn from(err: Error) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

/// A value held by an [`AutoRefreshCache`].
pub trait Refreshable: Clone + Send + Sync + 'static {
    /// What one refresh call produces.
    type Update: Send;

    /// Folds a refresh result into the live value.
    fn merge(&mut self, update: Self::Update);
}

/// Refreshes one cached value.
#[async_trait]
pub trait SyncFunc<T: Refreshable>: Send + Sync {
    /// Fetches the update for `key` given a snapshot of the cached value.
    ///
    /// Implementations should stop waiting and return a system failure
    /// once `cancel` fires.
    async fn sync(
        &self,
        key: &str,
        current: &T,
        cancel: &CancellationToken,
    ) -> std::result::Result<T::Update, SyncError>;
}

/// Refresh health of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncHealth {
    /// The last refresh succeeded (or none has run yet).
    #[default]
    Healthy,
    /// Recent refreshes failed with system errors below the breaker threshold.
    Degraded {
        /// Consecutive system failures so far.
        consecutive_system_failures: u32,
        /// Message of the latest failure.
        last_error: String,
    },
    /// The entry will not be refreshed again.
    Failed {
        /// Classification of the failure that ended refreshing.
        kind: FailureKind,
        /// Description of that failure.
        message: String,
    },
}

impl SyncHealth {
    /// Returns true once the entry stopped being refreshed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The phase to report for work that has not finished under this entry.
    ///
    /// Only a failed entry changes anything: its unfinished work is
    /// permanently failed. A degraded entry keeps the last observed phase,
    /// since a later refresh may still succeed.
    #[must_use]
    pub fn surface(&self, phase: Phase) -> Phase {
        match self {
            Self::Failed { .. } if !phase.is_terminal() => Phase::PermanentFailure,
            _ => phase,
        }
    }

    /// Failure message, if the entry is not healthy.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Healthy => None,
            Self::Degraded { last_error, .. } => Some(last_error),
            Self::Failed { message, .. } => Some(message),
        }
    }
}

/// A cached value with its refresh health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub value: T,
    /// Refresh health.
    pub health: SyncHealth,
    generation: u64,
}

impl<T> CacheEntry<T> {
    fn fresh(value: T, generation: u64) -> Self {
        Self {
            value,
            health: SyncHealth::Healthy,
            generation,
        }
    }
}

/// Counts from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries refreshed successfully.
    pub refreshed: usize,
    /// Entries whose refresh failed.
    pub failed: usize,
    /// Entries whose failure ended refreshing.
    pub tripped: usize,
}

enum SyncOutcome {
    Refreshed,
    Failed,
    Tripped,
    Gone,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("cache lock poisoned")
}

/// LRU cache with background refresh.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct AutoRefreshCache<T: Refreshable> {
    name: String,
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    generations: AtomicU64,
    sync: Arc<dyn SyncFunc<T>>,
    config: CachingConfig,
    metrics: PluginMetrics,
}

impl<T: Refreshable> fmt::Debug for AutoRefreshCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoRefreshCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Refreshable> AutoRefreshCache<T> {
    /// Creates an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(
        name: impl Into<String>,
        config: CachingConfig,
        sync: Arc<dyn SyncFunc<T>>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.size)
            .ok_or_else(|| Error::configuration("caching.size must be greater than 0"))?;
        Ok(Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
            generations: AtomicU64::new(0),
            sync,
            config,
            metrics: PluginMetrics::new(),
        })
    }

    /// Name used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cached entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().map_err(poison_err)?.len())
    }

    /// Returns true if the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Looks up an entry, marking it recently used.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let mut entries = self.entries.lock().map_err(poison_err)?;
        Ok(entries.get(key).cloned())
    }

    /// Returns the entry for `key`, inserting `factory()` if absent.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// with the same key observe a single insertion. The flag is true for the
    /// caller that inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn get_or_create(
        &self,
        key: &str,
        factory: impl FnOnce() -> T,
    ) -> Result<(CacheEntry<T>, bool)> {
        let mut entries = self.entries.lock().map_err(poison_err)?;
        if let Some(existing) = entries.get(key) {
            return Ok((existing.clone(), false));
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry::fresh(factory(), generation);
        if let Some((evicted, _)) = entries.push(key.to_string(), entry.clone()) {
            debug!(cache = %self.name, key = %evicted, "evicted least recently used entry");
        }
        let len = entries.len();
        drop(entries);
        self.metrics.set_cache_entries(&self.name, len);
        Ok((entry, true))
    }

    /// Removes an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn evict(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let mut entries = self.entries.lock().map_err(poison_err)?;
        let removed = entries.pop(key);
        let len = entries.len();
        drop(entries);
        self.metrics.set_cache_entries(&self.name, len);
        Ok(removed)
    }

    /// Mutates a cached value in place without changing its recency.
    ///
    /// Returns false if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn update(&self, key: &str, mutate: impl FnOnce(&mut T)) -> Result<bool> {
        let mut entries = self.entries.lock().map_err(poison_err)?;
        Ok(entries.peek_mut(key).map(|entry| mutate(&mut entry.value)).is_some())
    }

    /// Refreshes every entry that has not failed, at most `workers` at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let snapshot: Vec<(String, T, u64)> = {
            let entries = self.entries.lock().map_err(poison_err)?;
            entries
                .iter()
                .filter(|(_, entry)| !entry.health.is_failed())
                .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.generation))
                .collect()
        };

        let outcomes: Vec<Result<SyncOutcome>> = stream::iter(snapshot)
            .map(move |(key, value, generation)| async move {
                if cancel.is_cancelled() {
                    return Ok(SyncOutcome::Gone);
                }
                let result = self.sync.sync(&key, &value, cancel).await;
                self.apply(&key, generation, result)
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        let mut report = SyncReport::default();
        for outcome in outcomes {
            match outcome? {
                SyncOutcome::Refreshed => report.refreshed += 1,
                SyncOutcome::Failed => report.failed += 1,
                SyncOutcome::Tripped => {
                    report.failed += 1;
                    report.tripped += 1;
                }
                SyncOutcome::Gone => {}
            }
        }
        Ok(report)
    }

    fn apply(
        &self,
        key: &str,
        generation: u64,
        result: std::result::Result<T::Update, SyncError>,
    ) -> Result<SyncOutcome> {
        let mut entries = self.entries.lock().map_err(poison_err)?;
        let Some(entry) = entries
            .peek_mut(key)
            .filter(|entry| entry.generation == generation)
        else {
            debug!(cache = %self.name, key, "entry replaced during refresh, dropping result");
            return Ok(SyncOutcome::Gone);
        };

        let err = match result {
            Ok(update) => {
                entry.value.merge(update);
                entry.health = SyncHealth::Healthy;
                return Ok(SyncOutcome::Refreshed);
            }
            Err(err) => err,
        };

        self.metrics.record_sync_failure(&self.name, err.kind);
        let failures = match (&entry.health, err.kind) {
            (_, FailureKind::User) => None,
            (
                SyncHealth::Degraded {
                    consecutive_system_failures,
                    ..
                },
                FailureKind::System,
            ) => Some(consecutive_system_failures.saturating_add(1)),
            (_, FailureKind::System) => Some(1),
        };

        match failures {
            Some(count) if count < self.config.max_system_failures => {
                warn!(
                    cache = %self.name,
                    key,
                    consecutive_failures = count,
                    error = %err.message,
                    "cache entry sync failed"
                );
                entry.health = SyncHealth::Degraded {
                    consecutive_system_failures: count,
                    last_error: err.message,
                };
                Ok(SyncOutcome::Failed)
            }
            Some(count) => {
                error!(
                    cache = %self.name,
                    key,
                    consecutive_failures = count,
                    error = %err.message,
                    "circuit breaker tripped, entry marked failed"
                );
                self.metrics.record_breaker_trip(&self.name);
                entry.health = SyncHealth::Failed {
                    kind: FailureKind::System,
                    message: err.message,
                };
                Ok(SyncOutcome::Tripped)
            }
            None => {
                warn!(cache = %self.name, key, error = %err.message, "cache entry failed with user error");
                entry.health = SyncHealth::Failed {
                    kind: FailureKind::User,
                    message: err.message,
                };
                Ok(SyncOutcome::Tripped)
            }
        }
    }

    /// Spawns the resync loop; it runs until `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                cache = %self.name,
                resync_interval_secs = self.config.resync_interval.as_secs(),
                workers = self.config.workers,
                "cache refresh loop starting"
            );

            let mut interval = tokio::time::interval(self.config.resync_interval);
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        info!(cache = %self.name, "cache refresh loop shutting down");
                        break;
                    }

                    _ = interval.tick() => {
                        match self.sync_all(&cancel).await {
                            Ok(report) => debug!(
                                cache = %self.name,
                                refreshed = report.refreshed,
                                failed = report.failed,
                                tripped = report.tripped,
                                "cache refresh pass complete"
                            ),
                            Err(e) => error!(cache = %self.name, error = %e, "cache refresh pass failed"),
                        }
                    }
                }
            }
        })
    }
}
