use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// Counters surfaced on the operator CLI's `status` subcommand, persisted so
/// they survive a process restart between nightly-pipeline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub payments_classified_sale: usize,
    pub payments_classified_reversal: usize,
    pub payments_skipped: usize,
    pub expenses_classified: usize,
    pub jobs_enqueued: usize,
    pub jobs_completed: usize,
    pub jobs_dead: usize,
    pub backfill_pages_processed: usize,
    pub sync_runs: usize,
    pub baixas_enqueued: usize,
    pub coverage_uncovered_lines: usize,
    pub days_closed: usize,
}

#[derive(Debug)]
struct TelemetryStore {
    path: PathBuf,
}

impl TelemetryStore {
    fn from_env() -> Option<Self> {
        let home = env::var_os("MLPAY_HOME")?;
        let mut path = PathBuf::from(home);
        path.push("telemetry.json");
        Some(Self { path })
    }

    fn read(&self) -> anyhow::Result<Option<TelemetryCounters>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).with_context(|| format!("failed to read {}", self.path.display()))?;
        let counters = serde_json::from_slice(&data).with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(counters))
    }

    fn persist(&self, counters: &TelemetryCounters) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(counters).context("failed to encode telemetry counters")?;
        fs::write(&self.path, data).with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TelemetryInner {
    counters: TelemetryCounters,
    store: Option<TelemetryStore>,
}

impl TelemetryInner {
    fn with_store(store: Option<TelemetryStore>) -> Self {
        match store {
            Some(store) => {
                let counters = match store.read() {
                    Ok(Some(existing)) => existing,
                    Ok(None) => TelemetryCounters::default(),
                    Err(err) => {
                        warn!(path = %store.path.display(), error = %err, "failed to load persisted telemetry; continuing with defaults");
                        TelemetryCounters::default()
                    }
                };
                Self { counters, store: Some(store) }
            }
            None => Self::default(),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(err) = store.persist(&self.counters)
        {
            warn!(path = %store.path.display(), error = %err, "failed to persist telemetry counters");
        }
    }
}

/// File-backed counters, one process-wide instance per binary. Cloning is
/// cheap (shared `Arc`); every recorder method takes `&self`.
#[derive(Clone, Default)]
pub struct AccountingTelemetry {
    inner: Arc<Mutex<TelemetryInner>>,
}

impl AccountingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::from_store(None)
    }

    #[must_use]
    pub fn persistent_from_env() -> Self {
        Self::from_store(TelemetryStore::from_env())
    }

    #[must_use]
    pub fn with_store_path(path: PathBuf) -> Self {
        Self::from_store(Some(TelemetryStore { path }))
    }

    fn from_store(store: Option<TelemetryStore>) -> Self {
        Self { inner: Arc::new(Mutex::new(TelemetryInner::with_store(store))) }
    }

    fn update<F>(&self, mut updater: F)
    where
        F: FnMut(&mut TelemetryCounters) -> bool,
    {
        if let Ok(mut inner) = self.inner.lock()
            && updater(&mut inner.counters)
        {
            inner.persist();
        }
    }

    pub fn record_classification(&self, sales: usize, reversals: usize, skipped: usize) {
        if sales == 0 && reversals == 0 && skipped == 0 {
            return;
        }
        self.update(|counters| {
            counters.payments_classified_sale += sales;
            counters.payments_classified_reversal += reversals;
            counters.payments_skipped += skipped;
            true
        });
    }

    pub fn record_expenses_classified(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|counters| {
            counters.expenses_classified += count;
            true
        });
    }

    pub fn record_jobs_enqueued(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|counters| {
            counters.jobs_enqueued += count;
            true
        });
    }

    pub fn record_job_completed(&self) {
        self.update(|counters| {
            counters.jobs_completed += 1;
            true
        });
    }

    pub fn record_job_dead(&self) {
        self.update(|counters| {
            counters.jobs_dead += 1;
            true
        });
    }

    pub fn record_backfill_page(&self) {
        self.update(|counters| {
            counters.backfill_pages_processed += 1;
            true
        });
    }

    pub fn record_sync_run(&self) {
        self.update(|counters| {
            counters.sync_runs += 1;
            true
        });
    }

    pub fn record_baixas_enqueued(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.update(|counters| {
            counters.baixas_enqueued += count;
            true
        });
    }

    pub fn record_coverage_snapshot(&self, uncovered_lines: usize) {
        self.update(|counters| {
            if counters.coverage_uncovered_lines == uncovered_lines {
                return false;
            }
            counters.coverage_uncovered_lines = uncovered_lines;
            true
        });
    }

    pub fn record_day_closed(&self) {
        self.update(|counters| {
            counters.days_closed += 1;
            true
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounters {
        self.inner.lock().map(|inner| inner.counters.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().and_then(|inner| inner.store.as_ref().map(|store| store.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counters_accumulate() {
        let telemetry = AccountingTelemetry::new();
        telemetry.record_classification(3, 1, 2);
        telemetry.record_jobs_enqueued(5);
        telemetry.record_job_completed();
        telemetry.record_job_dead();
        telemetry.record_baixas_enqueued(2);
        telemetry.record_coverage_snapshot(4);
        telemetry.record_day_closed();

        let counters = telemetry.snapshot();
        assert_eq!(counters.payments_classified_sale, 3);
        assert_eq!(counters.payments_classified_reversal, 1);
        assert_eq!(counters.payments_skipped, 2);
        assert_eq!(counters.jobs_enqueued, 5);
        assert_eq!(counters.jobs_completed, 1);
        assert_eq!(counters.jobs_dead, 1);
        assert_eq!(counters.baixas_enqueued, 2);
        assert_eq!(counters.coverage_uncovered_lines, 4);
        assert_eq!(counters.days_closed, 1);
    }

    #[test]
    fn persistence_survives_restart() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        {
            let telemetry = AccountingTelemetry::with_store_path(path.clone());
            telemetry.record_sync_run();
            telemetry.record_backfill_page();
        }
        let telemetry = AccountingTelemetry::with_store_path(path);
        let counters = telemetry.snapshot();
        assert_eq!(counters.sync_runs, 1);
        assert_eq!(counters.backfill_pages_processed, 1);
    }

    #[test]
    fn persistence_recovers_from_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        fs::write(&path, b"not json").expect("write corrupt telemetry");

        let telemetry = AccountingTelemetry::with_store_path(path.clone());
        let counters = telemetry.snapshot();
        assert_eq!(counters.sync_runs, 0);

        telemetry.record_sync_run();

        let reloaded = AccountingTelemetry::with_store_path(path);
        let counters = reloaded.snapshot();
        assert_eq!(counters.sync_runs, 1);

        let stored_path = reloaded.store_path().expect("telemetry path recorded");
        assert!(stored_path.ends_with("telemetry.json"), "unexpected path: {stored_path:?}");
    }
}
