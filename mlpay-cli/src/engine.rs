use std::sync::Arc;

use mlpay_audit::InMemoryAuditLog;
use mlpay_clients::MlCaRateLimiter;
use mlpay_core::AccountingTelemetry;
use mlpay_core::RuntimeConfig;
use mlpay_coverage::InMemoryDailyCloseGate;
use mlpay_expenses::InMemoryExpenseStore;
use mlpay_installments::InMemoryInstallmentStore;
use mlpay_jobqueue::InMemoryJobQueue;
use mlpay_payments::InMemoryPaymentStore;
use mlpay_policy::InMemoryPolicyStore;
use mlpay_sellers::InMemorySellerDirectory;

/// Everything one `mlpay` process invocation shares: the in-memory stores
/// that stand in for the real Postgres-backed tables until those land,
/// the operator policy table, the hash-chained audit log, and persisted
/// telemetry counters. Built fresh per invocation, mirroring how the
/// reference stores are constructed in every other crate's tests.
pub struct Engine {
    pub config: RuntimeConfig,
    /// Single token bucket shared by every ML read and CA write this process
    /// makes, matching the combined per-account rate limit `mlpay-clients`
    /// enforces (one bucket, not one per client).
    pub rate_limiter: Arc<MlCaRateLimiter>,
    pub sellers: InMemorySellerDirectory,
    pub payments: InMemoryPaymentStore,
    pub expenses: InMemoryExpenseStore,
    pub installments: InMemoryInstallmentStore,
    pub jobs: InMemoryJobQueue,
    pub close_gate: InMemoryDailyCloseGate,
    pub policy: InMemoryPolicyStore,
    pub audit: Arc<InMemoryAuditLog>,
    pub telemetry: AccountingTelemetry,
}

impl Engine {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = RuntimeConfig::from_env()?;
        Ok(Self {
            config,
            rate_limiter: Arc::new(MlCaRateLimiter::new()),
            sellers: InMemorySellerDirectory::default(),
            payments: InMemoryPaymentStore::default(),
            expenses: InMemoryExpenseStore::default(),
            installments: InMemoryInstallmentStore::default(),
            jobs: InMemoryJobQueue::default(),
            close_gate: InMemoryDailyCloseGate::new(),
            policy: InMemoryPolicyStore::new(),
            audit: InMemoryAuditLog::shared(),
            telemetry: AccountingTelemetry::persistent_from_env(),
        })
    }
}
