#![deny(clippy::print_stdout, clippy::print_stderr)]

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use mlpay_jobqueue::EnqueueJobRequest;
use mlpay_jobqueue::priority;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod memory;

pub use crate::memory::InMemoryInstallmentStore;

pub type InstallmentId = String;

pub type InstallmentsResult<T> = Result<T, InstallmentsError>;

#[derive(Debug, Error)]
pub enum InstallmentsError {
    #[error("installment not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Generalizes a journal-entry reconciliation status to installments:
/// `released`/`bypass` installments reach `Released`, operator-gated
/// non-matches reach `WriteOff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseStatus {
    Unreleased,
    Pending { check_id: String },
    Released { check_id: String },
    WriteOff { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub seller: String,
    pub payment_id: Option<String>,
    pub bank_account_id: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub release_status: ReleaseStatus,
    pub baixa_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installment {
    pub fn mark_pending(&mut self, check_id: impl Into<String>) -> InstallmentsResult<()> {
        match &self.release_status {
            ReleaseStatus::Unreleased | ReleaseStatus::Pending { .. } => {
                self.release_status = ReleaseStatus::Pending { check_id: check_id.into() };
                Ok(())
            }
            ReleaseStatus::Released { .. } | ReleaseStatus::WriteOff { .. } => Err(InstallmentsError::Validation(
                "cannot mark pending after release or write-off".into(),
            )),
        }
    }

    pub fn mark_released(&mut self, check_id: &str) -> InstallmentsResult<()> {
        match &self.release_status {
            ReleaseStatus::Pending { check_id: pending } if pending == check_id => {
                self.release_status = ReleaseStatus::Released { check_id: check_id.to_string() };
                Ok(())
            }
            ReleaseStatus::Unreleased => {
                self.release_status = ReleaseStatus::Released { check_id: check_id.to_string() };
                Ok(())
            }
            ReleaseStatus::Released { .. } => Ok(()),
            ReleaseStatus::Pending { check_id: pending } => Err(InstallmentsError::Validation(format!(
                "installment is pending under check {pending}"
            ))),
            ReleaseStatus::WriteOff { .. } => {
                Err(InstallmentsError::Validation("write-off installments cannot be released".into()))
            }
        }
    }

    pub fn mark_write_off(&mut self, reason: impl Into<String>) -> InstallmentsResult<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(InstallmentsError::Validation("write-off requires a reason".into()));
        }
        match self.release_status {
            ReleaseStatus::Unreleased | ReleaseStatus::Pending { .. } => {
                self.release_status = ReleaseStatus::WriteOff { reason };
                Ok(())
            }
            ReleaseStatus::Released { .. } => Err(InstallmentsError::Validation(
                "released installments cannot be written off".into(),
            )),
            ReleaseStatus::WriteOff { .. } => Ok(()),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.release_status, ReleaseStatus::Unreleased | ReleaseStatus::Pending { .. })
    }
}

/// The description suffix the Payment Classifier stamps on every receivable
/// so the Release Checker can later recover the originating payment id
/// without a separate lookup table.
#[must_use]
pub fn installment_description(title: &str, payment_id: &str) -> String {
    format!("{title} [ml:{payment_id}]")
}

/// Stable-format parser matching [`installment_description`].
#[must_use]
pub fn extract_payment_id(description: &str) -> Option<String> {
    let start = description.rfind("[ml:")?;
    let end = description[start..].find(']')?;
    Some(description[start + 4..start + end].to_string())
}

/// A read-only view of whatever the local payments cache knows, passed in by
/// the caller — this crate never owns payment rows, only installment status.
#[derive(Debug, Clone)]
pub struct CachedPaymentRelease {
    pub money_release_status: Option<String>,
    pub money_release_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCheckResult {
    Released,
    Bypass,
    Unknown,
    StaleNeedsRefetch,
}

/// Release Checker rule table over one installment's cached payment row.
/// Step 3 (re-fetch on stale `pending`) is signalled via
/// [`ReleaseCheckResult::StaleNeedsRefetch`] — the actual ML call is the
/// caller's responsibility since this crate has no HTTP client.
#[must_use]
pub fn check_release(
    cached: Option<&CachedPaymentRelease>,
    today: NaiveDate,
    bypass_enabled: bool,
) -> ReleaseCheckResult {
    match cached {
        Some(payment) => {
            let released_and_due = payment.money_release_status.as_deref() == Some("released")
                && payment.money_release_date.is_some_and(|date| date <= today);
            if released_and_due {
                return ReleaseCheckResult::Released;
            }
            let stale_pending = payment.money_release_status.as_deref() == Some("pending")
                && payment.money_release_date.is_some_and(|date| date <= today);
            if stale_pending {
                return ReleaseCheckResult::StaleNeedsRefetch;
            }
            ReleaseCheckResult::Unknown
        }
        None => {
            if bypass_enabled {
                ReleaseCheckResult::Bypass
            } else {
                ReleaseCheckResult::Unknown
            }
        }
    }
}

/// Builds the baixa job for a `released`/`bypass` installment: priority 30,
/// `scheduled_for = now`, idempotency key `{seller}:{payment_id}:baixa`.
#[must_use]
pub fn build_baixa_job(installment: &Installment, payment_id: &str, now: DateTime<Utc>) -> EnqueueJobRequest {
    EnqueueJobRequest {
        idempotency_key: format!("{}:{}:baixa", installment.seller, payment_id),
        seller: installment.seller.clone(),
        group_id: payment_id.to_string(),
        kind: "baixa".to_string(),
        endpoint: format!("/v1/financeiro/parcelas/{}/baixa", installment.id),
        method: "POST".to_string(),
        payload: serde_json::json!({ "data_baixa": now.date_naive().to_string() }),
        priority: priority::BAIXA,
        scheduled_for: now,
    }
}

#[async_trait]
pub trait InstallmentStore: Send + Sync {
    async fn upsert_open(&self, installment: Installment) -> InstallmentsResult<Installment>;
    async fn get(&self, id: &InstallmentId) -> InstallmentsResult<Installment>;
    /// Open installments due on or before `as_of`, for one seller's bank account.
    async fn list_open(&self, seller: &str, as_of: NaiveDate) -> InstallmentsResult<Vec<Installment>>;
    async fn mark_pending(&self, id: &InstallmentId, check_id: &str) -> InstallmentsResult<Installment>;
    async fn mark_released(&self, id: &InstallmentId, check_id: &str) -> InstallmentsResult<Installment>;
    async fn mark_write_off(&self, id: &InstallmentId, reason: &str) -> InstallmentsResult<Installment>;
    async fn set_baixa_job(&self, id: &InstallmentId, job_id: &str) -> InstallmentsResult<Installment>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn description_round_trips_payment_id() {
        let description = installment_description("Venda ML #999", "111");
        assert_eq!(extract_payment_id(&description), Some("111".to_string()));
    }

    #[test]
    fn released_and_due_is_released() {
        let cached = CachedPaymentRelease {
            money_release_status: Some("released".into()),
            money_release_date: NaiveDate::from_ymd_opt(2026, 2, 15),
        };
        let result = check_release(
            Some(&cached),
            NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"),
            false,
        );
        assert_eq!(result, ReleaseCheckResult::Released);
    }

    #[test]
    fn no_cached_payment_respects_bypass_toggle() {
        assert_eq!(
            check_release(None, NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"), false),
            ReleaseCheckResult::Unknown
        );
        assert_eq!(
            check_release(None, NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"), true),
            ReleaseCheckResult::Bypass
        );
    }

    #[test]
    fn stale_pending_requests_refetch() {
        let cached = CachedPaymentRelease {
            money_release_status: Some("pending".into()),
            money_release_date: NaiveDate::from_ymd_opt(2026, 2, 10),
        };
        let result = check_release(
            Some(&cached),
            NaiveDate::from_ymd_opt(2026, 2, 15).expect("date"),
            false,
        );
        assert_eq!(result, ReleaseCheckResult::StaleNeedsRefetch);
    }
}
