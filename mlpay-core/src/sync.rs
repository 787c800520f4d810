use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::Utc;
use mlpay_expenses::ClassificationOutcome;
use mlpay_expenses::Expense;
use mlpay_expenses::ExpenseClassificationInput;
use mlpay_expenses::ExpenseDirection;
use mlpay_expenses::ExpenseSource;
use mlpay_expenses::ExpenseStatus;
use mlpay_expenses::ExpenseStore;
use mlpay_expenses::classify_expense;
use mlpay_jobqueue::JobQueue;
use mlpay_payments::PaymentStore;
use mlpay_payments::RawMlPayment;
use mlpay_sellers::SellerId;
use thiserror::Error;

use crate::classifier::classify_payment;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Payments(#[from] mlpay_payments::PaymentsError),
    #[error(transparent)]
    Expenses(#[from] mlpay_expenses::ExpenseError),
    #[error(transparent)]
    Jobs(#[from] mlpay_jobqueue::JobQueueError),
    /// Carries a [`SyncPaymentSource`] implementation's own error (an HTTP
    /// client's failure, say) as a message, so this crate never depends on
    /// any particular transport's error type.
    #[error("payment source error: {0}")]
    Source(String),
}

/// One invocation's target window plus the retroactive-backfill knobs
/// exposed on the operator surface: `dry_run` (enumerate only, write
/// nothing) and `reprocess_missing_fees` (re-run the classifier on
/// already-terminal payments whose stored fees are null).
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub begin: NaiveDate,
    pub end: NaiveDate,
    pub dry_run: bool,
    pub reprocess_missing_fees: bool,
}

impl SyncWindow {
    /// The default rolling window: `[today - 3, today - 1]` in seller-local
    /// calendar.
    #[must_use]
    pub fn rolling(today: NaiveDate, lookback_days: i64) -> Self {
        Self { begin: today - Duration::days(lookback_days), end: today - Duration::days(1), dry_run: false, reprocess_missing_fees: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub orders: u64,
    pub expenses: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Pages ML's payment search for one seller; the daily sync queries this
/// twice (by `date_approved`, by `date_last_updated`) and unions the
/// results to dedupe across the two filters.
#[async_trait]
pub trait SyncPaymentSource: Send + Sync {
    async fn search_by_date_approved(&self, seller: &SellerId, window: &SyncWindow) -> SyncResult<Vec<RawMlPayment>>;
    async fn search_by_date_last_updated(&self, seller: &SellerId, window: &SyncWindow) -> SyncResult<Vec<RawMlPayment>>;
}

/// Unions two enumerations of the same seller's payments, deduplicating by
/// `id` and preferring the first occurrence (the `date_approved` pass, which
/// always supplies a value for that field).
#[must_use]
pub fn union_dedup(first: Vec<RawMlPayment>, second: Vec<RawMlPayment>) -> Vec<RawMlPayment> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(first.len() + second.len());
    for payment in first.into_iter().chain(second) {
        if seen.insert(payment.id.clone()) {
            merged.push(payment);
        }
    }
    merged
}

/// `true` when this payment should be skipped for the current pass: it is
/// already in a terminal state and the caller did not ask to reprocess
/// payments whose fees were never extracted.
fn already_done(existing: Option<&mlpay_payments::Payment>, reprocess_missing_fees: bool) -> bool {
    match existing {
        Some(payment) if payment.is_terminal() => {
            if reprocess_missing_fees && payment.processor_fee.is_none() {
                return false;
            }
            true
        }
        _ => false,
    }
}

/// Drives one seller through one sync window: enumerates via both filters,
/// dedupes, then dispatches each kept payment to the Payment Classifier (for
/// order-bearing payments) or a minimal Expense Classifier input (for
/// everything else). `dry_run` short-circuits after enumeration and returns
/// the count of payments that would have been dispatched, with no store
/// writes.
#[allow(clippy::too_many_arguments)]
pub async fn run_daily_sync(
    seller: &SellerId,
    source: &dyn SyncPaymentSource,
    payments: &dyn PaymentStore,
    expenses: &dyn ExpenseStore,
    jobs: &dyn JobQueue,
    window: &SyncWindow,
    vendor_categories: &HashMap<String, String>,
) -> SyncResult<SyncCounters> {
    let by_approved = source.search_by_date_approved(seller, window).await?;
    let by_updated = source.search_by_date_last_updated(seller, window).await?;
    let enumerated = union_dedup(by_approved, by_updated);

    let mut counters = SyncCounters::default();
    if window.dry_run {
        counters.orders = enumerated.iter().filter(|raw| raw.order_id.is_some()).count() as u64;
        counters.expenses = enumerated.iter().filter(|raw| raw.order_id.is_none()).count() as u64;
        return Ok(counters);
    }

    let now = Utc::now();
    for raw in &enumerated {
        let existing = payments.get(seller, &raw.id).await?;
        if already_done(existing.as_ref(), window.reprocess_missing_fees) {
            counters.skipped += 1;
            continue;
        }

        if raw.order_id.is_some() {
            payments.upsert_observed(seller, raw.clone()).await?;
            let result = classify_payment(seller, raw, existing.as_ref(), "", now);
            if let (Some(fee), Some(shipping)) = (result.processor_fee, result.processor_shipping) {
                payments.set_fees(seller, &raw.id, fee, shipping).await?;
            }
            payments.transition(seller, &raw.id, result.processing_status).await?;
            if let Some(reason) = result.skip_reason {
                payments.set_error(seller, &raw.id, reason).await?;
                counters.errors += 1;
            }
            for request in result.jobs {
                jobs.enqueue(request).await?;
            }
            counters.orders += 1;
        } else {
            let input = ExpenseClassificationInput {
                operation_type: raw.operation_type.as_deref().unwrap_or(""),
                description: raw.description.as_deref().unwrap_or(""),
                is_savings_pot_account: false,
                febraban_code: None,
                is_virtual_payment: false,
                is_collection: false,
                vendor_key: None,
            };
            if let ClassificationOutcome::Classify { expense_type, direction, auto_categorized, ca_category } = classify_expense(&input, vendor_categories) {
                let status = if auto_categorized { ExpenseStatus::AutoCategorized } else { ExpenseStatus::PendingReview };
                expenses
                    .upsert(Expense {
                        seller: seller.clone(),
                        payment_id: raw.id.clone(),
                        expense_type,
                        direction,
                        ca_category,
                        auto_categorized,
                        amount: raw.amount,
                        description: raw.description.clone().unwrap_or_default(),
                        source: ExpenseSource::PaymentsApi,
                        status,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
            }
            counters.expenses += 1;
        }
    }

    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlpay_payments::ChargeDetail;
    use mlpay_payments::Payer;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn raw(id: &str) -> RawMlPayment {
        RawMlPayment {
            id: id.to_string(),
            order_id: None,
            status: "approved".to_string(),
            status_detail: None,
            description: None,
            collector_id: None,
            operation_type: Some("bill_payment".to_string()),
            amount: Decimal::ONE,
            net_received_amount: Decimal::ONE,
            transaction_amount_refunded: None,
            charges_details: Vec::<ChargeDetail>::new(),
            shipping_amount: Decimal::ZERO,
            money_release_date: None,
            money_release_status: None,
            date_approved: Some(Utc::now()),
            date_last_updated: None,
            payment_method_id: None,
            payment_type_id: None,
            installments: None,
            authorization_code: None,
            payer: Payer::default(),
        }
    }

    #[test]
    fn union_dedup_prefers_first_occurrence_and_drops_duplicates() {
        let merged = union_dedup(vec![raw("1"), raw("2")], vec![raw("2"), raw("3")]);
        let ids: Vec<_> = merged.iter().map(|payment| payment.id.clone()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn rolling_window_spans_three_to_one_days_back() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default();
        let window = SyncWindow::rolling(today, 3);
        assert_eq!(window.begin, NaiveDate::from_ymd_opt(2026, 2, 12).unwrap_or_default());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2026, 2, 14).unwrap_or_default());
    }
}
