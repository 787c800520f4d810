use std::collections::HashMap;

use async_trait::async_trait;
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
use mlpay_jobqueue::EnqueueJobRequest;
use mlpay_jobqueue::JobQueue;
use mlpay_payments::PaymentStore;
use mlpay_payments::ProcessingStatus;
use mlpay_payments::RawMlPayment;
use mlpay_sellers::BackfillProgressDelta;
use mlpay_sellers::SellerDirectory;
use mlpay_sellers::SellerError;
use mlpay_sellers::SellerId;
use thiserror::Error;

use crate::classifier::classify_payment;

pub type BackfillResult<T> = Result<T, BackfillError>;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Seller(#[from] SellerError),
    #[error(transparent)]
    Payments(#[from] mlpay_payments::PaymentsError),
    #[error(transparent)]
    Expenses(#[from] mlpay_expenses::ExpenseError),
    #[error(transparent)]
    Jobs(#[from] mlpay_jobqueue::JobQueueError),
    /// Carries a [`BackfillPaymentSource`] implementation's own error as a
    /// message, so this crate never depends on any particular transport's
    /// error type.
    #[error("payment source error: {0}")]
    Source(String),
}

/// A page of the historical enumeration. Fetched one page at a time by the
/// caller's ML client so this crate stays free of HTTP concerns; `has_more`
/// tells the driving loop whether to request another page.
#[async_trait]
pub trait BackfillPaymentSource: Send + Sync {
    async fn fetch_page(&self, seller: &SellerId, begin: NaiveDate, end: NaiveDate, offset: u32) -> BackfillResult<(Vec<RawMlPayment>, bool)>;
}

/// Processes one already-fetched page against the payments/expenses stores,
/// reusing the Payment Classifier for order-bearing payments and a minimal
/// Expense Classifier input for everything else. Returns the progress delta
/// for this page plus any CA jobs to enqueue — kept separate from the
/// pagination loop so it is unit-testable without a mock HTTP client.
pub async fn process_backfill_page(
    seller: &SellerId,
    page: &[RawMlPayment],
    payments: &dyn PaymentStore,
    expenses: &dyn ExpenseStore,
    vendor_categories: &HashMap<String, String>,
) -> BackfillResult<(BackfillProgressDelta, Vec<EnqueueJobRequest>)> {
    let mut delta = BackfillProgressDelta::default();
    let mut jobs = Vec::new();
    let now = Utc::now();

    for raw in page {
        let existing = payments.get(seller, &raw.id).await?;
        if existing.as_ref().is_some_and(mlpay_payments::Payment::is_terminal) {
            delta.skipped += 1;
            delta.last_payment_id = Some(raw.id.clone());
            continue;
        }

        if raw.order_id.is_some() {
            let stored = payments.upsert_observed(seller, raw.clone()).await?;
            let result = classify_payment(seller, raw, existing.as_ref(), "", now);
            if let (Some(fee), Some(shipping)) = (result.processor_fee, result.processor_shipping) {
                payments.set_fees(seller, &raw.id, fee, shipping).await?;
            }
            payments.transition(seller, &raw.id, result.processing_status).await?;
            if let Some(reason) = result.skip_reason {
                payments.set_error(seller, &raw.id, reason).await?;
            }
            jobs.extend(result.jobs);
            let _ = stored;
            delta.orders_processed += 1;
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
                if direction != ExpenseDirection::Transfer {
                    delta.expenses_classified += 1;
                }
            }
        }
        delta.processed += 1;
        delta.last_payment_id = Some(raw.id.clone());
    }

    Ok((delta, jobs))
}

/// Drives the full historical reconstruction for one seller: validates
/// pre-conditions via [`SellerDirectory::start_backfill`], pages the source
/// until exhausted, ticking progress after every page, then marks the
/// backfill completed or failed. Resumable: a seller already `Running` can
/// be re-driven from `begin_date` again since every page re-checks
/// `PaymentStore` for already-terminal rows before reprocessing (the
/// `already_done` filter), so replaying earlier pages is a no-op.
#[allow(clippy::too_many_arguments)]
pub async fn run_onboarding_backfill(
    directory: &dyn SellerDirectory,
    payments: &dyn PaymentStore,
    expenses: &dyn ExpenseStore,
    jobs: &dyn JobQueue,
    source: &dyn BackfillPaymentSource,
    seller: &SellerId,
    ca_start_date: NaiveDate,
    today: NaiveDate,
    vendor_categories: &HashMap<String, String>,
) -> BackfillResult<mlpay_sellers::Seller> {
    directory.start_backfill(seller, ca_start_date).await?;

    let mut offset = 0u32;
    loop {
        let (page, has_more) = match source.fetch_page(seller, ca_start_date, today, offset).await {
            Ok(result) => result,
            Err(error) => {
                directory.fail_backfill(seller, &error.to_string()).await?;
                return Err(error);
            }
        };
        if page.is_empty() && !has_more {
            break;
        }

        let (delta, page_jobs) = process_backfill_page(seller, &page, payments, expenses, vendor_categories).await?;
        for request in page_jobs {
            jobs.enqueue(request).await?;
        }
        directory.tick_backfill_progress(seller, delta).await?;

        if !has_more {
            break;
        }
        offset += u32::try_from(page.len()).unwrap_or(0);
    }

    directory.complete_backfill(seller).await.map_err(BackfillError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlpay_expenses::InMemoryExpenseStore;
    use mlpay_payments::ChargeDetail;
    use mlpay_payments::InMemoryPaymentStore;
    use mlpay_payments::Payer;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn raw(id: &str, order_id: Option<&str>) -> RawMlPayment {
        RawMlPayment {
            id: id.to_string(),
            order_id: order_id.map(str::to_string),
            status: "approved".to_string(),
            status_detail: None,
            description: None,
            collector_id: None,
            operation_type: order_id.is_none().then(|| "bill_payment".to_string()),
            amount: Decimal::ONE_HUNDRED,
            net_received_amount: Decimal::ONE_HUNDRED,
            transaction_amount_refunded: None,
            charges_details: Vec::<ChargeDetail>::new(),
            shipping_amount: Decimal::ZERO,
            money_release_date: NaiveDate::from_ymd_opt(2026, 2, 15),
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

    #[tokio::test]
    async fn page_with_order_and_non_order_payments_splits_correctly() {
        let payments = InMemoryPaymentStore::default();
        let expenses = InMemoryExpenseStore::default();
        let page = vec![raw("1", Some("order-1")), raw("2", None)];

        let (delta, jobs) = process_backfill_page(&"acme".to_string(), &page, &payments, &expenses, &HashMap::new()).await.expect("page processes");
        assert_eq!(delta.orders_processed, 1);
        assert_eq!(delta.processed, 2);
        assert!(!jobs.is_empty());

        let expense = expenses.get("acme", "2").await.expect("expense stored");
        assert_eq!(expense.payment_id, "2");
    }

    #[tokio::test]
    async fn already_terminal_payment_is_skipped_on_replay() {
        let payments = InMemoryPaymentStore::default();
        let expenses = InMemoryExpenseStore::default();
        let order = raw("1", Some("order-1"));
        payments.upsert_observed("acme", order.clone()).await.expect("upsert");
        payments.transition("acme", "1", ProcessingStatus::Synced).await.expect("transition");

        let (delta, jobs) = process_backfill_page(&"acme".to_string(), &[order], &payments, &expenses, &HashMap::new()).await.expect("page processes");
        assert_eq!(delta.skipped, 1);
        assert_eq!(delta.processed, 0);
        assert!(jobs.is_empty());
    }
}
