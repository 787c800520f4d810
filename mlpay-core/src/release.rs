use chrono::NaiveDate;
use chrono::Utc;
use mlpay_installments::CachedPaymentRelease;
use mlpay_installments::InstallmentStore;
use mlpay_installments::ReleaseCheckResult;
use mlpay_installments::build_baixa_job;
use mlpay_installments::check_release;
use mlpay_installments::extract_payment_id;
use mlpay_jobqueue::JobQueue;
use mlpay_payments::PaymentStore;
use mlpay_sellers::SellerId;
use thiserror::Error;

pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Installments(#[from] mlpay_installments::InstallmentsError),
    #[error(transparent)]
    Payments(#[from] mlpay_payments::PaymentsError),
    #[error(transparent)]
    Jobs(#[from] mlpay_jobqueue::JobQueueError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaixaPassSummary {
    pub baixas_enqueued: u64,
    /// Payment ids whose cached release info was a stale `pending` past its
    /// `money_release_date` — the caller must re-fetch these from ML and
    /// feed the refreshed payload back through [`PaymentStore::upsert_observed`]
    /// before the next pass can resolve them (see `StaleNeedsRefetch`).
    pub needs_refetch: Vec<String>,
}

/// Runs the daily release-checking pass: lists open installments due on or before
/// `today`, recovers the originating `payment_id` from the description
/// (stable format set by the classifier), runs the Release Checker over the
/// seller's cached payment row, and enqueues a baixa job for every
/// `released`/`bypass` outcome.
pub async fn run_baixa_pass(
    installments: &dyn InstallmentStore,
    payments: &dyn PaymentStore,
    jobs: &dyn JobQueue,
    seller: &SellerId,
    today: NaiveDate,
    bypass_enabled: bool,
) -> ReleaseResult<BaixaPassSummary> {
    let open = installments.list_open(seller, today).await?;
    let mut summary = BaixaPassSummary::default();

    for installment in open {
        let Some(payment_id) = extract_payment_id(&installment.description) else {
            continue;
        };

        let cached = payments.get(seller, &payment_id).await?.map(|payment| CachedPaymentRelease {
            money_release_status: payment.raw_payload.money_release_status.clone(),
            money_release_date: payment.money_release_date,
        });

        match check_release(cached.as_ref(), today, bypass_enabled) {
            result @ (ReleaseCheckResult::Released | ReleaseCheckResult::Bypass) => {
                let now = Utc::now();
                let request = build_baixa_job(&installment, &payment_id, now);
                let enqueued = jobs.enqueue(request).await?;
                installments.mark_pending(&installment.id, &enqueued.id).await?;
                if result == ReleaseCheckResult::Released {
                    installments.mark_released(&installment.id, &enqueued.id).await?;
                } else {
                    installments.mark_write_off(&installment.id, "bypass_policy").await?;
                }
                installments.set_baixa_job(&installment.id, &enqueued.id).await?;
                summary.baixas_enqueued += 1;
            }
            ReleaseCheckResult::StaleNeedsRefetch => summary.needs_refetch.push(payment_id),
            ReleaseCheckResult::Unknown => {}
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use mlpay_installments::InMemoryInstallmentStore;
    use mlpay_installments::Installment;
    use mlpay_installments::ReleaseStatus;
    use mlpay_installments::installment_description;
    use mlpay_jobqueue::InMemoryJobQueue;
    use mlpay_payments::ChargeDetail;
    use mlpay_payments::InMemoryPaymentStore;
    use mlpay_payments::Payer;
    use mlpay_payments::RawMlPayment;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn synced_payment(id: &str, status: &str, release_date: NaiveDate) -> RawMlPayment {
        RawMlPayment {
            id: id.to_string(),
            order_id: Some(format!("order-{id}")),
            status: "approved".to_string(),
            status_detail: None,
            description: None,
            collector_id: None,
            operation_type: None,
            amount: Decimal::ONE_HUNDRED,
            net_received_amount: Decimal::ONE_HUNDRED,
            transaction_amount_refunded: None,
            charges_details: Vec::<ChargeDetail>::new(),
            shipping_amount: Decimal::ZERO,
            money_release_date: Some(release_date),
            money_release_status: Some(status.to_string()),
            date_approved: Some(DateTime::<Utc>::default()),
            date_last_updated: None,
            payment_method_id: None,
            payment_type_id: None,
            installments: None,
            authorization_code: None,
            payer: Payer::default(),
        }
    }

    async fn seeded_installment(payment_id: &str, due_date: NaiveDate) -> (InMemoryInstallmentStore, String) {
        let store = InMemoryInstallmentStore::default();
        let installment = Installment {
            id: format!("inst-{payment_id}"),
            seller: "acme".to_string(),
            payment_id: Some(payment_id.to_string()),
            bank_account_id: "ba-1".to_string(),
            description: installment_description("Venda ML #999", payment_id),
            due_date,
            release_status: ReleaseStatus::Unreleased,
            baixa_job_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = installment.id.clone();
        store.upsert_open(installment).await.expect("seed installment");
        (store, id)
    }

    #[tokio::test]
    async fn released_and_due_installment_enqueues_a_baixa() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default();
        let (installments, _id) = seeded_installment("111", today).await;
        let payments = InMemoryPaymentStore::default();
        payments.upsert_observed("acme", synced_payment("111", "released", today)).await.expect("seed payment");
        let jobs = InMemoryJobQueue::default();

        let summary = run_baixa_pass(&installments, &payments, &jobs, &"acme".to_string(), today, false).await.expect("pass runs");
        assert_eq!(summary.baixas_enqueued, 1);
        assert!(summary.needs_refetch.is_empty());
    }

    #[tokio::test]
    async fn no_cached_payment_without_bypass_leaves_installment_open() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default();
        let (installments, _id) = seeded_installment("222", today).await;
        let payments = InMemoryPaymentStore::default();
        let jobs = InMemoryJobQueue::default();

        let summary = run_baixa_pass(&installments, &payments, &jobs, &"acme".to_string(), today, false).await.expect("pass runs");
        assert_eq!(summary.baixas_enqueued, 0);
    }

    #[tokio::test]
    async fn released_installment_reaches_released_status_and_stops_reappearing() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default();
        let (installments, id) = seeded_installment("333", today).await;
        let payments = InMemoryPaymentStore::default();
        payments.upsert_observed("acme", synced_payment("333", "released", today)).await.expect("seed payment");
        let jobs = InMemoryJobQueue::default();

        run_baixa_pass(&installments, &payments, &jobs, &"acme".to_string(), today, false).await.expect("first pass runs");
        let installment = installments.get(&id).await.expect("installment exists");
        assert_eq!(installment.release_status, ReleaseStatus::Released { check_id: installment.baixa_job_id.clone().unwrap_or_default() });

        let second_pass = installments.list_open("acme", today).await.expect("list open");
        assert!(second_pass.is_empty(), "released installment must not stay open for the next pass");
    }

    #[tokio::test]
    async fn bypass_installment_reaches_write_off_with_bypass_reason() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default();
        let (installments, id) = seeded_installment("444", today).await;
        let payments = InMemoryPaymentStore::default();
        let jobs = InMemoryJobQueue::default();

        let summary = run_baixa_pass(&installments, &payments, &jobs, &"acme".to_string(), today, true).await.expect("pass runs");
        assert_eq!(summary.baixas_enqueued, 1);

        let installment = installments.get(&id).await.expect("installment exists");
        assert_eq!(installment.release_status, ReleaseStatus::WriteOff { reason: "bypass_policy".to_string() });

        let second_pass = installments.list_open("acme", today).await.expect("list open");
        assert!(second_pass.is_empty(), "bypassed installment must not stay open for the next pass");
    }
}
