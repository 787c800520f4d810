use chrono::DateTime;
use chrono::FixedOffset;
use chrono::NaiveDate;
use chrono::Utc;
use mlpay_installments::installment_description;
use mlpay_jobqueue::EnqueueJobRequest;
use mlpay_jobqueue::priority;
use mlpay_payments::Payment;
use mlpay_payments::ProcessingStatus;
use mlpay_payments::RawMlPayment;
use mlpay_payments::extract_commission;
use mlpay_payments::extract_shipping_seller;
use mlpay_payments::net_calculated;
use mlpay_payments::reversal_amount;
use mlpay_payments::subsidy;
use rust_decimal::Decimal;

/// Seller-local calendar used for competence dates, distinct from ML's
/// internal UTC-4.
const BRT_OFFSET_SECONDS: i32 = -3 * 3600;

/// Converts a UTC instant (as returned by ML, already normalized to UTC by
/// the payments crate) to the seller-local competence date.
#[must_use]
pub fn competence_date(date_approved: DateTime<Utc>) -> NaiveDate {
    match FixedOffset::east_opt(BRT_OFFSET_SECONDS) {
        Some(brt) => date_approved.with_timezone(&brt).date_naive(),
        None => date_approved.date_naive(),
    }
}

/// Outcome of classifying one observed payment: the processing status to
/// persist, an optional skip reason, the extracted fees (persisted so a
/// later reclassification can detect `reprocess_missing_fees` candidates),
/// and the CA jobs to enqueue.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub processing_status: ProcessingStatus,
    pub skip_reason: Option<String>,
    pub processor_fee: Option<Decimal>,
    pub processor_shipping: Option<Decimal>,
    pub jobs: Vec<EnqueueJobRequest>,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        Self { processing_status: ProcessingStatus::Pending, skip_reason: None, processor_fee: None, processor_shipping: None, jobs: Vec::new() }
    }
}

/// `ml_status × status_detail × existing-row` collapsed to one tag, so the
/// action table below reads as data rather than nested conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKey {
    Approved,
    InMediation,
    ChargedBackReimbursed,
    ChargedBackOther,
    RefundedByAdminPreSync,
    RefundedByAdminPostSync,
    RefundedPartial,
    RefundedOther,
    CancelledOrRejected,
    Unhandled,
}

fn status_key(raw: &RawMlPayment, existing_is_synced: bool) -> StatusKey {
    let detail = raw.status_detail.as_deref().unwrap_or("");
    match raw.status.as_str() {
        "approved" => StatusKey::Approved,
        "in_mediation" => StatusKey::InMediation,
        "charged_back" if detail == "reimbursed" => StatusKey::ChargedBackReimbursed,
        "charged_back" => StatusKey::ChargedBackOther,
        "refunded" if detail == "by_admin" && existing_is_synced => StatusKey::RefundedByAdminPostSync,
        "refunded" if detail == "by_admin" => StatusKey::RefundedByAdminPreSync,
        "refunded" if detail == "partially_refunded" => StatusKey::RefundedPartial,
        "refunded" => StatusKey::RefundedOther,
        "cancelled" | "rejected" => StatusKey::CancelledOrRejected,
        _ => StatusKey::Unhandled,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    EmitSale,
    EmitFullReversal,
    EmitProportionalReversal,
    Skip(&'static str),
    /// Status not yet in a terminal/actionable state (`pending`,
    /// `in_process`, ...): leave the payment as-is for the next sync pass.
    Defer,
}

fn action_for(key: StatusKey) -> Action {
    match key {
        StatusKey::Approved | StatusKey::InMediation | StatusKey::ChargedBackReimbursed => Action::EmitSale,
        StatusKey::ChargedBackOther | StatusKey::RefundedOther | StatusKey::RefundedByAdminPostSync => Action::EmitFullReversal,
        StatusKey::RefundedPartial => Action::EmitProportionalReversal,
        StatusKey::RefundedByAdminPreSync => Action::Skip("kit_split_pre_sync"),
        StatusKey::CancelledOrRejected => Action::Skip("cancelled_or_rejected"),
        StatusKey::Unhandled => Action::Defer,
    }
}

fn job(
    seller: &str,
    payment_id: &str,
    suffix: &str,
    endpoint: &str,
    priority: i32,
    payload: serde_json::Value,
    now: DateTime<Utc>,
) -> EnqueueJobRequest {
    EnqueueJobRequest {
        idempotency_key: format!("{seller}:{payment_id}:{suffix}"),
        seller: seller.to_string(),
        group_id: payment_id.to_string(),
        kind: suffix.to_string(),
        endpoint: endpoint.to_string(),
        method: "POST".to_string(),
        payload,
        priority,
        scheduled_for: now,
    }
}

fn event_payload(title: &str, amount: Decimal, due_date: Option<NaiveDate>) -> serde_json::Value {
    serde_json::json!({
        "title": title,
        "amount": amount.to_string(),
        "due_date": due_date.map(|d| d.to_string()),
    })
}

const RECEIVABLE_ENDPOINT: &str = "/v1/financeiro/eventos-financeiros/contas-a-receber";
const PAYABLE_ENDPOINT: &str = "/v1/financeiro/eventos-financeiros/contas-a-pagar";

/// Emits the as-if-approved sale jobs (receivable, commission, shipping,
/// optional subsidy) and returns the extracted fees so the caller can
/// persist them on the payment row.
#[allow(clippy::too_many_arguments)]
fn sale_jobs(
    seller: &str,
    raw: &RawMlPayment,
    order_id: &str,
    order_title: &str,
    now: DateTime<Utc>,
) -> (Vec<EnqueueJobRequest>, Decimal, Decimal) {
    let commission = extract_commission(&raw.charges_details);
    let shipping_seller = extract_shipping_seller(&raw.charges_details, raw.shipping_amount);
    let calculated = net_calculated(raw.amount, commission, shipping_seller);
    let due_date = raw.money_release_date;

    let mut jobs = Vec::new();
    let title = installment_description(&format!("Venda ML #{order_id} - {order_title}"), &raw.id);
    jobs.push(job(seller, &raw.id, "receita", RECEIVABLE_ENDPOINT, priority::RECEITA, event_payload(&title, raw.amount, due_date), now));

    if commission > Decimal::ZERO {
        let title = installment_description(&format!("Comissao ML #{}", raw.id), &raw.id);
        jobs.push(job(seller, &raw.id, "comissao", PAYABLE_ENDPOINT, priority::DESPESA, event_payload(&title, commission, due_date), now));
    }
    if shipping_seller > Decimal::ZERO {
        let title = installment_description(&format!("Frete vendedor ML #{}", raw.id), &raw.id);
        jobs.push(job(seller, &raw.id, "frete", PAYABLE_ENDPOINT, priority::DESPESA, event_payload(&title, shipping_seller, due_date), now));
    }
    if let Some(subsidy_amount) = subsidy(raw.net_received_amount, calculated) {
        let title = installment_description(&format!("Subsidio ML #{}", raw.id), &raw.id);
        jobs.push(job(seller, &raw.id, "subsidio", RECEIVABLE_ENDPOINT, priority::RECEITA, event_payload(&title, subsidy_amount, due_date), now));
    }
    (jobs, commission, shipping_seller)
}

/// Full reversal: the sale (or its fees, if already booked) is undone in
/// one shot. `commission` is the fee amount to reverse — either the
/// previously stored `processor_fee` or the one just computed if this
/// refund is arriving on a payment we've never observed before.
fn full_reversal_jobs(seller: &str, raw: &RawMlPayment, commission: Decimal, now: DateTime<Utc>) -> Vec<EnqueueJobRequest> {
    let amount = reversal_amount(raw.amount, raw.transaction_amount_refunded);
    let title = installment_description(&format!("Estorno ML #{}", raw.id), &raw.id);
    let mut jobs = vec![job(seller, &raw.id, "estorno", PAYABLE_ENDPOINT, priority::DESPESA, event_payload(&title, amount, raw.money_release_date), now)];
    if commission > Decimal::ZERO {
        let fee_title = installment_description(&format!("Estorno comissao ML #{}", raw.id), &raw.id);
        jobs.push(job(seller, &raw.id, "estorno_taxa", PAYABLE_ENDPOINT, priority::DESPESA, event_payload(&fee_title, commission, raw.money_release_date), now));
    }
    jobs
}

/// Proportional reversal for a `partially_refunded` payment. ML reports one
/// partial refund at a time; this crate does not track a running count of
/// prior partials on the same payment, so every call emits index 1 — a
/// second distinct partial on the same payment would need that count
/// threaded in from the caller's stored history.
fn partial_reversal_jobs(seller: &str, raw: &RawMlPayment, now: DateTime<Utc>) -> Vec<EnqueueJobRequest> {
    let amount = raw.transaction_amount_refunded.unwrap_or(Decimal::ZERO);
    let title = installment_description(&format!("Estorno parcial ML #{}", raw.id), &raw.id);
    vec![job(seller, &raw.id, "partial_refund_1", PAYABLE_ENDPOINT, priority::DESPESA, event_payload(&title, amount, raw.money_release_date), now)]
}

/// Runs the full payment classification pipeline end to end: skip policy,
/// state-machine action, fee extraction and the CA enqueue protocol. Caller
/// contract: only call
/// this for payments that carry an `order_id` — non-order payments route to
/// the Expense Classifier instead.
#[must_use]
pub fn classify_payment(seller: &str, raw: &RawMlPayment, existing: Option<&Payment>, order_title: &str, now: DateTime<Utc>) -> ClassificationResult {
    let Some(order_id) = raw.order_id.as_deref() else {
        return ClassificationResult {
            processing_status: ProcessingStatus::SkippedNonSale,
            skip_reason: Some("no_order_id".to_string()),
            ..ClassificationResult::default()
        };
    };

    if raw.description.as_deref() == Some("marketplace_shipment") {
        return skip(ProcessingStatus::SkippedNonSale, "marketplace_shipment");
    }
    if raw.collector_id.is_some() {
        return skip(ProcessingStatus::SkippedNonSale, "seller_is_buyer");
    }
    if matches!(raw.operation_type.as_deref(), Some("partition_transfer") | Some("payment_addition")) {
        return skip(ProcessingStatus::SkippedNonSale, "internal_mp_movement");
    }

    let existing_is_synced = existing.is_some_and(|payment| payment.processing_status == ProcessingStatus::Synced);
    let key = status_key(raw, existing_is_synced);
    let action = action_for(key);

    match action {
        Action::Skip(reason) => skip(ProcessingStatus::SkippedNonSale, reason),
        Action::Defer => ClassificationResult { processing_status: ProcessingStatus::Pending, ..ClassificationResult::default() },
        Action::EmitSale => {
            let (jobs, commission, shipping_seller) = sale_jobs(seller, raw, order_id, order_title, now);
            ClassificationResult {
                processing_status: ProcessingStatus::Queued,
                skip_reason: None,
                processor_fee: Some(commission),
                processor_shipping: Some(shipping_seller),
                jobs,
            }
        }
        Action::EmitFullReversal | Action::EmitProportionalReversal => {
            let refund_arrives_presync = existing.is_none();
            let mut jobs = Vec::new();
            let mut commission = existing.and_then(|payment| payment.processor_fee).unwrap_or(Decimal::ZERO);
            let mut shipping_seller = existing.and_then(|payment| payment.processor_shipping);

            if refund_arrives_presync {
                let (sale, sale_commission, sale_shipping) = sale_jobs(seller, raw, order_id, order_title, now);
                jobs.extend(sale);
                commission = sale_commission;
                shipping_seller = Some(sale_shipping);
            }

            jobs.extend(match action {
                Action::EmitFullReversal => full_reversal_jobs(seller, raw, commission, now),
                _ => partial_reversal_jobs(seller, raw, now),
            });

            ClassificationResult {
                processing_status: ProcessingStatus::Queued,
                skip_reason: None,
                processor_fee: Some(commission),
                processor_shipping: shipping_seller,
                jobs,
            }
        }
    }
}

fn skip(processing_status: ProcessingStatus, reason: &'static str) -> ClassificationResult {
    ClassificationResult { processing_status, skip_reason: Some(reason.to_string()), ..ClassificationResult::default() }
}
