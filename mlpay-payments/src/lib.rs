#![deny(clippy::print_stdout, clippy::print_stderr)]

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod in_memory;
#[cfg(feature = "postgres-store")]
mod postgres;

pub use crate::in_memory::InMemoryPaymentStore;
#[cfg(feature = "postgres-store")]
pub use crate::postgres::PostgresPaymentStore;

pub type PaymentsResult<T> = Result<T, PaymentsError>;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("payment not found: {seller}/{ml_payment_id}")]
    NotFound { seller: String, ml_payment_id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// One `charges_details` entry as returned by the ML payment detail endpoint.
/// `charge_type` is `"fee"` or `"shipping"`; `name` distinguishes sub-kinds of
/// fee such as `"financing_fee"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeDetail {
    pub charge_type: String,
    pub name: Option<String>,
    pub account_from: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// The payer block carried verbatim on the raw payload, cached for audits
/// and re-checks — not interpreted by the classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payer {
    pub id: Option<String>,
    pub email: Option<String>,
}

/// The ML payment shape consumed by the classifier. Fields beyond what the
/// classifier reads (`payment_method_id`, `payment_type_id`, `installments`,
/// `authorization_code`, `payer`) are carried for audit/re-check purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMlPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub status_detail: Option<String>,
    pub description: Option<String>,
    pub collector_id: Option<String>,
    pub operation_type: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_received_amount: Decimal,
    pub transaction_amount_refunded: Option<Decimal>,
    pub charges_details: Vec<ChargeDetail>,
    #[serde(with = "rust_decimal::serde::str")]
    pub shipping_amount: Decimal,
    pub money_release_date: Option<NaiveDate>,
    pub money_release_status: Option<String>,
    pub date_approved: Option<DateTime<Utc>>,
    pub date_last_updated: Option<DateTime<Utc>>,
    pub payment_method_id: Option<String>,
    pub payment_type_id: Option<String>,
    pub installments: Option<u32>,
    pub authorization_code: Option<String>,
    pub payer: Payer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Queued,
    Synced,
    Refunded,
    Skipped,
    SkippedNonSale,
}

/// One row per observed ML payment, keyed by `(seller, ml_payment_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub seller: String,
    pub ml_payment_id: String,
    pub ml_status: String,
    pub status_detail: Option<String>,
    pub amount: Decimal,
    pub net_received_amount: Decimal,
    pub money_release_date: Option<NaiveDate>,
    pub ml_order_id: Option<String>,
    pub processing_status: ProcessingStatus,
    pub group_id: String,
    pub processor_fee: Option<Decimal>,
    pub processor_shipping: Option<Decimal>,
    pub error: Option<String>,
    pub ca_protocol: Option<String>,
    pub raw_payload: RawMlPayment,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    fn from_raw(seller: &str, raw: RawMlPayment, now: DateTime<Utc>) -> Self {
        Self {
            seller: seller.to_string(),
            ml_payment_id: raw.id.clone(),
            ml_status: raw.status.clone(),
            status_detail: raw.status_detail.clone(),
            amount: raw.amount,
            net_received_amount: raw.net_received_amount,
            money_release_date: raw.money_release_date,
            ml_order_id: raw.order_id.clone(),
            processing_status: ProcessingStatus::Pending,
            group_id: raw.id.clone(),
            processor_fee: None,
            processor_shipping: None,
            error: None,
            ca_protocol: None,
            raw_payload: raw,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.processing_status,
            ProcessingStatus::Synced | ProcessingStatus::Skipped | ProcessingStatus::SkippedNonSale
        )
    }
}

/// Commission is the sum of `charges_details` fee entries booked against the
/// collector, excluding `financing_fee` — a net-neutral pass-through never
/// booked as an expense.
#[must_use]
pub fn extract_commission(charges: &[ChargeDetail]) -> Decimal {
    charges
        .iter()
        .filter(|c| c.charge_type == "fee" && c.account_from == "collector")
        .filter(|c| c.name.as_deref() != Some("financing_fee"))
        .map(|c| c.amount)
        .sum()
}

/// Seller-side shipping cost: collector-side shipping charges minus the
/// buyer-paid portion, floored at zero.
#[must_use]
pub fn extract_shipping_seller(charges: &[ChargeDetail], shipping_amount: Decimal) -> Decimal {
    let collector_shipping: Decimal = charges
        .iter()
        .filter(|c| c.charge_type == "shipping" && c.account_from == "collector")
        .map(|c| c.amount)
        .sum();
    (collector_shipping - shipping_amount).max(Decimal::ZERO)
}

#[must_use]
pub fn net_calculated(amount: Decimal, commission: Decimal, shipping_seller: Decimal) -> Decimal {
    amount - commission - shipping_seller
}

/// Returns `Some(subsidy)` when ML released more than the classifier's
/// calculated net — an ML subsidy receivable. Returns `None` (a non-positive
/// value is never booked) when there is no discrepancy to book.
#[must_use]
pub fn subsidy(net_received_amount: Decimal, net_calculated: Decimal) -> Option<Decimal> {
    let diff = net_received_amount - net_calculated;
    if diff > Decimal::ZERO { Some(diff) } else { None }
}

/// `min(transaction_amount_refunded or amount, amount)` — the fallback that
/// prevents zero-value reversals on chargebacks that carry `refunded=0`.
#[must_use]
pub fn reversal_amount(amount: Decimal, transaction_amount_refunded: Option<Decimal>) -> Decimal {
    let candidate = transaction_amount_refunded.unwrap_or(amount);
    candidate.min(amount)
}

#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    /// Upsert-keyed by `(seller, ml_payment_id)`: creates the row on first
    /// observation; on a re-observation with an unchanged payload, the
    /// resulting row is byte-identical to before.
    async fn upsert_observed(&self, seller: &str, raw: RawMlPayment) -> PaymentsResult<Payment>;
    async fn get(&self, seller: &str, ml_payment_id: &str) -> PaymentsResult<Option<Payment>>;
    async fn list_by_seller(&self, seller: &str) -> PaymentsResult<Vec<Payment>>;
    async fn set_fees(
        &self,
        seller: &str,
        ml_payment_id: &str,
        processor_fee: Decimal,
        processor_shipping: Decimal,
    ) -> PaymentsResult<Payment>;
    async fn transition(
        &self,
        seller: &str,
        ml_payment_id: &str,
        status: ProcessingStatus,
    ) -> PaymentsResult<Payment>;
    async fn set_error(
        &self,
        seller: &str,
        ml_payment_id: &str,
        error: String,
    ) -> PaymentsResult<Payment>;
    async fn set_ca_protocol(
        &self,
        seller: &str,
        ml_payment_id: &str,
        protocol: String,
    ) -> PaymentsResult<Payment>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn charge(charge_type: &str, name: Option<&str>, account_from: &str, amount: Decimal) -> ChargeDetail {
        ChargeDetail {
            charge_type: charge_type.to_string(),
            name: name.map(str::to_string),
            account_from: account_from.to_string(),
            amount,
        }
    }

    #[test]
    fn commission_excludes_financing_fee() {
        let charges = vec![
            charge("fee", None, "collector", dec!(12.00)),
            charge("fee", Some("financing_fee"), "collector", dec!(3.00)),
        ];
        assert_eq!(extract_commission(&charges), dec!(12.00));
    }

    #[test]
    fn shipping_seller_floors_at_zero() {
        let charges = vec![charge("shipping", None, "collector", dec!(10.00))];
        assert_eq!(extract_shipping_seller(&charges, dec!(10.00)), dec!(0));
        assert_eq!(extract_shipping_seller(&charges, dec!(4.00)), dec!(6.00));
    }

    #[test]
    fn scenario_one_subsidy_is_seven() {
        let charges = vec![
            charge("fee", None, "collector", dec!(12.00)),
            charge("shipping", None, "collector", dec!(5.00)),
        ];
        let commission = extract_commission(&charges);
        let shipping_seller = extract_shipping_seller(&charges, dec!(0));
        let calculated = net_calculated(dec!(100.00), commission, shipping_seller);
        assert_eq!(calculated, dec!(83.00));
        assert_eq!(subsidy(dec!(90.00), calculated), Some(dec!(7.00)));
    }

    #[test]
    fn reversal_amount_falls_back_when_refunded_is_zero() {
        assert_eq!(reversal_amount(dec!(200.00), Some(Decimal::ZERO)), dec!(200.00));
        assert_eq!(reversal_amount(dec!(200.00), None), dec!(200.00));
        assert_eq!(reversal_amount(dec!(100.00), Some(dec!(30.00))), dec!(30.00));
    }
}
