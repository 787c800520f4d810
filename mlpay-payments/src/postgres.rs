use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::Payment;
use crate::PaymentStore;
use crate::PaymentsError;
use crate::PaymentsResult;
use crate::ProcessingStatus;
use crate::RawMlPayment;

/// Postgres-backed persistence stub, gated behind the `postgres-store`
/// feature the same way `codex-policy`'s durable store is stubbed: the
/// upsert-on-natural-key contract [`PaymentStore::upsert_observed`] requires
/// is drafted in schema form below but not yet wired to a live connection,
/// so every call reports [`PaymentsError::Storage`] rather than silently
/// behaving like the in-memory reference implementation.
///
/// # Schema Draft
/// ```sql
/// CREATE TABLE mp_payments (
///     seller TEXT NOT NULL,
///     ml_payment_id TEXT NOT NULL,
///     ml_status TEXT NOT NULL,
///     status_detail TEXT,
///     amount NUMERIC(18, 2) NOT NULL,
///     net_received_amount NUMERIC(18, 2) NOT NULL,
///     money_release_date DATE,
///     ml_order_id TEXT,
///     processing_status TEXT NOT NULL,
///     group_id TEXT NOT NULL,
///     processor_fee NUMERIC(18, 2),
///     processor_shipping NUMERIC(18, 2),
///     error TEXT,
///     ca_protocol TEXT,
///     raw_payload JSONB NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (seller, ml_payment_id)
/// );
/// ```
///
/// TODO: wire `sqlx::PgPool` and an `ON CONFLICT (seller, ml_payment_id)
/// DO UPDATE ... RETURNING` upsert matching [`InMemoryPaymentStore`]'s
/// unchanged-payload short circuit.
pub struct PostgresPaymentStore {
    connection_string: String,
}

impl PostgresPaymentStore {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self { connection_string: connection_string.into() }
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn upsert_observed(&self, seller: &str, raw: RawMlPayment) -> PaymentsResult<Payment> {
        let _ = (&self.connection_string, seller, raw);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn get(&self, seller: &str, ml_payment_id: &str) -> PaymentsResult<Option<Payment>> {
        let _ = (&self.connection_string, seller, ml_payment_id);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn list_by_seller(&self, seller: &str) -> PaymentsResult<Vec<Payment>> {
        let _ = (&self.connection_string, seller);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn set_fees(
        &self,
        seller: &str,
        ml_payment_id: &str,
        processor_fee: Decimal,
        processor_shipping: Decimal,
    ) -> PaymentsResult<Payment> {
        let _ = (&self.connection_string, seller, ml_payment_id, processor_fee, processor_shipping);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn transition(&self, seller: &str, ml_payment_id: &str, status: ProcessingStatus) -> PaymentsResult<Payment> {
        let _ = (&self.connection_string, seller, ml_payment_id, status);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn set_error(&self, seller: &str, ml_payment_id: &str, error: String) -> PaymentsResult<Payment> {
        let _ = (&self.connection_string, seller, ml_payment_id, error);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn set_ca_protocol(&self, seller: &str, ml_payment_id: &str, protocol: String) -> PaymentsResult<Payment> {
        let _ = (&self.connection_string, seller, ml_payment_id, protocol);
        Err(PaymentsError::Storage("postgres store persistence not yet implemented".into()))
    }
}
