#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Display;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod in_memory;

pub use crate::in_memory::InMemorySellerDirectory;

pub type SellerId = String;
pub type FirmId = String;

pub type SellerResult<T> = Result<T, SellerError>;

#[derive(Debug, Error)]
pub enum SellerError {
    #[error("seller not found: {0}")]
    NotFound(String),
    #[error("firm not found: {0}")]
    FirmNotFound(String),
    #[error("seller already exists: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// A grouping of sellers managed by one accounting operation. Optional — most
/// installations register sellers directly without a firm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firm {
    pub id: FirmId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFirmRequest {
    pub name: String,
}

impl CreateFirmRequest {
    pub fn normalize(mut self) -> SellerResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(SellerError::Validation("firm name cannot be empty".into()));
        }
        Ok(self)
    }
}

/// Caller role, gating which operator-surface commands may be invoked.
/// Orthogonal to the seller's own integration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Operator,
    Accountant,
    Auditor,
    ServiceAccount,
}

impl Role {
    #[must_use]
    pub fn can_mutate(self) -> bool {
        matches!(self, Role::Operator | Role::Accountant | Role::ServiceAccount)
    }

    #[must_use]
    pub fn read_only(self) -> bool {
        matches!(self, Role::Auditor)
    }
}

/// Per-seller Mercado Livre OAuth tokens. The browser-facing authorization-code
/// exchange is an external collaborator; this crate only stores the
/// resulting token pair and its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Per-seller Conta Azul identifiers needed to address the CA API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaIdentifiers {
    pub bank_account_id: Option<String>,
    pub cost_centre_id: Option<String>,
    pub ml_contact_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationMode {
    DashboardOnly,
    DashboardCa,
}

impl Display for IntegrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrationMode::DashboardOnly => write!(f, "dashboard_only"),
            IntegrationMode::DashboardCa => write!(f, "dashboard_ca"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillProgress {
    pub total: u64,
    pub processed: u64,
    pub orders_processed: u64,
    pub expenses_classified: u64,
    pub skipped: u64,
    pub errors: u64,
    pub baixas_created: u64,
    pub last_payment_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillProgressDelta {
    pub processed: u64,
    pub orders_processed: u64,
    pub expenses_classified: u64,
    pub skipped: u64,
    pub errors: u64,
    pub baixas_created: u64,
    pub last_payment_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Seller {
    pub slug: SellerId,
    pub firm_id: Option<FirmId>,
    pub ml_tokens: Option<MlTokens>,
    pub ca: CaIdentifiers,
    pub integration_mode: IntegrationMode,
    pub ca_start_date: Option<NaiveDate>,
    pub backfill_status: Option<BackfillStatus>,
    pub backfill_started_at: Option<DateTime<Utc>>,
    pub backfill_completed_at: Option<DateTime<Utc>>,
    pub backfill_progress: BackfillProgress,
    pub created_at: DateTime<Utc>,
}

impl Seller {
    #[must_use]
    pub fn is_ca_enabled(&self) -> bool {
        matches!(self.integration_mode, IntegrationMode::DashboardCa)
    }
}

#[derive(Debug, Clone)]
pub struct RegisterSellerRequest {
    pub slug: SellerId,
    pub firm_id: Option<FirmId>,
    pub integration_mode: IntegrationMode,
}

impl RegisterSellerRequest {
    pub fn normalize(mut self) -> SellerResult<Self> {
        self.slug = self.slug.trim().to_string();
        if self.slug.is_empty() {
            return Err(SellerError::Validation("slug cannot be empty".into()));
        }
        Ok(self)
    }
}

/// Returns `true` when `date` is the first day of its month — the sole
/// validity rule for `ca_start_date`.
#[must_use]
pub fn is_first_of_month(date: NaiveDate) -> bool {
    date.format("%d").to_string() == "01"
}

#[async_trait]
pub trait SellerDirectory: Send + Sync {
    async fn create_firm(&self, request: CreateFirmRequest) -> SellerResult<Firm>;
    async fn get_firm(&self, firm_id: &FirmId) -> SellerResult<Firm>;

    /// Upsert-keyed by `slug` (invariant: duplicate registration is idempotent).
    async fn register(&self, request: RegisterSellerRequest) -> SellerResult<Seller>;
    async fn get(&self, slug: &SellerId) -> SellerResult<Seller>;
    async fn list(&self, firm_id: Option<&FirmId>) -> SellerResult<Vec<Seller>>;

    async fn update_tokens(&self, slug: &SellerId, tokens: MlTokens) -> SellerResult<Seller>;
    async fn update_ca_identifiers(
        &self,
        slug: &SellerId,
        identifiers: CaIdentifiers,
    ) -> SellerResult<Seller>;
    async fn set_integration_mode(
        &self,
        slug: &SellerId,
        mode: IntegrationMode,
    ) -> SellerResult<Seller>;

    /// Validates `ca_start_date` is the first of a month, then moves the
    /// seller's backfill status to `Running`.
    async fn start_backfill(&self, slug: &SellerId, ca_start_date: NaiveDate)
    -> SellerResult<Seller>;
    async fn tick_backfill_progress(
        &self,
        slug: &SellerId,
        delta: BackfillProgressDelta,
    ) -> SellerResult<Seller>;
    async fn complete_backfill(&self, slug: &SellerId) -> SellerResult<Seller>;
    async fn fail_backfill(&self, slug: &SellerId, reason: &str) -> SellerResult<Seller>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_of_month_detection() {
        assert!(is_first_of_month(
            NaiveDate::from_ymd_opt(2026, 2, 1).expect("date")
        ));
        assert!(!is_first_of_month(
            NaiveDate::from_ymd_opt(2026, 2, 2).expect("date")
        ));
    }

    #[test]
    fn register_request_normalizes_slug() {
        let request = RegisterSellerRequest {
            slug: "  acme-shop  ".into(),
            firm_id: None,
            integration_mode: IntegrationMode::DashboardOnly,
        }
        .normalize()
        .expect("should normalize");
        assert_eq!(request.slug, "acme-shop");
    }

    #[test]
    fn integration_mode_display() {
        assert_eq!(IntegrationMode::DashboardOnly.to_string(), "dashboard_only");
        assert_eq!(IntegrationMode::DashboardCa.to_string(), "dashboard_ca");
    }
}
