#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod in_memory;
#[cfg(feature = "postgres-store")]
mod postgres;

pub use crate::in_memory::InMemoryExpenseStore;
#[cfg(feature = "postgres-store")]
pub use crate::postgres::PostgresExpenseStore;

pub type ExpenseResult<T> = Result<T, ExpenseError>;

#[derive(Debug, Error)]
pub enum ExpenseError {
    #[error("expense not found: seller={0} payment_id={1}")]
    NotFound(String, String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Classified categories for non-order payments and uncovered statement
/// lines: the ones named by the Expense Classifier's decision table plus
/// the statement-only categories the Extrato Ingester assigns to record
/// types the classifier never sees directly (chargeback disputes, DIFAL,
/// retained money, ML invoices). New vendor-driven categories extend
/// [`mlpay_policy::OperationalPolicy`]'s rule table rather than this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseType {
    SavingsPot,
    Cashback,
    TransferIntra,
    TransferPix,
    Darf,
    BillPayment,
    Subscription,
    Collection,
    Deposit,
    ChargebackDispute,
    Difal,
    MlInvoice,
    RetainedMoney,
    LegacyAdjustment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseDirection {
    Expense,
    Income,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseSource {
    PaymentsApi,
    Extrato,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    PendingReview,
    AutoCategorized,
    ManuallyCategorized,
    Exported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub seller: String,
    /// Numeric ML id for `payments_api` rows, or `"<statement_row_id>:<record_type>"`
    /// for `extrato` rows — the composite format is a public contract.
    pub payment_id: String,
    pub expense_type: ExpenseType,
    pub direction: ExpenseDirection,
    pub ca_category: Option<String>,
    pub auto_categorized: bool,
    pub amount: Decimal,
    pub description: String,
    pub source: ExpenseSource,
    pub status: ExpenseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The facts the Expense Classifier's decision table matches against; a
/// subset of [`mlpay_payments::RawMlPayment`] plus a lower-cased vendor key
/// already extracted from the description for the SaaS-vendor lookup.
#[derive(Debug, Clone)]
pub struct ExpenseClassificationInput<'a> {
    pub operation_type: &'a str,
    pub description: &'a str,
    pub is_savings_pot_account: bool,
    pub febraban_code: Option<&'a str>,
    pub is_virtual_payment: bool,
    pub is_collection: bool,
    pub vendor_key: Option<&'a str>,
}

pub const DARF_FEBRABAN_PREFIX: &str = "08";

/// Outcome of one row through the decision table: either a category to book,
/// or a deliberate skip (kit-split-style internal movements the engine never
/// represents as an expense).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Classify {
        expense_type: ExpenseType,
        direction: ExpenseDirection,
        auto_categorized: bool,
        ca_category: Option<String>,
    },
    Skip,
}

/// Ordered decision table: the first few rules (transfers, bill payments,
/// collections) are fixed structural cases keyed on `operation_type`, but the
/// SaaS-subscription rule is a lookup against `vendor_categories` — a table
/// an operator extends (via [`mlpay_policy::OperationalPolicy::vendor_ca_categories`])
/// without touching this function. A vendor-key hit always wins over the
/// `is_virtual_payment` flag, since a known vendor's CA category is strictly
/// more useful than an uncategorized subscription guess.
#[must_use]
pub fn classify_expense(input: &ExpenseClassificationInput<'_>, vendor_categories: &HashMap<String, String>) -> ClassificationOutcome {
    let description_lower = input.description.to_lowercase();

    if input.operation_type == "partition_transfer" {
        return if input.is_savings_pot_account {
            ClassificationOutcome::Classify {
                expense_type: ExpenseType::SavingsPot,
                direction: ExpenseDirection::Transfer,
                auto_categorized: false,
                ca_category: None,
            }
        } else {
            ClassificationOutcome::Skip
        };
    }

    if input.operation_type == "payment_addition" {
        return ClassificationOutcome::Skip;
    }

    if input.operation_type == "money_transfer" {
        if description_lower.contains("cashback") {
            return ClassificationOutcome::Classify {
                expense_type: ExpenseType::Cashback,
                direction: ExpenseDirection::Income,
                auto_categorized: true,
                ca_category: None,
            };
        }
        if description_lower.contains("pix") {
            return ClassificationOutcome::Classify {
                expense_type: ExpenseType::TransferPix,
                direction: ExpenseDirection::Transfer,
                auto_categorized: false,
                ca_category: None,
            };
        }
        return ClassificationOutcome::Classify {
            expense_type: ExpenseType::TransferIntra,
            direction: ExpenseDirection::Transfer,
            auto_categorized: false,
            ca_category: None,
        };
    }

    if input.operation_type == "bill_payment" {
        let is_darf = input.febraban_code.is_some_and(|code| code.starts_with(DARF_FEBRABAN_PREFIX));
        return if is_darf {
            ClassificationOutcome::Classify {
                expense_type: ExpenseType::Darf,
                direction: ExpenseDirection::Expense,
                auto_categorized: true,
                ca_category: None,
            }
        } else {
            ClassificationOutcome::Classify {
                expense_type: ExpenseType::BillPayment,
                direction: ExpenseDirection::Expense,
                auto_categorized: false,
                ca_category: None,
            }
        };
    }

    if let Some(vendor_key) = input.vendor_key
        && let Some(ca_category) = vendor_categories.get(vendor_key)
    {
        return ClassificationOutcome::Classify {
            expense_type: ExpenseType::Subscription,
            direction: ExpenseDirection::Expense,
            auto_categorized: true,
            ca_category: Some(ca_category.clone()),
        };
    }

    if input.is_virtual_payment {
        return ClassificationOutcome::Classify {
            expense_type: ExpenseType::Subscription,
            direction: ExpenseDirection::Expense,
            auto_categorized: true,
            ca_category: None,
        };
    }

    if input.is_collection {
        return ClassificationOutcome::Classify {
            expense_type: ExpenseType::Collection,
            direction: ExpenseDirection::Expense,
            auto_categorized: true,
            ca_category: None,
        };
    }

    if input.operation_type == "pix_in" {
        return ClassificationOutcome::Classify {
            expense_type: ExpenseType::Deposit,
            direction: ExpenseDirection::Transfer,
            auto_categorized: false,
            ca_category: None,
        };
    }

    ClassificationOutcome::Classify {
        expense_type: ExpenseType::Other,
        direction: ExpenseDirection::Expense,
        auto_categorized: false,
        ca_category: None,
    }
}

#[async_trait]
pub trait ExpenseStore: Send + Sync {
    /// Upsert keyed by `(seller, payment_id)`; an existing row's classification
    /// is left untouched, matching the payments-table idempotency contract.
    async fn upsert(&self, expense: Expense) -> ExpenseResult<Expense>;
    async fn get(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense>;
    async fn list_pending_review(&self, seller: &str) -> ExpenseResult<Vec<Expense>>;
    async fn mark_exported(&self, seller: &str, payment_id: &str) -> ExpenseResult<Expense>;
}
