#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::NaiveDate;
use mlpay_expenses::Expense;
use mlpay_extrato::NormalizedStatementLine;
use mlpay_extrato::is_legacy_record_type;
use mlpay_payments::Payment;
use mlpay_payments::ProcessingStatus;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type CoverageResult<T> = Result<T, CoverageError>;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("day {0} is not closeable: {1} uncovered statement line(s)")]
    Uncovered(NaiveDate, usize),
    #[error("storage error: {0}")]
    Storage(String),
}

/// How one statement line was explained by the coverage partition.
/// `Uncovered` must be empty for a window to be closeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    CoveredByPayments,
    CoveredByMpExpenses,
    CoveredByLegacy,
    Uncovered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementLineCoverage {
    pub line: NormalizedStatementLine,
    pub status: CoverageStatus,
}

/// The result of partitioning every statement line in a `[begin, end]` window.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    pub begin: NaiveDate,
    pub end: NaiveDate,
    pub lines: Vec<StatementLineCoverage>,
}

impl CoverageReport {
    #[must_use]
    pub fn count(&self, status: CoverageStatus) -> usize {
        self.lines.iter().filter(|l| l.status == status).count()
    }

    #[must_use]
    pub fn uncovered(&self) -> Vec<&StatementLineCoverage> {
        self.lines.iter().filter(|l| l.status == CoverageStatus::Uncovered).collect()
    }

    /// The daily close is refused while any line in the window is uncovered.
    #[must_use]
    pub fn is_closeable(&self) -> bool {
        self.uncovered().is_empty()
    }
}

/// The statement-native id a payments/expenses row would carry for this line:
/// the external reference when present, else the statement's own row id.
#[must_use]
fn candidate_payment_id(line: &NormalizedStatementLine) -> &str {
    line.reference.as_deref().unwrap_or(line.row_id.as_str())
}

fn is_covering_processing_status(status: ProcessingStatus) -> bool {
    matches!(status, ProcessingStatus::Synced | ProcessingStatus::Queued | ProcessingStatus::SkippedNonSale)
}

/// Partitions statement lines: payments first (a line whose
/// candidate id matches a `synced`/`queued`/`skipped_non_sale` payments row),
/// then legacy markers, then `mp_expenses` rows (matched on either the
/// composite extrato id or the plain candidate id, since `mp_expenses` holds
/// both API- and extrato-sourced rows), and anything left over is uncovered.
#[must_use]
pub fn check_coverage(
    begin: NaiveDate,
    end: NaiveDate,
    statement_lines: &[NormalizedStatementLine],
    payments: &[Payment],
    expenses: &[Expense],
) -> CoverageReport {
    let lines = statement_lines
        .iter()
        .filter(|line| line.posted_date >= begin && line.posted_date <= end)
        .map(|line| {
            let candidate_id = candidate_payment_id(line);
            let status = if payments
                .iter()
                .any(|payment| payment.ml_payment_id == candidate_id && is_covering_processing_status(payment.processing_status))
            {
                CoverageStatus::CoveredByPayments
            } else if is_legacy_record_type(&line.record_type) {
                CoverageStatus::CoveredByLegacy
            } else if expenses
                .iter()
                .any(|expense| expense.payment_id == line.composite_payment_id() || expense.payment_id == candidate_id)
            {
                CoverageStatus::CoveredByMpExpenses
            } else {
                CoverageStatus::Uncovered
            };
            StatementLineCoverage { line: line.clone(), status }
        })
        .collect();
    CoverageReport { begin, end, lines }
}

fn is_cash_settled(payment: &Payment) -> bool {
    matches!(payment.ml_status.as_str(), "approved" | "refunded")
}

/// Daily cash identity: `statement_total(day)` must equal the sum of
/// net-API amounts for sales released that day plus legacy adjustments booked
/// that day. This, not monthly per-`payment_id` reconciliation, is the
/// fechamento criterion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCashIdentity {
    pub day: NaiveDate,
    pub statement_total: Decimal,
    pub computed_total: Decimal,
}

impl DailyCashIdentity {
    #[must_use]
    pub fn difference(&self) -> Decimal {
        self.statement_total - self.computed_total
    }

    #[must_use]
    pub fn matches(&self) -> bool {
        self.difference() == Decimal::ZERO
    }
}

#[must_use]
pub fn daily_cash_identity(day: NaiveDate, statement_lines: &[NormalizedStatementLine], payments: &[Payment]) -> DailyCashIdentity {
    let statement_total: Decimal = statement_lines.iter().filter(|line| line.posted_date == day).map(|line| line.amount).sum();

    let net_api: Decimal = payments
        .iter()
        .filter(|payment| payment.money_release_date == Some(day) && is_cash_settled(payment))
        .map(|payment| payment.net_received_amount)
        .sum();

    let legacy_adjustments: Decimal = statement_lines
        .iter()
        .filter(|line| line.posted_date == day && is_legacy_record_type(&line.record_type))
        .map(|line| line.amount)
        .sum();

    DailyCashIdentity { day, statement_total, computed_total: net_api + legacy_adjustments }
}

/// Records which `(seller, day)` pairs have been closed, refusing to close a
/// day whose coverage report still has uncovered lines.
pub trait DailyCloseGate: Send + Sync {
    fn close(&self, seller: &str, day: NaiveDate, report: &CoverageReport) -> CoverageResult<()>;
    fn is_closed(&self, seller: &str, day: NaiveDate) -> CoverageResult<bool>;
}

#[derive(Default)]
pub struct InMemoryDailyCloseGate {
    closed_days: RwLock<HashMap<(String, NaiveDate), ()>>,
}

impl InMemoryDailyCloseGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DailyCloseGate for InMemoryDailyCloseGate {
    fn close(&self, seller: &str, day: NaiveDate, report: &CoverageReport) -> CoverageResult<()> {
        if !report.is_closeable() {
            return Err(CoverageError::Uncovered(day, report.uncovered().len()));
        }
        let mut guard = self.closed_days.write().map_err(|_| CoverageError::Storage("close gate poisoned".into()))?;
        guard.insert((seller.to_string(), day), ());
        Ok(())
    }

    fn is_closed(&self, seller: &str, day: NaiveDate) -> CoverageResult<bool> {
        let guard = self.closed_days.read().map_err(|_| CoverageError::Storage("close gate poisoned".into()))?;
        Ok(guard.contains_key(&(seller.to_string(), day)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use chrono::Utc;
    use mlpay_expenses::ExpenseDirection;
    use mlpay_expenses::ExpenseSource;
    use mlpay_expenses::ExpenseStatus;
    use mlpay_expenses::ExpenseType;
    use mlpay_payments::Payer;
    use mlpay_payments::RawMlPayment;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid fixture date")
    }

    fn statement_line(row_id: &str, record_type: &str, posted_date: NaiveDate, amount: Decimal, reference: Option<&str>) -> NormalizedStatementLine {
        NormalizedStatementLine {
            row_id: row_id.to_string(),
            record_type: record_type.to_string(),
            posted_date,
            amount,
            description: "line".to_string(),
            reference: reference.map(ToString::to_string),
        }
    }

    fn raw_payment(id: &str, status: &str, money_release_date: Option<NaiveDate>) -> RawMlPayment {
        RawMlPayment {
            id: id.to_string(),
            order_id: Some(format!("order-{id}")),
            status: status.to_string(),
            status_detail: None,
            description: None,
            collector_id: None,
            operation_type: Some("regular_payment".to_string()),
            amount: dec!(100.00),
            net_received_amount: dec!(95.00),
            transaction_amount_refunded: None,
            charges_details: vec![],
            shipping_amount: Decimal::ZERO,
            money_release_date,
            money_release_status: Some("released".to_string()),
            date_approved: None,
            date_last_updated: None,
            payment_method_id: None,
            payment_type_id: None,
            installments: None,
            authorization_code: None,
            payer: Payer::default(),
        }
    }

    fn synced_payment(id: &str, money_release_date: NaiveDate) -> Payment {
        let now: DateTime<Utc> = Utc::now();
        let raw = raw_payment(id, "approved", Some(money_release_date));
        Payment {
            seller: "acme".to_string(),
            ml_payment_id: id.to_string(),
            ml_status: raw.status.clone(),
            status_detail: None,
            amount: raw.amount,
            net_received_amount: raw.net_received_amount,
            money_release_date: raw.money_release_date,
            ml_order_id: raw.order_id.clone(),
            processing_status: ProcessingStatus::Synced,
            group_id: id.to_string(),
            processor_fee: None,
            processor_shipping: None,
            error: None,
            ca_protocol: None,
            raw_payload: raw,
            created_at: now,
            updated_at: now,
        }
    }

    fn expense(payment_id: &str) -> Expense {
        let now = Utc::now();
        Expense {
            seller: "acme".to_string(),
            payment_id: payment_id.to_string(),
            expense_type: ExpenseType::Subscription,
            direction: ExpenseDirection::Expense,
            ca_category: None,
            auto_categorized: true,
            amount: dec!(49.90),
            description: "subscription".to_string(),
            source: ExpenseSource::PaymentsApi,
            status: ExpenseStatus::AutoCategorized,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn line_matching_synced_payment_is_covered_by_payments() {
        let line = statement_line("1001", "settlement", day("2026-02-01"), dec!(95.00), Some("5001"));
        let payments = vec![synced_payment("5001", day("2026-02-01"))];
        let report = check_coverage(day("2026-02-01"), day("2026-02-01"), &[line], &payments, &[]);
        assert_eq!(report.count(CoverageStatus::CoveredByPayments), 1);
        assert!(report.is_closeable());
    }

    #[test]
    fn legacy_record_type_is_covered_by_legacy() {
        let line = statement_line("1002", "opening_balance", day("2026-02-01"), dec!(0), None);
        let report = check_coverage(day("2026-02-01"), day("2026-02-01"), &[line], &[], &[]);
        assert_eq!(report.count(CoverageStatus::CoveredByLegacy), 1);
    }

    #[test]
    fn line_matching_mp_expense_composite_id_is_covered() {
        let line = statement_line("1003", "reserve_for_dispute", day("2026-02-01"), dec!(-50.00), None);
        let expenses = vec![expense("1003:reserve_for_dispute")];
        let report = check_coverage(day("2026-02-01"), day("2026-02-01"), &[line], &[], &expenses);
        assert_eq!(report.count(CoverageStatus::CoveredByMpExpenses), 1);
    }

    #[test]
    fn unexplained_line_is_uncovered_and_blocks_close() {
        let line = statement_line("1004", "mystery", day("2026-02-01"), dec!(10.00), None);
        let report = check_coverage(day("2026-02-01"), day("2026-02-01"), &[line], &[], &[]);
        assert_eq!(report.count(CoverageStatus::Uncovered), 1);
        assert!(!report.is_closeable());

        let gate = InMemoryDailyCloseGate::new();
        let err = gate.close("acme", day("2026-02-01"), &report).expect_err("must refuse close");
        assert!(matches!(err, CoverageError::Uncovered(_, 1)));
    }

    #[test]
    fn daily_cash_identity_matches_when_statement_equals_net_api() {
        let line = statement_line("1005", "settlement", day("2026-02-02"), dec!(95.00), Some("5002"));
        let payments = vec![synced_payment("5002", day("2026-02-02"))];
        let identity = daily_cash_identity(day("2026-02-02"), &[line], &payments);
        assert!(identity.matches());
        assert_eq!(identity.difference(), Decimal::ZERO);
    }

    #[test]
    fn daily_cash_identity_flags_a_divergence() {
        let line = statement_line("1006", "settlement", day("2026-02-03"), dec!(120.00), Some("5003"));
        let payments = vec![synced_payment("5003", day("2026-02-03"))];
        let identity = daily_cash_identity(day("2026-02-03"), &[line], &payments);
        assert!(!identity.matches());
        assert_eq!(identity.difference(), dec!(25.00));
    }

    #[test]
    fn close_gate_allows_close_and_records_it() {
        let line = statement_line("1007", "settlement", day("2026-02-04"), dec!(95.00), Some("5004"));
        let payments = vec![synced_payment("5004", day("2026-02-04"))];
        let report = check_coverage(day("2026-02-04"), day("2026-02-04"), &[line], &payments, &[]);
        let gate = InMemoryDailyCloseGate::new();
        gate.close("acme", day("2026-02-04"), &report).expect("close should succeed");
        assert!(gate.is_closed("acme", day("2026-02-04")).expect("lookup"));
    }
}
