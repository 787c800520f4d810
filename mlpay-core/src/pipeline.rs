use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Datelike;
use chrono::NaiveDate;
use mlpay_coverage::CoverageError;
use mlpay_coverage::CoverageReport;
use mlpay_coverage::DailyCloseGate;
use mlpay_coverage::check_coverage;
use mlpay_expenses::Expense;
use mlpay_expenses::ExpenseSource;
use mlpay_expenses::ExpenseStatus;
use mlpay_expenses::ExpenseStore;
use mlpay_extrato::CsvStatementParser;
use mlpay_extrato::ExtratoError;
use mlpay_extrato::classify_statement_line;
use mlpay_installments::InstallmentStore;
use mlpay_jobqueue::JobQueue;
use mlpay_payments::PaymentStore;
use mlpay_sellers::SellerId;
use thiserror::Error;

use crate::config::NightlyPipelineSchedule;
use crate::release::BaixaPassSummary;
use crate::release::ReleaseError;
use crate::release::run_baixa_pass;
use crate::sync::SyncCounters;
use crate::sync::SyncError;
use crate::sync::SyncPaymentSource;
use crate::sync::SyncWindow;
use crate::sync::run_daily_sync;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Extrato(#[from] ExtratoError),
    #[error(transparent)]
    Expenses(#[from] mlpay_expenses::ExpenseError),
    #[error(transparent)]
    Payments(#[from] mlpay_payments::PaymentsError),
    #[error(transparent)]
    Coverage(#[from] CoverageError),
    /// Carries a [`StatementSource`] or [`LegacyExporter`] implementation's
    /// own error as a message, so this crate never depends on any
    /// particular transport's error type.
    #[error("external collaborator error: {0}")]
    Collaborator(String),
}

/// Downloads the MP `account_statement` CSV for one seller's window. The
/// download itself is an external HTTP concern; this trait is the seam the
/// pipeline calls through.
#[async_trait]
pub trait StatementSource: Send + Sync {
    async fn fetch_statement_csv(&self, seller: &SellerId, begin: NaiveDate, end: NaiveDate) -> PipelineResult<String>;
}

/// The legacy CSV bridge is explicitly an external collaborator; the
/// pipeline only decides *when* to call it.
#[async_trait]
pub trait LegacyExporter: Send + Sync {
    async fn export(&self, seller: &SellerId, day: NaiveDate) -> PipelineResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct NightlyPipelineSummary {
    pub sync: SyncCounters,
    pub fee_validation: SyncCounters,
    pub extrato_lines_ingested: u64,
    pub extrato_expenses_created: u64,
    pub baixas: BaixaPassSummary,
    pub legacy_exported: bool,
    pub coverage: Option<CoverageReport>,
    pub closed: bool,
}

/// Collapses the daily schedulers into one sequential run, gated by the
/// `nightly_pipeline` operator toggle: sync, then a fee-validation pass over
/// the same window (reprocessing rows whose fees never landed), then extrato
/// ingestion, baixas, a weekday-gated legacy export, a coverage check, and a
/// close attempt. Returns without doing anything when the schedule is
/// disabled, so callers can always invoke this unconditionally from a cron
/// tick.
#[allow(clippy::too_many_arguments)]
pub async fn run_nightly_pipeline(
    seller: &SellerId,
    today: NaiveDate,
    schedule: &NightlyPipelineSchedule,
    release_bypass_enabled: bool,
    vendor_categories: &HashMap<String, String>,
    sync_source: &dyn SyncPaymentSource,
    statement_source: &dyn StatementSource,
    statement_parser: &CsvStatementParser,
    legacy_exporter: &dyn LegacyExporter,
    close_gate: &dyn DailyCloseGate,
    payments: &dyn PaymentStore,
    expenses: &dyn ExpenseStore,
    installments: &dyn InstallmentStore,
    jobs: &dyn JobQueue,
) -> PipelineResult<NightlyPipelineSummary> {
    if !schedule.pipeline_enabled {
        return Ok(NightlyPipelineSummary::default());
    }

    let window = SyncWindow::rolling(today, schedule.lookback_days);
    let sync = run_daily_sync(seller, sync_source, payments, expenses, jobs, &window, vendor_categories).await?;

    let fee_window = SyncWindow { reprocess_missing_fees: true, ..window };
    let fee_validation = run_daily_sync(seller, sync_source, payments, expenses, jobs, &fee_window, vendor_categories).await?;

    let statement_csv = statement_source.fetch_statement_csv(seller, window.begin, window.end).await?;
    let lines = statement_parser.parse(&statement_csv)?;

    let payment_rows = payments.list_by_seller(seller).await?;
    let mut expense_rows = expenses.list_pending_review(seller).await?;
    let draft_report = check_coverage(window.begin, window.end, &lines, &payment_rows, &expense_rows);

    let mut extrato_expenses_created = 0u64;
    let now = chrono::Utc::now();
    for uncovered in draft_report.uncovered() {
        let (expense_type, direction) = classify_statement_line(&uncovered.line);
        let created = expenses
            .upsert(Expense {
                seller: seller.clone(),
                payment_id: uncovered.line.composite_payment_id(),
                expense_type,
                direction,
                ca_category: None,
                auto_categorized: false,
                amount: uncovered.line.amount,
                description: uncovered.line.description.clone(),
                source: ExpenseSource::Extrato,
                status: ExpenseStatus::PendingReview,
                created_at: now,
                updated_at: now,
            })
            .await?;
        expense_rows.push(created);
        extrato_expenses_created += 1;
    }
    let coverage = check_coverage(window.begin, window.end, &lines, &payment_rows, &expense_rows);

    let baixas = run_baixa_pass(installments, payments, jobs, seller, today, release_bypass_enabled).await?;

    let weekday = today.weekday().num_days_from_sunday();
    let legacy_exported = if schedule.legacy_export_weekdays.contains(&weekday) {
        legacy_exporter.export(seller, today).await?;
        true
    } else {
        false
    };

    let closed = if coverage.is_closeable() {
        close_gate.close(seller, window.end, &coverage)?;
        true
    } else {
        false
    };

    Ok(NightlyPipelineSummary {
        sync,
        fee_validation,
        extrato_lines_ingested: lines.len() as u64,
        extrato_expenses_created,
        baixas,
        legacy_exported,
        coverage: Some(coverage),
        closed,
    })
}
