#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod backfill;
pub mod classifier;
pub mod config;
pub mod pipeline;
pub mod release;
pub mod sync;
mod telemetry;

pub use backfill::BackfillError;
pub use backfill::BackfillPaymentSource;
pub use backfill::BackfillResult;
pub use backfill::process_backfill_page;
pub use backfill::run_onboarding_backfill;
pub use classifier::ClassificationResult;
pub use classifier::classify_payment;
pub use classifier::competence_date;
pub use config::ConfigError;
pub use config::NightlyPipelineSchedule;
pub use config::RuntimeConfig;
pub use pipeline::LegacyExporter;
pub use pipeline::NightlyPipelineSummary;
pub use pipeline::PipelineError;
pub use pipeline::StatementSource;
pub use pipeline::run_nightly_pipeline;
pub use release::BaixaPassSummary;
pub use release::ReleaseError;
pub use release::run_baixa_pass;
pub use sync::SyncCounters;
pub use sync::SyncError;
pub use sync::SyncPaymentSource;
pub use sync::SyncWindow;
pub use sync::run_daily_sync;
pub use telemetry::AccountingTelemetry;
pub use telemetry::TelemetryCounters;
