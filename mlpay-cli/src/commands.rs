use std::sync::Arc;

use anyhow::Result;
use anyhow::anyhow;
use chrono::NaiveDate;
use chrono::Utc;
use clap::Parser;
use clap::ValueEnum;
use mlpay_audit::AppendRequest;
use mlpay_audit::AuditLog;
use mlpay_clients::CaAuthenticator;
use mlpay_clients::CaClient;
use mlpay_clients::CaTokenCache;
use mlpay_clients::CaTokenExchange;
use mlpay_clients::MlClient;
use mlpay_core::SyncWindow;
use mlpay_core::run_baixa_pass;
use mlpay_core::run_daily_sync;
use mlpay_core::run_nightly_pipeline;
use mlpay_jobqueue::JobStatus;
use mlpay_policy::OperationalPolicy;
use mlpay_policy::PolicyStore;
use mlpay_sellers::CaIdentifiers;
use mlpay_sellers::CreateFirmRequest;
use mlpay_sellers::IntegrationMode;
use mlpay_sellers::MlTokens;
use mlpay_sellers::RegisterSellerRequest;
use mlpay_sellers::SellerDirectory;
use mlpay_sellers::SellerId;
use serde::Serialize;

use crate::adapters::CaOauthAuthenticator;
use crate::adapters::MlAdapter;
use crate::adapters::NoopLegacyExporter;
use crate::engine::Engine;
use crate::worker::JobWorker;

#[derive(Debug, Parser)]
#[command(name = "mlpay", about = "Mercado Livre / Mercado Pago -> Conta Azul reconciliation engine")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Seller onboarding and policy.
    Seller {
        #[command(subcommand)]
        command: SellerCommand,
    },
    /// Run one daily-sync window for a seller.
    Sync {
        #[arg(long)]
        seller: String,
        #[arg(long)]
        lookback_days: Option<i64>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        reprocess_missing_fees: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Page the full ML history for a newly onboarded seller.
    Backfill {
        #[arg(long)]
        seller: String,
        #[arg(long)]
        ca_start_date: NaiveDate,
    },
    /// Run the Release Checker / baixa pass for a seller.
    Baixas {
        #[arg(long)]
        seller: String,
        #[arg(long)]
        bypass: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run the full nightly pipeline for a seller.
    Pipeline {
        #[arg(long)]
        seller: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Drain ready CA jobs once.
    Work {
        #[arg(long, default_value_t = 50)]
        max_jobs: u32,
    },
    /// Print accumulated telemetry counters.
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run as a long-lived process: the nightly pipeline fires on its
    /// configured schedule for every registered seller, and the CA job
    /// queue is drained on a fixed interval in between.
    Serve {
        #[arg(long, default_value_t = 30)]
        work_interval_seconds: u64,
    },
}

#[derive(Debug, clap::Subcommand)]
enum SellerCommand {
    /// Create a firm grouping (optional).
    CreateFirm {
        #[arg(long)]
        name: String,
    },
    /// Register a seller slug.
    Register {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        firm_id: Option<String>,
        #[arg(long, value_enum, default_value_t = IntegrationModeArg::DashboardOnly)]
        integration_mode: IntegrationModeArg,
    },
    /// List registered sellers.
    List {
        #[arg(long)]
        firm_id: Option<String>,
    },
    /// Store this seller's ML OAuth token pair.
    SetMlTokens {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        #[arg(long)]
        expires_in_seconds: i64,
    },
    /// Store this seller's CA account/cost-centre identifiers.
    SetCaIdentifiers {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        bank_account_id: Option<String>,
        #[arg(long)]
        cost_centre_id: Option<String>,
    },
    /// Set the operator policy switches for a seller.
    SetPolicy {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        release_bypass_enabled: bool,
        #[arg(long)]
        nightly_pipeline_enabled: bool,
        #[arg(long, default_value_t = 3)]
        sync_lookback_days: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IntegrationModeArg {
    DashboardOnly,
    DashboardCa,
}

impl From<IntegrationModeArg> for IntegrationMode {
    fn from(value: IntegrationModeArg) -> Self {
        match value {
            IntegrationModeArg::DashboardOnly => IntegrationMode::DashboardOnly,
            IntegrationModeArg::DashboardCa => IntegrationMode::DashboardCa,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    #[must_use]
    fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let engine = Engine::from_env()?;
    match cli.command {
        Command::Seller { command } => run_seller(&engine, command).await,
        Command::Sync { seller, lookback_days, dry_run, reprocess_missing_fees, format } => run_sync(&engine, seller, lookback_days, dry_run, reprocess_missing_fees, format).await,
        Command::Backfill { seller, ca_start_date } => run_backfill(&engine, seller, ca_start_date).await,
        Command::Baixas { seller, bypass, format } => run_baixas(&engine, seller, bypass, format).await,
        Command::Pipeline { seller, format } => run_pipeline(&engine, seller, format).await,
        Command::Work { max_jobs } => run_work(&engine, max_jobs).await,
        Command::Status { format } => run_status(&engine, format).await,
        Command::Serve { work_interval_seconds } => run_serve(Arc::new(engine), work_interval_seconds).await,
    }
}

async fn run_seller(engine: &Engine, command: SellerCommand) -> Result<()> {
    match command {
        SellerCommand::CreateFirm { name } => {
            let firm = engine.sellers.create_firm(CreateFirmRequest { name }).await?;
            println!("Created firm {} ({})", firm.name, firm.id);
        }
        SellerCommand::Register { slug, firm_id, integration_mode } => {
            let request = RegisterSellerRequest { slug, firm_id, integration_mode: integration_mode.into() }.normalize()?;
            let seller = engine.sellers.register(request).await?;
            println!("Registered seller {} ({})", seller.slug, seller.integration_mode);
            engine
                .audit
                .append(AppendRequest { entity_id: mlpay_audit::entity_key(&seller.slug, "seller"), actor: "operator".into(), action: "register".into(), metadata: serde_json::json!({}) })
                .await?;
        }
        SellerCommand::List { firm_id } => {
            let sellers = engine.sellers.list(firm_id.as_ref()).await?;
            if sellers.is_empty() {
                println!("No sellers registered.");
            }
            for seller in sellers {
                println!("{} — {} (ca_enabled={})", seller.slug, seller.integration_mode, seller.is_ca_enabled());
            }
        }
        SellerCommand::SetMlTokens { slug, access_token, refresh_token, expires_in_seconds } => {
            let expires_at = Utc::now() + chrono::Duration::seconds(expires_in_seconds);
            engine.sellers.update_tokens(&slug, MlTokens { access_token, refresh_token, expires_at }).await?;
            println!("Updated ML tokens for {slug}");
        }
        SellerCommand::SetCaIdentifiers { slug, bank_account_id, cost_centre_id } => {
            engine.sellers.update_ca_identifiers(&slug, CaIdentifiers { bank_account_id, cost_centre_id, ml_contact_id: None }).await?;
            println!("Updated CA identifiers for {slug}");
        }
        SellerCommand::SetPolicy { slug, release_bypass_enabled, nightly_pipeline_enabled, sync_lookback_days } => {
            let policy = OperationalPolicy { release_bypass_enabled, nightly_pipeline_enabled, sync_lookback_days, vendor_ca_categories: Default::default() };
            engine.policy.put_policy(slug.clone(), policy).await?;
            println!("Updated policy for {slug}");
        }
    }
    Ok(())
}

/// Builds the live ML/CA clients for one seller from this seller's stored
/// tokens and the process-wide [`mlpay_core::RuntimeConfig`]. Fails loudly
/// (rather than falling back to a stub) when the seller has no ML tokens —
/// the browser-facing OAuth exchange is an external collaborator this
/// binary never performs itself.
async fn live_ml_client(engine: &Engine, seller: &SellerId) -> Result<(MlClient, String)> {
    let record = engine.sellers.get(seller).await?;
    let tokens = record.ml_tokens.ok_or_else(|| anyhow!("seller {seller} has no ML tokens on file; run `mlpay seller set-ml-tokens` first"))?;
    let client = MlClient::new(engine.config.ml_base_url.clone(), engine.rate_limiter.clone()).map_err(|err| anyhow!(err))?;
    Ok((client, tokens.access_token))
}

/// Bootstraps a live `CaClient` by performing one refresh-token exchange up
/// front using the CA client credentials (no seller-specific refresh token
/// is modeled yet, so the client-credential grant stands in as the initial
/// exchange; every call after this one goes through `CaTokenCache`'s normal
/// proactive/reactive refresh).
async fn live_ca_client(engine: &Engine) -> Result<CaClient> {
    let authenticator: Arc<dyn CaAuthenticator> = Arc::new(CaOauthAuthenticator::new(engine.config.ca_base_url.clone(), engine.config.ca_client_id.clone(), engine.config.ca_client_secret.clone()));
    let initial = authenticator.exchange_refresh_token("").await.map_err(|err| anyhow!(err))?;
    let tokens = Arc::new(CaTokenCache::new(authenticator, CaTokenExchange { access_token: initial.access_token, refresh_token: initial.refresh_token, expires_in_seconds: initial.expires_in_seconds }, Utc::now()));
    CaClient::new(engine.config.ca_base_url.clone(), engine.rate_limiter.clone(), tokens).map_err(|err| anyhow!(err))
}

#[derive(Serialize)]
struct SyncOutput {
    orders: u64,
    expenses: u64,
    skipped: u64,
    errors: u64,
}

async fn run_sync(engine: &Engine, seller: String, lookback_days: Option<i64>, dry_run: bool, reprocess_missing_fees: bool, format: OutputFormat) -> Result<()> {
    let (client, access_token) = live_ml_client(engine, &seller).await?;
    let adapter = MlAdapter { client: &client, access_token, seller_user_id: seller.clone() };
    let lookback = lookback_days.unwrap_or(engine.config.nightly_pipeline.lookback_days);
    let mut window = SyncWindow::rolling(Utc::now().date_naive(), lookback);
    window.dry_run = dry_run;
    window.reprocess_missing_fees = reprocess_missing_fees;

    let policy = engine.policy.get_policy(&seller).await?.unwrap_or_default();
    let counters = run_daily_sync(&seller, &adapter, &engine.payments, &engine.expenses, &engine.jobs, &window, &policy.vendor_ca_categories).await?;
    engine.telemetry.record_sync_run();
    engine
        .audit
        .append(AppendRequest {
            entity_id: mlpay_audit::entity_key(&seller, "sync"),
            actor: "system".into(),
            action: "sync_window_processed".into(),
            metadata: serde_json::json!({
                "window_begin": window.begin,
                "window_end": window.end,
                "orders": counters.orders,
                "expenses": counters.expenses,
                "skipped": counters.skipped,
                "errors": counters.errors,
            }),
        })
        .await?;

    if format.is_json() {
        let payload = SyncOutput { orders: counters.orders, expenses: counters.expenses, skipped: counters.skipped, errors: counters.errors };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Sync window {} .. {} for {seller}", window.begin, window.end);
        println!("orders={} expenses={} skipped={} errors={}", counters.orders, counters.expenses, counters.skipped, counters.errors);
    }
    Ok(())
}

async fn run_backfill(engine: &Engine, seller: String, ca_start_date: NaiveDate) -> Result<()> {
    let (client, access_token) = live_ml_client(engine, &seller).await?;
    let adapter = MlAdapter { client: &client, access_token, seller_user_id: seller.clone() };
    let today = Utc::now().date_naive();
    let policy = engine.policy.get_policy(&seller).await?.unwrap_or_default();
    let record = mlpay_core::run_onboarding_backfill(
        &engine.sellers,
        &engine.payments,
        &engine.expenses,
        &engine.jobs,
        &adapter,
        &seller,
        ca_start_date,
        today,
        &policy.vendor_ca_categories,
    )
    .await?;
    engine
        .audit
        .append(AppendRequest {
            entity_id: mlpay_audit::entity_key(&seller, "backfill"),
            actor: "system".into(),
            action: "backfill_page_processed".into(),
            metadata: serde_json::json!({
                "ca_start_date": ca_start_date,
                "processed": record.backfill_progress.processed,
                "orders_processed": record.backfill_progress.orders_processed,
                "skipped": record.backfill_progress.skipped,
            }),
        })
        .await?;
    println!("Backfill complete for {seller}: processed={} orders={} skipped={}", record.backfill_progress.processed, record.backfill_progress.orders_processed, record.backfill_progress.skipped);
    Ok(())
}

#[derive(Serialize)]
struct BaixaOutput {
    baixas_enqueued: u64,
    needs_refetch: Vec<String>,
}

async fn run_baixas(engine: &Engine, seller: String, bypass: bool, format: OutputFormat) -> Result<()> {
    let today = Utc::now().date_naive();
    let summary = run_baixa_pass(&engine.installments, &engine.payments, &engine.jobs, &seller, today, bypass).await?;
    engine.telemetry.record_baixas_enqueued(summary.baixas_enqueued as usize);
    engine
        .audit
        .append(AppendRequest {
            entity_id: mlpay_audit::entity_key(&seller, "baixas"),
            actor: "system".into(),
            action: "baixa_pass_completed".into(),
            metadata: serde_json::json!({
                "day": today,
                "bypass": bypass,
                "baixas_enqueued": summary.baixas_enqueued,
                "needs_refetch": summary.needs_refetch,
            }),
        })
        .await?;

    if format.is_json() {
        let payload = BaixaOutput { baixas_enqueued: summary.baixas_enqueued, needs_refetch: summary.needs_refetch.clone() };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Baixas enqueued: {}", summary.baixas_enqueued);
        if !summary.needs_refetch.is_empty() {
            println!("Needs refetch: {}", summary.needs_refetch.join(", "));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PipelineOutput {
    extrato_lines_ingested: u64,
    extrato_expenses_created: u64,
    baixas_enqueued: u64,
    legacy_exported: bool,
    closed: bool,
}

/// Runs the nightly pipeline for one seller and records the telemetry every
/// caller (the one-off `pipeline` subcommand and the `serve` scheduler)
/// needs recorded identically.
async fn run_pipeline_for_seller(engine: &Engine, seller: &str) -> Result<(NaiveDate, mlpay_core::NightlyPipelineSummary)> {
    let policy = engine.policy.get_policy(seller).await?.unwrap_or_default();
    let schedule = mlpay_core::NightlyPipelineSchedule { pipeline_enabled: policy.nightly_pipeline_enabled, lookback_days: policy.sync_lookback_days, ..engine.config.nightly_pipeline.clone() };

    let (client, access_token) = live_ml_client(engine, seller).await?;
    let adapter = MlAdapter { client: &client, access_token, seller_user_id: seller.to_string() };
    let parser = mlpay_extrato::CsvStatementParser::default();
    let exporter = NoopLegacyExporter;
    let today = Utc::now().date_naive();

    let summary = run_nightly_pipeline(
        seller,
        today,
        &schedule,
        policy.release_bypass_enabled,
        &policy.vendor_ca_categories,
        &adapter,
        &adapter,
        &parser,
        &exporter,
        &engine.close_gate,
        &engine.payments,
        &engine.expenses,
        &engine.installments,
        &engine.jobs,
    )
    .await?;
    engine.telemetry.record_sync_run();
    if summary.closed {
        engine.telemetry.record_day_closed();
    }
    if let Some(report) = &summary.coverage {
        engine.telemetry.record_coverage_snapshot(report.uncovered().len());
    }
    engine
        .audit
        .append(AppendRequest {
            entity_id: mlpay_audit::entity_key(seller, "pipeline"),
            actor: "system".into(),
            action: "nightly_pipeline_completed".into(),
            metadata: serde_json::json!({
                "day": today,
                "extrato_lines_ingested": summary.extrato_lines_ingested,
                "extrato_expenses_created": summary.extrato_expenses_created,
                "baixas_enqueued": summary.baixas.baixas_enqueued,
                "legacy_exported": summary.legacy_exported,
                "closed": summary.closed,
            }),
        })
        .await?;
    Ok((today, summary))
}

async fn run_pipeline(engine: &Engine, seller: String, format: OutputFormat) -> Result<()> {
    let (today, summary) = run_pipeline_for_seller(engine, &seller).await?;

    if format.is_json() {
        let payload = PipelineOutput {
            extrato_lines_ingested: summary.extrato_lines_ingested,
            extrato_expenses_created: summary.extrato_expenses_created,
            baixas_enqueued: summary.baixas.baixas_enqueued,
            legacy_exported: summary.legacy_exported,
            closed: summary.closed,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Pipeline run for {seller} on {today}");
        println!("extrato lines ingested: {}", summary.extrato_lines_ingested);
        println!("expenses booked from statement: {}", summary.extrato_expenses_created);
        println!("baixas enqueued: {}", summary.baixas.baixas_enqueued);
        println!("legacy export triggered: {}", summary.legacy_exported);
        println!("day closed: {}", summary.closed);
    }
    Ok(())
}

/// Drains up to `max_jobs` ready CA jobs, routing each settled [`JobStatus`]
/// into telemetry. Shared by the one-off `work` subcommand and the `serve`
/// scheduler's periodic drain tick.
async fn drain_jobs(engine: &Engine, max_jobs: u32) -> Result<u32> {
    let ca = live_ca_client(engine).await?;
    let worker = JobWorker { jobs: &engine.jobs, ca: &ca, sellers: &engine.sellers, audit: engine.audit.as_ref() };
    let mut drained = 0u32;
    while drained < max_jobs {
        let Some(status) = worker.run_once().await? else {
            break;
        };
        drained += 1;
        match status {
            JobStatus::Completed => engine.telemetry.record_job_completed(),
            JobStatus::Dead => engine.telemetry.record_job_dead(),
            JobStatus::Pending | JobStatus::Processing | JobStatus::Failed => {}
        }
    }
    Ok(drained)
}

async fn run_work(engine: &Engine, max_jobs: u32) -> Result<()> {
    let drained = drain_jobs(engine, max_jobs).await?;
    println!("Drained {drained} job(s)");
    Ok(())
}

async fn run_status(engine: &Engine, format: OutputFormat) -> Result<()> {
    let counters = engine.telemetry.snapshot();
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&counters)?);
    } else {
        println!("payments_classified_sale: {}", counters.payments_classified_sale);
        println!("payments_classified_reversal: {}", counters.payments_classified_reversal);
        println!("payments_skipped: {}", counters.payments_skipped);
        println!("expenses_classified: {}", counters.expenses_classified);
        println!("jobs_enqueued: {}", counters.jobs_enqueued);
        println!("jobs_completed: {}", counters.jobs_completed);
        println!("jobs_dead: {}", counters.jobs_dead);
        println!("backfill_pages_processed: {}", counters.backfill_pages_processed);
        println!("sync_runs: {}", counters.sync_runs);
        println!("baixas_enqueued: {}", counters.baixas_enqueued);
        println!("coverage_uncovered_lines: {}", counters.coverage_uncovered_lines);
        println!("days_closed: {}", counters.days_closed);
        match engine.telemetry.store_path() {
            Some(path) => println!("Telemetry file: {}", path.display()),
            None => println!("Telemetry file: in-memory (set MLPAY_HOME to persist)."),
        }
    }
    Ok(())
}

/// Runs the nightly pipeline for every registered seller, logging failures
/// per seller rather than aborting the whole tick — one seller's missing ML
/// tokens or expired CA grant must never block the rest.
async fn run_nightly_pipeline_tick(engine: &Engine) {
    let sellers = match engine.sellers.list(None).await {
        Ok(sellers) => sellers,
        Err(err) => {
            tracing::error!(error = %err, "failed to list sellers for nightly pipeline tick");
            return;
        }
    };
    for seller in sellers {
        match run_pipeline_for_seller(engine, &seller.slug).await {
            Ok((today, summary)) => {
                tracing::info!(seller = %seller.slug, day = %today, closed = summary.closed, baixas_enqueued = summary.baixas.baixas_enqueued, "nightly pipeline tick complete");
            }
            Err(err) => {
                tracing::warn!(seller = %seller.slug, error = %err, "nightly pipeline tick failed for seller");
            }
        }
    }
}

/// Long-lived entrypoint: schedules the nightly pipeline at its configured
/// local time and drains the CA job queue on a fixed interval, until the
/// process receives a shutdown signal.
async fn run_serve(engine: Arc<Engine>, work_interval_seconds: u64) -> Result<()> {
    let scheduler = tokio_cron_scheduler::JobScheduler::new().await?;

    let schedule = engine.config.nightly_pipeline.clone();
    let cron = format!("0 {} {} * * *", schedule.minute_local, schedule.hour_local);
    let pipeline_engine = engine.clone();
    scheduler
        .add(tokio_cron_scheduler::Job::new_async(cron.as_str(), move |_uuid, _scheduler| {
            let engine = pipeline_engine.clone();
            Box::pin(async move { run_nightly_pipeline_tick(&engine).await })
        })?)
        .await?;
    tracing::info!(cron = %cron, "scheduled nightly pipeline");

    let work_engine = engine.clone();
    scheduler
        .add(tokio_cron_scheduler::Job::new_repeated_async(std::time::Duration::from_secs(work_interval_seconds), move |_uuid, _scheduler| {
            let engine = work_engine.clone();
            Box::pin(async move {
                match drain_jobs(&engine, 100).await {
                    Ok(drained) if drained > 0 => tracing::info!(drained, "periodic job drain"),
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "periodic job drain failed"),
                }
            })
        })?)
        .await?;
    tracing::info!(interval_seconds = work_interval_seconds, "scheduled CA job queue drain");

    scheduler.start().await?;
    tracing::info!("mlpay serve started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping scheduler");
    Ok(())
}
