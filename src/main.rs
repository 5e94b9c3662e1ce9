use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use school_ops::config::AppConfig;
use school_ops::error::AppError;
use school_ops::telemetry;
use school_ops::workflows::month_close::{month_close_router, MonthCloseRegistry};
use school_ops::workflows::reconciliation::matching::MatchConfig;
use school_ops::workflows::reconciliation::processor::{
    ContractRosterImporter, ProcessorDepositImporter,
};
use school_ops::workflows::reconciliation::router::reconciliation_router;
use school_ops::workflows::reconciliation::service::InMemoryReconciliationService;
use school_ops::workflows::reconciliation::{LineMatchReport, TrancheDeposit};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "School Operations Service",
    about = "Run the tranche payment reconciliation service or preview a deposit batch",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Offline tranche reconciliation utilities
    Tranche {
        #[command(subcommand)]
        command: TrancheCommand,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum TrancheCommand {
    /// Match a processor deposit export against a contract roster and print
    /// the proposed reconciliation
    Preview(TranchePreviewArgs),
}

#[derive(Args, Debug)]
struct TranchePreviewArgs {
    /// Processor deposit export CSV
    #[arg(long)]
    deposit_csv: PathBuf,
    /// Enrollment contract roster CSV
    #[arg(long)]
    contracts_csv: PathBuf,
    /// Evaluation date for auto-confirmation (defaults to today)
    #[arg(long, value_parser = parse_date)]
    today: Option<NaiveDate>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Tranche {
            command: TrancheCommand::Preview(args),
        } => run_tranche_preview(args),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let service = Arc::new(InMemoryReconciliationService::in_memory(
        MatchConfig::default(),
    ));
    let month_close = Arc::new(MonthCloseRegistry::default());

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(reconciliation_router(
            service,
            config.reconciliation.default_accounting_system.clone(),
        ))
        .merge(month_close_router(month_close))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "school operations service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_tranche_preview(args: TranchePreviewArgs) -> Result<(), AppError> {
    let TranchePreviewArgs {
        deposit_csv,
        contracts_csv,
        today,
    } = args;

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let contracts = ContractRosterImporter::from_path(contracts_csv)?;
    let draft = ProcessorDepositImporter::from_path(deposit_csv)?;
    let tranche_id = draft.id.clone();

    let match_config = MatchConfig::default();
    let threshold = match_config.auto_map_threshold;
    let service = InMemoryReconciliationService::in_memory(match_config);
    for contract in contracts {
        service.register_contract(contract)?;
    }
    service.ingest_tranche(draft)?;

    let reports = service.propose_matches(&tranche_id)?;
    let auto_confirmed = service.auto_confirm_eligible(&tranche_id, "preview-policy", today)?;
    let deposit = service.tranche(&tranche_id)?;

    render_preview(&deposit, &reports, today, auto_confirmed.len(), threshold);
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn render_preview(
    deposit: &TrancheDeposit,
    reports: &[LineMatchReport],
    today: NaiveDate,
    auto_confirmed: usize,
    threshold: u16,
) {
    println!("Tranche reconciliation preview");
    println!(
        "Tranche {} from {} deposited {} ({}, evaluated {})",
        deposit.id.0, deposit.provider, deposit.total_amount, deposit.payment_method, today
    );
    println!(
        "Lines: {} | auto-confirmed: {} | status: {}",
        deposit.lines.len(),
        auto_confirmed,
        deposit.reconciliation_status.label()
    );

    println!("\nProposed matches");
    for report in reports {
        match report.top() {
            Some(candidate) => {
                let marker = if report.auto_mappable(threshold) {
                    "auto"
                } else {
                    "review"
                };
                println!(
                    "- {}: contract {} at {:.2} confidence [{}]",
                    report.family_id.0,
                    candidate.contract_id.0,
                    candidate.confidence(),
                    marker
                );
            }
            None => println!("- {}: no candidate contract", report.family_id.0),
        }
    }

    let flagged: Vec<&LineMatchReport> = reports
        .iter()
        .filter(|report| !report.flags.is_empty())
        .collect();
    if flagged.is_empty() {
        println!("\nAdvisory flags: none");
    } else {
        println!("\nAdvisory flags");
        for report in flagged {
            for flag in &report.flags {
                println!(
                    "- [{}] {}: {}",
                    flag.severity.label(),
                    report.family_id.0,
                    flag.detail
                );
            }
        }
    }
}
