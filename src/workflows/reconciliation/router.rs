use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::json;

use super::domain::{Allocation, Contract, ContractId, FamilyId, TransactionId, TrancheId};
use super::repository::{
    ContractStore, LedgerEntrySink, RepositoryError, TransactionStore, TrancheStore,
};
use super::report::{reconciliation_summary, RiskSummaryView};
use super::risk::portfolio_summary;
use super::service::{
    ReconciliationService, ReconciliationServiceError, TransactionDraft, TrancheDraft,
};

/// Shared state for the sync route. Requests may omit the target system, in
/// which case the configured default applies.
struct SyncState<T, D, C, L> {
    service: Arc<ReconciliationService<T, D, C, L>>,
    default_system: Arc<str>,
}

impl<T, D, C, L> Clone for SyncState<T, D, C, L> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            default_system: self.default_system.clone(),
        }
    }
}

/// Router builder exposing the reconciliation endpoints. `default_system`
/// is the accounting target used when a sync request names none.
pub fn reconciliation_router<T, D, C, L>(
    service: Arc<ReconciliationService<T, D, C, L>>,
    default_system: String,
) -> Router
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let sync_routes = Router::new()
        .route(
            "/api/v1/recon/tranches/:tranche_id/sync",
            post(sync_handler::<T, D, C, L>),
        )
        .with_state(SyncState {
            service: service.clone(),
            default_system: Arc::from(default_system),
        });

    Router::new()
        .route(
            "/api/v1/recon/transactions",
            post(record_transaction_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/transactions/:transaction_id/split",
            post(split_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/transactions/:transaction_id/category",
            post(categorize_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/contracts",
            post(register_contract_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/tranches",
            post(ingest_tranche_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/tranches/:tranche_id",
            get(tranche_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/tranches/:tranche_id/matches",
            get(propose_matches_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/tranches/:tranche_id/confirm",
            post(confirm_mapping_handler::<T, D, C, L>),
        )
        .route(
            "/api/v1/recon/summary",
            get(summary_handler::<T, D, C, L>),
        )
        .route("/api/v1/recon/risk", get(risk_handler::<T, D, C, L>))
        .with_state(service)
        .merge(sync_routes)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SplitRequest {
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategorizeRequest {
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConfirmRequest {
    pub family_id: FamilyId,
    pub contract_id: ContractId,
    pub confirmed_by: String,
    #[serde(default)]
    pub acknowledge_amount_mismatch: bool,
    #[serde(default)]
    pub confirmed_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncRequest {
    #[serde(default)]
    pub system: Option<String>,
}

async fn record_transaction_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    axum::Json(draft): axum::Json<TransactionDraft>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    match service.record_transaction(draft) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn split_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    Path(transaction_id): Path<String>,
    axum::Json(request): axum::Json<SplitRequest>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TransactionId(transaction_id);
    match service.split_transaction(&id, request.allocations) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn categorize_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    Path(transaction_id): Path<String>,
    axum::Json(request): axum::Json<CategorizeRequest>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TransactionId(transaction_id);
    match service.categorize_transaction(&id, request.category) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn register_contract_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    axum::Json(contract): axum::Json<Contract>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    match service.register_contract(contract) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(error) => error_response(error),
    }
}

async fn ingest_tranche_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    axum::Json(draft): axum::Json<TrancheDraft>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    match service.ingest_tranche(draft) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn tranche_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    Path(tranche_id): Path<String>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TrancheId(tranche_id);
    match service.tranche(&id) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn propose_matches_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    Path(tranche_id): Path<String>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TrancheId(tranche_id);
    match service.propose_matches(&id) {
        Ok(reports) => (StatusCode::OK, axum::Json(reports)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn confirm_mapping_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
    Path(tranche_id): Path<String>,
    axum::Json(request): axum::Json<ConfirmRequest>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TrancheId(tranche_id);
    let today = request
        .confirmed_on
        .unwrap_or_else(|| Local::now().date_naive());
    match service.confirm_mapping(
        &id,
        &request.family_id,
        &request.contract_id,
        &request.confirmed_by,
        request.acknowledge_amount_mismatch,
        today,
    ) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn sync_handler<T, D, C, L>(
    State(state): State<SyncState<T, D, C, L>>,
    Path(tranche_id): Path<String>,
    axum::Json(request): axum::Json<SyncRequest>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let id = TrancheId(tranche_id);
    let system = request.system.as_deref().unwrap_or(&state.default_system);
    match state.service.sync_to_accounting(&id, system) {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn summary_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    let deposits = match service.tranches_snapshot() {
        Ok(deposits) => deposits,
        Err(error) => return error_response(error),
    };
    let transactions = match service.transactions_snapshot() {
        Ok(transactions) => transactions,
        Err(error) => return error_response(error),
    };
    let summary = reconciliation_summary(&deposits, &transactions);
    (StatusCode::OK, axum::Json(summary)).into_response()
}

async fn risk_handler<T, D, C, L>(
    State(service): State<Arc<ReconciliationService<T, D, C, L>>>,
) -> Response
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    match service.contracts_snapshot() {
        Ok(contracts) => {
            let view = RiskSummaryView::from_summary(&portfolio_summary(&contracts));
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

/// Map service errors to responses that name the violated invariant.
fn error_response(error: ReconciliationServiceError) -> Response {
    let status = match &error {
        ReconciliationServiceError::Split(_)
        | ReconciliationServiceError::TrancheTotalMismatch { .. }
        | ReconciliationServiceError::NonPositiveAmount { .. }
        | ReconciliationServiceError::NonPositiveLineAmount { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ReconciliationServiceError::OverrideNotAcknowledged { .. }
        | ReconciliationServiceError::Ledger(_)
        | ReconciliationServiceError::AlreadySynced(_)
        | ReconciliationServiceError::Repository(RepositoryError::Conflict)
        | ReconciliationServiceError::Repository(RepositoryError::VersionConflict { .. }) => {
            StatusCode::CONFLICT
        }
        ReconciliationServiceError::TransactionNotFound(_)
        | ReconciliationServiceError::TrancheNotFound(_)
        | ReconciliationServiceError::ContractNotFound(_)
        | ReconciliationServiceError::LineNotFound { .. }
        | ReconciliationServiceError::Repository(RepositoryError::NotFound) => {
            StatusCode::NOT_FOUND
        }
        ReconciliationServiceError::UnknownAccountingSystem(_) => StatusCode::BAD_REQUEST,
        ReconciliationServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}
