use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Allocation, ConfirmedMapping, Contract, ContractId, Direction, FamilyId, FamilyPaymentLine,
    Money, PaymentOutcome, PaymentRecord, PaymentTimeliness, ReceiptStatus, ReconciliationStatus,
    Transaction, TransactionId, TransactionStatus, TrancheDeposit, TrancheId,
};
use super::ledger::{self, LedgerGenerationError};
use super::matching::{LineMatchReport, MatchConfig, MatchingEngine};
use super::repository::{
    ContractStore, InMemoryContractStore, InMemoryLedgerSink, InMemoryTrancheStore,
    InMemoryTransactionStore, LedgerEntrySink, RepositoryError, TransactionStore, TrancheStore,
};
use super::risk;
use super::split::{self, AllocationMismatch};

/// Facade composing the stores, matching engine, risk tracker, and ledger
/// generator.
///
/// Each tranche deposit and each contract has a single logical owner:
/// confirm-and-sync operations serialize behind `batch_guard` so a batch's
/// reconciliation status and its mapped lines mutate together, and contract
/// risk recomputation never interleaves. Split validation runs outside the
/// guard since distinct transactions are independent.
pub struct ReconciliationService<T, D, C, L> {
    transactions: Arc<T>,
    tranches: Arc<D>,
    contracts: Arc<C>,
    ledger: Arc<L>,
    engine: MatchingEngine,
    batch_guard: Mutex<()>,
}

/// Feed-ingested transaction before the store assigns lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub direction: Direction,
    pub account_ref: String,
    #[serde(default)]
    pub memo: Option<String>,
    pub requires_split: bool,
}

/// Processor-supplied deposit batch before ingestion validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheDraft {
    pub id: TrancheId,
    pub provider: String,
    pub deposit_date: NaiveDate,
    pub total_amount: Money,
    pub payment_method: String,
    pub lines: Vec<PaymentLineDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLineDraft {
    pub family_id: FamilyId,
    pub family_name: String,
    pub students: Vec<String>,
    pub amount: Money,
    pub period: String,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub esa_funded: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Result of a successful sync-to-accounting run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub tranche_id: TrancheId,
    pub system: String,
    pub entries_written: usize,
    pub contracts_updated: usize,
}

/// Error raised by the reconciliation facade. Validation failures block the
/// operation and leave prior state untouched; advisory matching outcomes are
/// returned as flags, never through this enum.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationServiceError {
    #[error(transparent)]
    Split(#[from] AllocationMismatch),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerGenerationError),
    #[error(
        "tranche {} line total {actual_cents} cents does not equal deposit total {expected_cents} cents (delta {})",
        tranche_id.0,
        actual_cents - expected_cents
    )]
    TrancheTotalMismatch {
        tranche_id: TrancheId,
        expected_cents: i64,
        actual_cents: i64,
    },
    #[error(
        "transaction {} amount {amount} is not positive; direction carries the sign",
        id.0
    )]
    NonPositiveAmount { id: TransactionId, amount: Money },
    #[error(
        "tranche {} line for family {} has non-positive amount {amount}",
        tranche_id.0,
        family_id.0
    )]
    NonPositiveLineAmount {
        tranche_id: TrancheId,
        family_id: FamilyId,
        amount: Money,
    },
    #[error("transaction {} not found", .0 .0)]
    TransactionNotFound(TransactionId),
    #[error("tranche {} not found", .0 .0)]
    TrancheNotFound(TrancheId),
    #[error("contract {} not found", .0 .0)]
    ContractNotFound(ContractId),
    #[error("tranche {} has no line for family {}", tranche_id.0, family_id.0)]
    LineNotFound {
        tranche_id: TrancheId,
        family_id: FamilyId,
    },
    #[error(
        "paid amount {paid} differs from contract tuition {tuition} for family {}; override must be acknowledged",
        family_id.0
    )]
    OverrideNotAcknowledged {
        family_id: FamilyId,
        paid: Money,
        tuition: Money,
    },
    #[error("unknown accounting system '{0}'")]
    UnknownAccountingSystem(String),
    #[error("tranche {} is already fully mapped and synced", .0 .0)]
    AlreadySynced(TrancheId),
}

impl<T, D, C, L> ReconciliationService<T, D, C, L>
where
    T: TransactionStore + 'static,
    D: TrancheStore + 'static,
    C: ContractStore + 'static,
    L: LedgerEntrySink + 'static,
{
    pub fn new(
        transactions: Arc<T>,
        tranches: Arc<D>,
        contracts: Arc<C>,
        ledger: Arc<L>,
        config: MatchConfig,
    ) -> Self {
        Self {
            transactions,
            tranches,
            contracts,
            ledger,
            engine: MatchingEngine::new(config),
            batch_guard: Mutex::new(()),
        }
    }

    pub fn matching_engine(&self) -> &MatchingEngine {
        &self.engine
    }

    /// Record a feed transaction. Splittable transactions start in
    /// `needs_split`, the rest await a ledger category. Amounts are
    /// magnitudes, `direction` carries the sign, so zero and negative
    /// amounts are rejected.
    pub fn record_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<Transaction, ReconciliationServiceError> {
        if !draft.amount.is_positive() {
            return Err(ReconciliationServiceError::NonPositiveAmount {
                id: draft.id,
                amount: draft.amount,
            });
        }
        let status = if draft.requires_split {
            TransactionStatus::NeedsSplit
        } else {
            TransactionStatus::NeedsCategory
        };
        let record = Transaction {
            id: draft.id,
            date: draft.date,
            description: draft.description,
            amount: draft.amount,
            direction: draft.direction,
            account_ref: draft.account_ref,
            memo: draft.memo,
            requires_split: draft.requires_split,
            status,
            category: None,
            allocations: Vec::new(),
        };
        self.transactions.insert(record.clone())?;
        Ok(record)
    }

    /// Ingest a corrected copy of an existing transaction. The original is
    /// never deleted; the correction's memo references the superseded id.
    pub fn correct_transaction(
        &self,
        superseded: &TransactionId,
        mut draft: TransactionDraft,
    ) -> Result<Transaction, ReconciliationServiceError> {
        if self.transactions.fetch(superseded)?.is_none() {
            return Err(ReconciliationServiceError::TransactionNotFound(
                superseded.clone(),
            ));
        }
        let reference = format!("supersedes {}", superseded.0);
        draft.memo = Some(match draft.memo.take() {
            Some(memo) => format!("{memo}; {reference}"),
            None => reference,
        });
        self.record_transaction(draft)
    }

    /// Validate and apply a proposed split. Rejection leaves the stored
    /// transaction untouched.
    pub fn split_transaction(
        &self,
        id: &TransactionId,
        allocations: Vec<Allocation>,
    ) -> Result<Transaction, ReconciliationServiceError> {
        let versioned = self
            .transactions
            .fetch(id)?
            .ok_or_else(|| ReconciliationServiceError::TransactionNotFound(id.clone()))?;

        let mut record = versioned.record;
        split::apply_split(&mut record, allocations)?;
        self.transactions.update(record.clone(), versioned.version)?;
        Ok(record)
    }

    /// Assign a ledger category to a transaction that needs no split.
    pub fn categorize_transaction(
        &self,
        id: &TransactionId,
        category: String,
    ) -> Result<Transaction, ReconciliationServiceError> {
        let versioned = self
            .transactions
            .fetch(id)?
            .ok_or_else(|| ReconciliationServiceError::TransactionNotFound(id.clone()))?;

        let mut record = versioned.record;
        split::categorize(&mut record, category);
        self.transactions.update(record.clone(), versioned.version)?;
        Ok(record)
    }

    /// Register an enrollment contract created by the enrollment flow.
    pub fn register_contract(&self, contract: Contract) -> Result<(), ReconciliationServiceError> {
        self.contracts.insert(contract)?;
        Ok(())
    }

    /// Ingest a processor deposit batch. Every line amount must be positive
    /// and the lines must sum exactly to the stated total or the whole
    /// batch is rejected.
    pub fn ingest_tranche(
        &self,
        draft: TrancheDraft,
    ) -> Result<TrancheDeposit, ReconciliationServiceError> {
        if let Some(line) = draft.lines.iter().find(|line| !line.amount.is_positive()) {
            return Err(ReconciliationServiceError::NonPositiveLineAmount {
                tranche_id: draft.id.clone(),
                family_id: line.family_id.clone(),
                amount: line.amount,
            });
        }

        let line_total: Money = draft.lines.iter().map(|line| line.amount).sum();
        if line_total != draft.total_amount {
            return Err(ReconciliationServiceError::TrancheTotalMismatch {
                tranche_id: draft.id,
                expected_cents: draft.total_amount.cents(),
                actual_cents: line_total.cents(),
            });
        }

        let deposit_date = draft.deposit_date;
        let lines = draft
            .lines
            .into_iter()
            .map(|line| {
                let days_late = days_between(line.due_date, deposit_date);
                FamilyPaymentLine {
                    family_id: line.family_id,
                    family_name: line.family_name,
                    students: line.students,
                    amount: line.amount,
                    period: line.period,
                    due_date: line.due_date,
                    timeliness: if days_late > 0 {
                        PaymentTimeliness::Late
                    } else {
                        PaymentTimeliness::Current
                    },
                    days_late,
                    esa_funded: line.esa_funded,
                    note: line.note,
                    mapping: None,
                    flags: Vec::new(),
                }
            })
            .collect();

        let record = TrancheDeposit {
            id: draft.id,
            provider: draft.provider,
            deposit_date,
            total_amount: draft.total_amount,
            payment_method: draft.payment_method,
            receipt_status: ReceiptStatus::Pending,
            reconciliation_status: ReconciliationStatus::Unmapped,
            lines,
        };
        self.tranches.insert(record.clone())?;
        info!(
            tranche_id = %record.id.0,
            provider = %record.provider,
            total = %record.total_amount,
            lines = record.lines.len(),
            "tranche deposit ingested"
        );
        Ok(record)
    }

    /// Run the matching engine over every line of a deposit, persist the
    /// advisory flags, and return the ranked candidates per line.
    pub fn propose_matches(
        &self,
        tranche_id: &TrancheId,
    ) -> Result<Vec<LineMatchReport>, ReconciliationServiceError> {
        let versioned = self
            .tranches
            .fetch(tranche_id)?
            .ok_or_else(|| ReconciliationServiceError::TrancheNotFound(tranche_id.clone()))?;

        let mut contracts = self.contracts.all()?;
        contracts.sort_by(|a, b| a.id.cmp(&b.id));

        let mut deposit = versioned.record;
        let reports: Vec<LineMatchReport> = deposit
            .lines
            .iter()
            .map(|line| self.engine.propose(line, &contracts))
            .collect();

        for (line, report) in deposit.lines.iter_mut().zip(&reports) {
            line.flags = report.flags.clone();
        }
        recompute_status(&mut deposit);
        self.tranches.update(deposit, versioned.version)?;

        Ok(reports)
    }

    /// Confirm a (line, contract) mapping on behalf of a named confirmer.
    ///
    /// A paid amount differing from the contract tuition requires the caller
    /// to acknowledge the override explicitly; the acknowledgement is kept
    /// on the audit record.
    pub fn confirm_mapping(
        &self,
        tranche_id: &TrancheId,
        family_id: &FamilyId,
        contract_id: &ContractId,
        confirmed_by: &str,
        acknowledge_amount_mismatch: bool,
        today: NaiveDate,
    ) -> Result<TrancheDeposit, ReconciliationServiceError> {
        let _guard = self.batch_guard.lock().expect("batch guard poisoned");

        let versioned = self
            .tranches
            .fetch(tranche_id)?
            .ok_or_else(|| ReconciliationServiceError::TrancheNotFound(tranche_id.clone()))?;
        let contract = self
            .contracts
            .fetch(contract_id)?
            .ok_or_else(|| ReconciliationServiceError::ContractNotFound(contract_id.clone()))?
            .record;

        let mut deposit = versioned.record;
        let line = deposit.line_mut(family_id).ok_or_else(|| {
            ReconciliationServiceError::LineNotFound {
                tranche_id: tranche_id.clone(),
                family_id: family_id.clone(),
            }
        })?;

        let amount_differs = line.amount != contract.monthly_tuition;
        if amount_differs && !acknowledge_amount_mismatch {
            return Err(ReconciliationServiceError::OverrideNotAcknowledged {
                family_id: family_id.clone(),
                paid: line.amount,
                tuition: contract.monthly_tuition,
            });
        }

        line.mapping = Some(ConfirmedMapping {
            contract_id: contract_id.clone(),
            confirmed_by: confirmed_by.to_string(),
            confirmed_on: today,
            amount_override_acknowledged: amount_differs,
        });

        recompute_status(&mut deposit);
        self.tranches.update(deposit.clone(), versioned.version)?;

        info!(
            tranche_id = %tranche_id.0,
            family_id = %family_id.0,
            contract_id = %contract_id.0,
            confirmed_by,
            "payment line mapping confirmed"
        );
        Ok(deposit)
    }

    /// Confirm every line whose top candidate clears the auto-map threshold
    /// with a family-id match, on behalf of a named automated policy.
    /// Returns the families confirmed.
    pub fn auto_confirm_eligible(
        &self,
        tranche_id: &TrancheId,
        policy: &str,
        today: NaiveDate,
    ) -> Result<Vec<FamilyId>, ReconciliationServiceError> {
        let reports = self.propose_matches(tranche_id)?;
        let threshold = self.engine.config().auto_map_threshold;

        let mut confirmed = Vec::new();
        for report in reports {
            if !report.auto_mappable(threshold) {
                continue;
            }
            let top = match report.top() {
                Some(candidate) => candidate.clone(),
                None => continue,
            };
            self.confirm_mapping(
                tranche_id,
                &report.family_id,
                &top.contract_id,
                policy,
                true,
                today,
            )?;
            confirmed.push(report.family_id);
        }
        Ok(confirmed)
    }

    /// Generate and persist ledger entries for a fully confirmed batch, then
    /// append one payment record per affected contract.
    ///
    /// All-or-nothing: any unmapped line aborts before entries are written
    /// and the deposit keeps its prior status.
    pub fn sync_to_accounting(
        &self,
        tranche_id: &TrancheId,
        system: &str,
    ) -> Result<SyncOutcome, ReconciliationServiceError> {
        let _guard = self.batch_guard.lock().expect("batch guard poisoned");

        let format = ledger::format_for(system)
            .ok_or_else(|| ReconciliationServiceError::UnknownAccountingSystem(system.to_string()))?;

        let versioned = self
            .tranches
            .fetch(tranche_id)?
            .ok_or_else(|| ReconciliationServiceError::TrancheNotFound(tranche_id.clone()))?;
        let mut deposit = versioned.record;

        if deposit.reconciliation_status == ReconciliationStatus::FullyMapped {
            return Err(ReconciliationServiceError::AlreadySynced(tranche_id.clone()));
        }

        let mut contracts = BTreeMap::new();
        for line in &deposit.lines {
            if let Some(mapping) = &line.mapping {
                let contract = self
                    .contracts
                    .fetch(&mapping.contract_id)?
                    .ok_or_else(|| {
                        ReconciliationServiceError::ContractNotFound(mapping.contract_id.clone())
                    })?
                    .record;
                contracts.insert(mapping.contract_id.clone(), contract);
            }
        }

        let entries = ledger::generate_entries(&deposit, &contracts, format.as_ref())?;
        let entries_written = entries.len();
        self.ledger.append_batch(entries)?;

        let mut contracts_updated = 0;
        for line in &deposit.lines {
            let mapping = match &line.mapping {
                Some(mapping) => mapping,
                None => continue,
            };
            let contract_versioned = self
                .contracts
                .fetch(&mapping.contract_id)?
                .ok_or_else(|| {
                    ReconciliationServiceError::ContractNotFound(mapping.contract_id.clone())
                })?;
            let mut contract = contract_versioned.record;

            let assessment = risk::record_payment(
                &mut contract,
                PaymentRecord {
                    date: deposit.deposit_date,
                    amount: line.amount,
                    outcome: if line.days_late > 0 {
                        PaymentOutcome::Late
                    } else {
                        PaymentOutcome::Paid
                    },
                    method: deposit.payment_method.clone(),
                    days_late: line.days_late,
                },
            );
            self.contracts
                .update(contract, contract_versioned.version)?;
            contracts_updated += 1;

            info!(
                contract_id = %mapping.contract_id.0,
                risk_level = assessment.level.label(),
                mean_days_late = assessment.mean_days_late,
                "contract risk recomputed"
            );
        }

        deposit.reconciliation_status = ReconciliationStatus::FullyMapped;
        self.tranches.update(deposit, versioned.version)?;

        info!(
            tranche_id = %tranche_id.0,
            system,
            entries_written,
            contracts_updated,
            "tranche synced to accounting"
        );

        Ok(SyncOutcome {
            tranche_id: tranche_id.clone(),
            system: format.system_id().to_string(),
            entries_written,
            contracts_updated,
        })
    }

    pub fn tranche(
        &self,
        tranche_id: &TrancheId,
    ) -> Result<TrancheDeposit, ReconciliationServiceError> {
        Ok(self
            .tranches
            .fetch(tranche_id)?
            .ok_or_else(|| ReconciliationServiceError::TrancheNotFound(tranche_id.clone()))?
            .record)
    }

    pub fn transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Transaction, ReconciliationServiceError> {
        Ok(self
            .transactions
            .fetch(id)?
            .ok_or_else(|| ReconciliationServiceError::TransactionNotFound(id.clone()))?
            .record)
    }

    pub fn contracts_snapshot(&self) -> Result<Vec<Contract>, ReconciliationServiceError> {
        let mut contracts = self.contracts.all()?;
        contracts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(contracts)
    }

    pub fn transactions_snapshot(&self) -> Result<Vec<Transaction>, ReconciliationServiceError> {
        let mut records = self.transactions.all()?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub fn tranches_snapshot(&self) -> Result<Vec<TrancheDeposit>, ReconciliationServiceError> {
        let mut deposits = self.tranches.all()?;
        deposits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(deposits)
    }

    pub fn ledger_entries(&self) -> Result<Vec<super::domain::LedgerEntry>, ReconciliationServiceError> {
        Ok(self.ledger.all()?)
    }
}

/// Fully in-memory wiring used by the HTTP server, the offline preview
/// command, and tests.
pub type InMemoryReconciliationService = ReconciliationService<
    InMemoryTransactionStore,
    InMemoryTrancheStore,
    InMemoryContractStore,
    InMemoryLedgerSink,
>;

impl InMemoryReconciliationService {
    pub fn in_memory(config: MatchConfig) -> Self {
        Self::new(
            Arc::new(InMemoryTransactionStore::default()),
            Arc::new(InMemoryTrancheStore::default()),
            Arc::new(InMemoryContractStore::default()),
            Arc::new(InMemoryLedgerSink::default()),
            config,
        )
    }
}

/// Derive the deposit's reconciliation status from its lines.
///
/// `fully_mapped` is only ever set by a successful sync. Before that, a
/// deposit with an unconfirmed line carrying a high-severity advisory flag
/// shows `needs_attention`; otherwise the status follows the confirmed-line
/// count.
fn recompute_status(deposit: &mut TrancheDeposit) {
    if deposit.reconciliation_status == ReconciliationStatus::FullyMapped {
        return;
    }

    let needs_attention = deposit
        .lines
        .iter()
        .any(|line| line.mapping.is_none() && line.has_high_severity_flag());
    if needs_attention {
        deposit.reconciliation_status = ReconciliationStatus::NeedsAttention;
        return;
    }

    deposit.reconciliation_status = if deposit.confirmed_count() == 0 {
        ReconciliationStatus::Unmapped
    } else {
        ReconciliationStatus::PartiallyMapped
    };
}

fn days_between(due: NaiveDate, paid: NaiveDate) -> u32 {
    let days = (paid - due).num_days();
    if days > 0 {
        days as u32
    } else {
        0
    }
}
