//! Tranche payment reconciliation: feed transaction splitting, tranche
//! deposit matching against enrollment contracts, contract risk scoring,
//! and ledger entry generation for downstream accounting systems.

pub mod domain;
pub mod ledger;
pub mod matching;
pub mod processor;
pub mod report;
pub mod repository;
pub mod risk;
pub mod router;
pub mod service;
pub mod split;

pub use domain::{
    Contract, ContractId, FamilyId, FamilyPaymentLine, Money, Transaction, TransactionId,
    TrancheDeposit, TrancheId,
};
pub use matching::{LineMatchReport, MatchConfig, MatchingEngine};
pub use repository::{
    InMemoryContractStore, InMemoryLedgerSink, InMemoryTrancheStore, InMemoryTransactionStore,
};
pub use router::reconciliation_router;
pub use service::{ReconciliationService, ReconciliationServiceError};
