use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::domain::{
    Contract, ContractId, LedgerEntry, Transaction, TransactionId, TrancheDeposit, TrancheId,
};

/// A record together with the version the store assigned to it. Updates must
/// present the version they read so stale read-modify-write cycles are
/// rejected instead of silently clobbering newer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale update: expected version {expected}, store has {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store for feed transactions. No delete: corrections are ingested as
/// new records that supersede the old one.
pub trait TransactionStore: Send + Sync {
    fn insert(&self, record: Transaction) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &TransactionId) -> Result<Option<Versioned<Transaction>>, RepositoryError>;
    fn update(&self, record: Transaction, expected_version: u64) -> Result<(), RepositoryError>;
    fn all(&self) -> Result<Vec<Transaction>, RepositoryError>;
}

/// Keyed store for tranche deposits.
pub trait TrancheStore: Send + Sync {
    fn insert(&self, record: TrancheDeposit) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &TrancheId) -> Result<Option<Versioned<TrancheDeposit>>, RepositoryError>;
    fn update(&self, record: TrancheDeposit, expected_version: u64) -> Result<(), RepositoryError>;
    fn all(&self) -> Result<Vec<TrancheDeposit>, RepositoryError>;
}

/// Keyed store for enrollment contracts.
pub trait ContractStore: Send + Sync {
    fn insert(&self, record: Contract) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ContractId) -> Result<Option<Versioned<Contract>>, RepositoryError>;
    fn update(&self, record: Contract, expected_version: u64) -> Result<(), RepositoryError>;
    fn all(&self) -> Result<Vec<Contract>, RepositoryError>;
}

/// Append-only sink for generated ledger entries.
pub trait LedgerEntrySink: Send + Sync {
    fn append_batch(&self, entries: Vec<LedgerEntry>) -> Result<(), RepositoryError>;
    fn all(&self) -> Result<Vec<LedgerEntry>, RepositoryError>;
}

#[derive(Debug)]
struct Keyed<K, V> {
    records: Mutex<HashMap<K, Versioned<V>>>,
}

impl<K, V> Default for Keyed<K, V> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Keyed<K, V> {
    fn insert(&self, key: K, record: V) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
        if guard.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(key, Versioned { version: 1, record });
        Ok(())
    }

    fn fetch(&self, key: &K) -> Result<Option<Versioned<V>>, RepositoryError> {
        let guard = self.records.lock().expect("store mutex poisoned");
        Ok(guard.get(key).cloned())
    }

    fn update(&self, key: K, record: V, expected_version: u64) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("store mutex poisoned");
        match guard.get_mut(&key) {
            Some(existing) => {
                if existing.version != expected_version {
                    return Err(RepositoryError::VersionConflict {
                        expected: expected_version,
                        actual: existing.version,
                    });
                }
                existing.version += 1;
                existing.record = record;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn all(&self) -> Result<Vec<V>, RepositoryError> {
        let guard = self.records.lock().expect("store mutex poisoned");
        Ok(guard.values().map(|entry| entry.record.clone()).collect())
    }
}

/// In-memory transaction store backing the service and tests.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    inner: Arc<Keyed<TransactionId, Transaction>>,
}

impl TransactionStore for InMemoryTransactionStore {
    fn insert(&self, record: Transaction) -> Result<(), RepositoryError> {
        self.inner.insert(record.id.clone(), record)
    }

    fn fetch(&self, id: &TransactionId) -> Result<Option<Versioned<Transaction>>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update(&self, record: Transaction, expected_version: u64) -> Result<(), RepositoryError> {
        self.inner.update(record.id.clone(), record, expected_version)
    }

    fn all(&self) -> Result<Vec<Transaction>, RepositoryError> {
        self.inner.all()
    }
}

#[derive(Default)]
pub struct InMemoryTrancheStore {
    inner: Arc<Keyed<TrancheId, TrancheDeposit>>,
}

impl TrancheStore for InMemoryTrancheStore {
    fn insert(&self, record: TrancheDeposit) -> Result<(), RepositoryError> {
        self.inner.insert(record.id.clone(), record)
    }

    fn fetch(&self, id: &TrancheId) -> Result<Option<Versioned<TrancheDeposit>>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update(&self, record: TrancheDeposit, expected_version: u64) -> Result<(), RepositoryError> {
        self.inner.update(record.id.clone(), record, expected_version)
    }

    fn all(&self) -> Result<Vec<TrancheDeposit>, RepositoryError> {
        self.inner.all()
    }
}

#[derive(Default)]
pub struct InMemoryContractStore {
    inner: Arc<Keyed<ContractId, Contract>>,
}

impl ContractStore for InMemoryContractStore {
    fn insert(&self, record: Contract) -> Result<(), RepositoryError> {
        self.inner.insert(record.id.clone(), record)
    }

    fn fetch(&self, id: &ContractId) -> Result<Option<Versioned<Contract>>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update(&self, record: Contract, expected_version: u64) -> Result<(), RepositoryError> {
        self.inner.update(record.id.clone(), record, expected_version)
    }

    fn all(&self) -> Result<Vec<Contract>, RepositoryError> {
        self.inner.all()
    }
}

/// In-memory ledger sink; batches append atomically.
#[derive(Default)]
pub struct InMemoryLedgerSink {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl LedgerEntrySink for InMemoryLedgerSink {
    fn append_batch(&self, entries: Vec<LedgerEntry>) -> Result<(), RepositoryError> {
        let mut guard = self.entries.lock().expect("ledger mutex poisoned");
        guard.extend(entries);
        Ok(())
    }

    fn all(&self) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let guard = self.entries.lock().expect("ledger mutex poisoned");
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::workflows::reconciliation::domain::{
        ContractStatus, FamilyId, Money, RiskLevel,
    };

    fn contract(id: &str) -> Contract {
        Contract {
            id: ContractId(id.to_string()),
            family_id: FamilyId("fam-a".to_string()),
            family_name: "A".to_string(),
            student_count: 1,
            monthly_tuition: Money::from_cents(50_000),
            status: ContractStatus::Current,
            risk_level: RiskLevel::Low,
            history: Vec::new(),
            next_due_date: NaiveDate::from_ymd_opt(2026, 2, 1).expect("valid date"),
            intervention_needed: false,
            esa_funded: false,
        }
    }

    #[test]
    fn insert_then_fetch_starts_at_version_one() {
        let store = InMemoryContractStore::default();
        store.insert(contract("ct-1")).expect("insert");

        let fetched = store
            .fetch(&ContractId("ct-1".to_string()))
            .expect("fetch")
            .expect("present");
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let store = InMemoryContractStore::default();
        store.insert(contract("ct-1")).expect("insert");
        assert_eq!(
            store.insert(contract("ct-1")),
            Err(RepositoryError::Conflict)
        );
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = InMemoryContractStore::default();
        store.insert(contract("ct-1")).expect("insert");

        let mut updated = contract("ct-1");
        updated.intervention_needed = true;
        store.update(updated.clone(), 1).expect("fresh update");

        let error = store.update(updated, 1).expect_err("stale version");
        assert_eq!(
            error,
            RepositoryError::VersionConflict {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn updating_a_missing_record_is_not_found() {
        let store = InMemoryContractStore::default();
        assert_eq!(
            store.update(contract("ct-9"), 1),
            Err(RepositoryError::NotFound)
        );
    }
}
