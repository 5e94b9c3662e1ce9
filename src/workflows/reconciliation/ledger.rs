use std::collections::BTreeMap;

use super::domain::{
    Contract, ContractId, FamilyId, FamilyPaymentLine, LedgerEntry, LedgerEntryType, TrancheDeposit,
    TrancheId,
};

/// Field vocabulary of one external accounting system.
///
/// Each target system names its customer reference, classification tag, and
/// memo fields differently; implementations translate our domain records
/// into that system's vocabulary without the generator knowing the details.
pub trait AccountingFormat: Send + Sync {
    fn system_id(&self) -> &'static str;
    fn deposit_account(&self) -> &'static str;
    fn revenue_account(&self) -> &'static str;
    fn deposit_fields(&self, deposit: &TrancheDeposit) -> BTreeMap<String, String>;
    fn revenue_fields(
        &self,
        line: &FamilyPaymentLine,
        contract: &Contract,
    ) -> BTreeMap<String, String>;
}

/// QuickBooks-style vocabulary (CustomerRef / ClassRef / Memo).
pub struct QuickBooksFormat;

impl AccountingFormat for QuickBooksFormat {
    fn system_id(&self) -> &'static str {
        "quickbooks"
    }

    fn deposit_account(&self) -> &'static str {
        "Undeposited Funds"
    }

    fn revenue_account(&self) -> &'static str {
        "Tuition Revenue"
    }

    fn deposit_fields(&self, deposit: &TrancheDeposit) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("PaymentMethodRef".to_string(), deposit.payment_method.clone());
        fields.insert("Memo".to_string(), format!("{} batch deposit", deposit.provider));
        fields
    }

    fn revenue_fields(
        &self,
        line: &FamilyPaymentLine,
        contract: &Contract,
    ) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "CustomerRef".to_string(),
            format!("{} ({})", contract.family_name, contract.id.0),
        );
        fields.insert("ClassRef".to_string(), classification(line).to_string());
        fields.insert(
            "Memo".to_string(),
            format!("Students: {}", line.students.join(", ")),
        );
        fields
    }
}

/// Xero-style vocabulary (ContactID / TrackingCategory / Reference).
pub struct XeroFormat;

impl AccountingFormat for XeroFormat {
    fn system_id(&self) -> &'static str {
        "xero"
    }

    fn deposit_account(&self) -> &'static str {
        "Bank Clearing"
    }

    fn revenue_account(&self) -> &'static str {
        "Tuition Income"
    }

    fn deposit_fields(&self, deposit: &TrancheDeposit) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("PaymentType".to_string(), deposit.payment_method.clone());
        fields.insert(
            "Reference".to_string(),
            format!("{} batch deposit", deposit.provider),
        );
        fields
    }

    fn revenue_fields(
        &self,
        line: &FamilyPaymentLine,
        contract: &Contract,
    ) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "ContactID".to_string(),
            format!("{}:{}", contract.family_id.0, contract.id.0),
        );
        fields.insert(
            "TrackingCategory".to_string(),
            classification(line).to_string(),
        );
        fields.insert(
            "Reference".to_string(),
            format!("Students: {}", line.students.join(", ")),
        );
        fields
    }
}

fn classification(line: &FamilyPaymentLine) -> &'static str {
    if line.esa_funded {
        "ESA Funded"
    } else {
        "Family Pay"
    }
}

/// Resolve a format by its system identifier.
pub fn format_for(system: &str) -> Option<Box<dyn AccountingFormat>> {
    match system.trim().to_ascii_lowercase().as_str() {
        "quickbooks" | "qb" => Some(Box::new(QuickBooksFormat)),
        "xero" => Some(Box::new(XeroFormat)),
        _ => None,
    }
}

/// Attempt to sync a batch with unresolved lines. Hard failure: the batch
/// sync is aborted entirely and no entries are produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerGenerationError {
    #[error("tranche {} has unmapped lines for families: {}", tranche_id.0, family_list(families))]
    UnmappedLines {
        tranche_id: TrancheId,
        families: Vec<FamilyId>,
    },
    #[error("line for family {} references unknown contract {}", family_id.0, contract_id.0)]
    UnknownContract {
        family_id: FamilyId,
        contract_id: ContractId,
    },
}

fn family_list(families: &[FamilyId]) -> String {
    families
        .iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the ledger entries for a fully mapped tranche deposit: exactly one
/// deposit entry for the batch total plus one revenue entry per line.
///
/// All-or-nothing: any unmapped line fails the whole batch before a single
/// entry is produced.
pub fn generate_entries(
    deposit: &TrancheDeposit,
    contracts: &BTreeMap<ContractId, Contract>,
    format: &dyn AccountingFormat,
) -> Result<Vec<LedgerEntry>, LedgerGenerationError> {
    let mut mapped = Vec::with_capacity(deposit.lines.len());
    let mut unmapped = Vec::new();
    for line in &deposit.lines {
        match &line.mapping {
            Some(mapping) => mapped.push((line, mapping)),
            None => unmapped.push(line.family_id.clone()),
        }
    }
    if !unmapped.is_empty() {
        return Err(LedgerGenerationError::UnmappedLines {
            tranche_id: deposit.id.clone(),
            families: unmapped,
        });
    }

    let mut entries = Vec::with_capacity(deposit.lines.len() + 1);
    entries.push(LedgerEntry {
        entry_type: LedgerEntryType::Deposit,
        system: format.system_id().to_string(),
        account: format.deposit_account().to_string(),
        amount: deposit.total_amount,
        date: deposit.deposit_date,
        description: format!("{} tranche {}", deposit.provider, deposit.id.0),
        custom: format.deposit_fields(deposit),
    });

    for (line, mapping) in mapped {
        let contract = contracts.get(&mapping.contract_id).ok_or_else(|| {
            LedgerGenerationError::UnknownContract {
                family_id: line.family_id.clone(),
                contract_id: mapping.contract_id.clone(),
            }
        })?;

        entries.push(LedgerEntry {
            entry_type: LedgerEntryType::Revenue,
            system: format.system_id().to_string(),
            account: format.revenue_account().to_string(),
            amount: line.amount,
            date: deposit.deposit_date,
            description: format!("Tuition {} - {}", line.period, line.family_name),
            custom: format.revenue_fields(line, contract),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::workflows::reconciliation::domain::{
        ConfirmedMapping, ContractStatus, Money, PaymentTimeliness, ReceiptStatus,
        ReconciliationStatus, RiskLevel,
    };

    fn contract(id: &str, family: &str) -> Contract {
        Contract {
            id: ContractId(id.to_string()),
            family_id: FamilyId(family.to_string()),
            family_name: family.to_string(),
            student_count: 2,
            monthly_tuition: Money::from_cents(80_000),
            status: ContractStatus::Current,
            risk_level: RiskLevel::Low,
            history: Vec::new(),
            next_due_date: NaiveDate::from_ymd_opt(2026, 2, 1).expect("valid date"),
            intervention_needed: false,
            esa_funded: false,
        }
    }

    fn mapped_line(family: &str, contract_id: &str, cents: i64, esa: bool) -> FamilyPaymentLine {
        FamilyPaymentLine {
            family_id: FamilyId(family.to_string()),
            family_name: family.to_string(),
            students: vec!["Ada".to_string(), "Ben".to_string()],
            amount: Money::from_cents(cents),
            period: "2026-01".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date"),
            timeliness: PaymentTimeliness::Current,
            days_late: 0,
            esa_funded: esa,
            note: None,
            mapping: Some(ConfirmedMapping {
                contract_id: ContractId(contract_id.to_string()),
                confirmed_by: "bursar@school".to_string(),
                confirmed_on: NaiveDate::from_ymd_opt(2026, 1, 8).expect("valid date"),
                amount_override_acknowledged: false,
            }),
            flags: Vec::new(),
        }
    }

    fn deposit(lines: Vec<FamilyPaymentLine>) -> TrancheDeposit {
        let total = lines.iter().map(|line| line.amount).sum();
        TrancheDeposit {
            id: TrancheId("tr-100".to_string()),
            provider: "ClassWallet".to_string(),
            deposit_date: NaiveDate::from_ymd_opt(2026, 1, 7).expect("valid date"),
            total_amount: total,
            payment_method: "ACH".to_string(),
            receipt_status: ReceiptStatus::Attached,
            reconciliation_status: ReconciliationStatus::PartiallyMapped,
            lines,
        }
    }

    #[test]
    fn fully_mapped_batch_yields_one_deposit_plus_one_revenue_per_line() {
        let contracts: BTreeMap<ContractId, Contract> = [
            (ContractId("ct-1".to_string()), contract("ct-1", "fam-a")),
            (ContractId("ct-2".to_string()), contract("ct-2", "fam-b")),
        ]
        .into_iter()
        .collect();
        let batch = deposit(vec![
            mapped_line("fam-a", "ct-1", 80_000, true),
            mapped_line("fam-b", "ct-2", 80_000, false),
        ]);

        let entries = generate_entries(&batch, &contracts, &QuickBooksFormat).expect("generates");

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, LedgerEntryType::Deposit);
        assert_eq!(entries[0].amount, Money::from_cents(160_000));
        assert_eq!(entries[0].date, batch.deposit_date);

        let revenue: Vec<_> = entries
            .iter()
            .filter(|entry| entry.entry_type == LedgerEntryType::Revenue)
            .collect();
        assert_eq!(revenue.len(), 2);
        assert_eq!(revenue[0].custom["ClassRef"], "ESA Funded");
        assert_eq!(revenue[1].custom["ClassRef"], "Family Pay");
        assert!(revenue[0].custom["Memo"].contains("Ada, Ben"));
    }

    #[test]
    fn one_unmapped_line_aborts_the_entire_batch() {
        let contracts: BTreeMap<ContractId, Contract> =
            [(ContractId("ct-1".to_string()), contract("ct-1", "fam-a"))]
                .into_iter()
                .collect();
        let mut unmapped = mapped_line("fam-b", "ct-2", 80_000, false);
        unmapped.mapping = None;
        let batch = deposit(vec![mapped_line("fam-a", "ct-1", 80_000, false), unmapped]);

        let error = generate_entries(&batch, &contracts, &QuickBooksFormat)
            .expect_err("partial batches cannot be synced");

        match error {
            LedgerGenerationError::UnmappedLines { families, .. } => {
                assert_eq!(families, vec![FamilyId("fam-b".to_string())]);
            }
            other => panic!("expected unmapped-lines error, got {other:?}"),
        }
    }

    #[test]
    fn formats_disagree_only_in_vocabulary() {
        let contracts: BTreeMap<ContractId, Contract> =
            [(ContractId("ct-1".to_string()), contract("ct-1", "fam-a"))]
                .into_iter()
                .collect();
        let batch = deposit(vec![mapped_line("fam-a", "ct-1", 80_000, true)]);

        let qb = generate_entries(&batch, &contracts, &QuickBooksFormat).expect("qb");
        let xero = generate_entries(&batch, &contracts, &XeroFormat).expect("xero");

        assert_eq!(qb.len(), xero.len());
        assert_eq!(qb[1].amount, xero[1].amount);
        assert!(qb[1].custom.contains_key("CustomerRef"));
        assert!(xero[1].custom.contains_key("ContactID"));
        assert_eq!(xero[1].custom["TrackingCategory"], "ESA Funded");
    }

    #[test]
    fn format_lookup_is_case_insensitive() {
        assert!(format_for("QuickBooks").is_some());
        assert!(format_for("XERO").is_some());
        assert!(format_for("sage").is_none());
    }
}
