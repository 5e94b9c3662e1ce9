use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use super::domain::{
    Contract, ContractId, ContractStatus, FamilyId, Money, MoneyParseError, RiskLevel, TrancheId,
};
use super::service::{PaymentLineDraft, TrancheDraft};

/// Failure while reading a processor export or contract roster CSV.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorImportError {
    #[error("failed to read export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: {source}")]
    Amount {
        row: usize,
        #[source]
        source: MoneyParseError,
    },
    #[error("row {row}: '{value}' is not a YYYY-MM-DD date")]
    Date { row: usize, value: String },
    #[error("export contains no payment rows")]
    Empty,
    #[error("rows disagree on tranche header fields (tranche id, provider, date, total)")]
    InconsistentHeader,
}

/// Importer for per-family payment exports from processor back offices
/// (ClassWallet, Omella, and similar). Every row repeats the batch header
/// columns; the importer folds them into one `TrancheDraft`.
pub struct ProcessorDepositImporter;

impl ProcessorDepositImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<TrancheDraft, ProcessorImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<TrancheDraft, ProcessorImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut draft: Option<TrancheDraft> = None;

        for (index, record) in csv_reader.deserialize::<DepositRow>().enumerate() {
            let row_number = index + 2;
            let row = record?;
            let line = row.to_line(row_number)?;

            match &mut draft {
                None => {
                    draft = Some(TrancheDraft {
                        id: TrancheId(row.tranche_id.clone()),
                        provider: row.provider.clone(),
                        deposit_date: parse_date(&row.deposit_date, row_number)?,
                        total_amount: parse_amount(&row.total_amount, row_number)?,
                        payment_method: row.method.clone(),
                        lines: vec![line],
                    });
                }
                Some(existing) => {
                    if existing.id.0 != row.tranche_id || existing.provider != row.provider {
                        return Err(ProcessorImportError::InconsistentHeader);
                    }
                    existing.lines.push(line);
                }
            }
        }

        draft.ok_or(ProcessorImportError::Empty)
    }
}

#[derive(Debug, Deserialize)]
struct DepositRow {
    #[serde(rename = "Tranche ID")]
    tranche_id: String,
    #[serde(rename = "Provider")]
    provider: String,
    #[serde(rename = "Deposit Date")]
    deposit_date: String,
    #[serde(rename = "Total Amount")]
    total_amount: String,
    #[serde(rename = "Method")]
    method: String,
    #[serde(rename = "Family ID")]
    family_id: String,
    #[serde(rename = "Family Name")]
    family_name: String,
    #[serde(rename = "Students")]
    students: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "Period")]
    period: String,
    #[serde(rename = "Due Date")]
    due_date: String,
    #[serde(rename = "ESA", default, deserialize_with = "empty_string_as_none")]
    esa: Option<String>,
    #[serde(rename = "Note", default, deserialize_with = "empty_string_as_none")]
    note: Option<String>,
}

impl DepositRow {
    fn to_line(&self, row: usize) -> Result<PaymentLineDraft, ProcessorImportError> {
        Ok(PaymentLineDraft {
            family_id: FamilyId(self.family_id.clone()),
            family_name: self.family_name.clone(),
            students: split_students(&self.students),
            amount: parse_amount(&self.amount, row)?,
            period: self.period.clone(),
            due_date: parse_date(&self.due_date, row)?,
            esa_funded: parse_flag(self.esa.as_deref()),
            note: self.note.clone(),
        })
    }
}

/// Importer for the enrollment contract roster used by the offline preview
/// command.
pub struct ContractRosterImporter;

impl ContractRosterImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Contract>, ProcessorImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<Contract>, ProcessorImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut contracts = Vec::new();
        for (index, record) in csv_reader.deserialize::<ContractRow>().enumerate() {
            let row_number = index + 2;
            let row = record?;
            contracts.push(Contract {
                id: ContractId(row.contract_id),
                family_id: FamilyId(row.family_id),
                family_name: row.family_name,
                student_count: row.students,
                monthly_tuition: parse_amount(&row.monthly_tuition, row_number)?,
                status: ContractStatus::Current,
                risk_level: RiskLevel::Low,
                history: Vec::new(),
                next_due_date: parse_date(&row.next_due, row_number)?,
                intervention_needed: false,
                esa_funded: parse_flag(row.esa.as_deref()),
            });
        }
        Ok(contracts)
    }
}

#[derive(Debug, Deserialize)]
struct ContractRow {
    #[serde(rename = "Contract ID")]
    contract_id: String,
    #[serde(rename = "Family ID")]
    family_id: String,
    #[serde(rename = "Family Name")]
    family_name: String,
    #[serde(rename = "Students")]
    students: u32,
    #[serde(rename = "Monthly Tuition")]
    monthly_tuition: String,
    #[serde(rename = "Next Due")]
    next_due: String,
    #[serde(rename = "ESA", default, deserialize_with = "empty_string_as_none")]
    esa: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn split_students(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("yes") | Some("true") | Some("1") | Some("y")
    )
}

fn parse_amount(raw: &str, row: usize) -> Result<Money, ProcessorImportError> {
    Money::parse(raw).map_err(|source| ProcessorImportError::Amount { row, source })
}

fn parse_date(raw: &str, row: usize) -> Result<NaiveDate, ProcessorImportError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| ProcessorImportError::Date {
        row,
        value: raw.trim().to_string(),
    })
}
