use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Exact monetary value held as integer minor currency units (cents).
///
/// All balance invariants in the reconciliation core compare cents, never
/// floating point, so split totals and tranche totals cannot drift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parse a decimal amount string ("1166", "1166.5", "$1,166.00") into
    /// cents without going through floating point.
    pub fn parse(text: &str) -> Result<Self, MoneyParseError> {
        let cleaned: String = text
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();
        if cleaned.is_empty() {
            return Err(MoneyParseError::Empty);
        }

        let (negative, digits) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };

        if frac.len() > 2 {
            return Err(MoneyParseError::TooPrecise {
                value: text.trim().to_string(),
            });
        }

        let whole_cents =
            parse_digits(whole, text)?
                .checked_mul(100)
                .ok_or_else(|| MoneyParseError::Invalid {
                    value: text.trim().to_string(),
                })?;
        let frac_cents = if frac.is_empty() {
            0
        } else {
            let parsed = parse_digits(frac, text)?;
            if frac.len() == 1 {
                parsed * 10
            } else {
                parsed
            }
        };

        // The fractional part is at most 99 cents; only the whole part can
        // push the total past i64 cents.
        let cents = whole_cents
            .checked_add(frac_cents)
            .ok_or_else(|| MoneyParseError::Invalid {
                value: text.trim().to_string(),
            })?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

fn parse_digits(digits: &str, original: &str) -> Result<i64, MoneyParseError> {
    if digits.is_empty() {
        return Ok(0);
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyParseError::Invalid {
            value: original.trim().to_string(),
        });
    }
    digits.parse::<i64>().map_err(|_| MoneyParseError::Invalid {
        value: original.trim().to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyParseError {
    #[error("amount is empty")]
    Empty,
    #[error("'{value}' is not a decimal amount")]
    Invalid { value: String },
    #[error("'{value}' has more than two fractional digits")]
    TooPrecise { value: String },
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = self.0.abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{}.{:02}", cents / 100, cents % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

/// Identifier wrapper for bank/card feed transactions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub String);

/// Identifier wrapper for bulk processor deposits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrancheId(pub String);

/// Identifier wrapper for enrollment contracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub String);

/// Identifier wrapper for families as known to processors and contracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FamilyId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub const fn label(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Categorization state of a feed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    NeedsSplit,
    NeedsCategory,
    Mapped,
}

impl TransactionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TransactionStatus::NeedsSplit => "needs_split",
            TransactionStatus::NeedsCategory => "needs_category",
            TransactionStatus::Mapped => "mapped",
        }
    }
}

/// A single inbound or outbound money movement observed on a feed or statement.
///
/// Transactions are never deleted; a correction is ingested as a new record
/// whose memo references the superseded id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub direction: Direction,
    pub account_ref: String,
    pub memo: Option<String>,
    pub requires_split: bool,
    pub status: TransactionStatus,
    pub category: Option<String>,
    pub allocations: Vec<Allocation>,
}

impl Transaction {
    pub fn allocated_total(&self) -> Money {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

/// A portion of a transaction attributed to one beneficiary (e.g. a student).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub beneficiary: String,
    pub amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Attached,
}

impl ReceiptStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Attached => "attached",
        }
    }
}

/// Reconciliation progress of a tranche deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Unmapped,
    PartiallyMapped,
    NeedsAttention,
    FullyMapped,
}

impl ReconciliationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReconciliationStatus::Unmapped => "unmapped",
            ReconciliationStatus::PartiallyMapped => "partially_mapped",
            ReconciliationStatus::NeedsAttention => "needs_attention",
            ReconciliationStatus::FullyMapped => "fully_mapped",
        }
    }
}

/// A bulk payment batch from a named external processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrancheDeposit {
    pub id: TrancheId,
    pub provider: String,
    pub deposit_date: NaiveDate,
    pub total_amount: Money,
    pub payment_method: String,
    pub receipt_status: ReceiptStatus,
    pub reconciliation_status: ReconciliationStatus,
    pub lines: Vec<FamilyPaymentLine>,
}

impl TrancheDeposit {
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(|line| line.amount).sum()
    }

    pub fn line(&self, family_id: &FamilyId) -> Option<&FamilyPaymentLine> {
        self.lines.iter().find(|line| &line.family_id == family_id)
    }

    pub fn line_mut(&mut self, family_id: &FamilyId) -> Option<&mut FamilyPaymentLine> {
        self.lines
            .iter_mut()
            .find(|line| &line.family_id == family_id)
    }

    pub fn confirmed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| line.mapping.is_some())
            .count()
    }

    pub fn unconfirmed_families(&self) -> Vec<FamilyId> {
        self.lines
            .iter()
            .filter(|line| line.mapping.is_none())
            .map(|line| line.family_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTimeliness {
    Current,
    Late,
}

impl PaymentTimeliness {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentTimeliness::Current => "current",
            PaymentTimeliness::Late => "late",
        }
    }
}

/// One family's portion of a tranche deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyPaymentLine {
    pub family_id: FamilyId,
    pub family_name: String,
    pub students: Vec<String>,
    pub amount: Money,
    pub period: String,
    pub due_date: NaiveDate,
    pub timeliness: PaymentTimeliness,
    pub days_late: u32,
    pub esa_funded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Confirmed contract mapping; None until a human or policy confirms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<ConfirmedMapping>,
    /// Advisory flags from the most recent matching pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<AdvisoryFlag>,
}

impl FamilyPaymentLine {
    pub fn has_high_severity_flag(&self) -> bool {
        self.flags
            .iter()
            .any(|flag| flag.severity == FlagSeverity::High)
    }
}

/// Audit record of who approved a (line, contract) mapping and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedMapping {
    pub contract_id: ContractId,
    pub confirmed_by: String,
    pub confirmed_on: NaiveDate,
    pub amount_override_acknowledged: bool,
}

/// Advisory annotation attached to a payment line; never blocks processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisoryFlag {
    pub kind: FlagKind,
    pub severity: FlagSeverity,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    NoContractMatch,
    AmountMismatch,
    LatePayment,
}

impl FlagKind {
    pub const fn label(self) -> &'static str {
        match self {
            FlagKind::NoContractMatch => "no_contract_match",
            FlagKind::AmountMismatch => "amount_mismatch",
            FlagKind::LatePayment => "late_payment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Medium,
    High,
}

impl FlagSeverity {
    pub const fn label(self) -> &'static str {
        match self {
            FlagSeverity::Medium => "medium",
            FlagSeverity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Current,
    AtRisk,
}

impl ContractStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ContractStatus::Current => "current",
            ContractStatus::AtRisk => "at_risk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// The enrollment agreement whose payment health is tracked over time.
///
/// Mutated only by the risk tracker when a reconciled payment is appended;
/// never deleted while the enrollment is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub family_id: FamilyId,
    pub family_name: String,
    pub student_count: u32,
    pub monthly_tuition: Money,
    pub status: ContractStatus,
    pub risk_level: RiskLevel,
    /// Payment history, most recent first.
    pub history: Vec<PaymentRecord>,
    pub next_due_date: NaiveDate,
    pub intervention_needed: bool,
    pub esa_funded: bool,
}

/// An immutable historical fact appended to a contract's payment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub date: NaiveDate,
    pub amount: Money,
    pub outcome: PaymentOutcome,
    pub method: String,
    pub days_late: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid,
    Late,
}

impl PaymentOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentOutcome::Paid => "paid",
            PaymentOutcome::Late => "late",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Deposit,
    Revenue,
}

impl LedgerEntryType {
    pub const fn label(self) -> &'static str {
        match self {
            LedgerEntryType::Deposit => "deposit",
            LedgerEntryType::Revenue => "revenue",
        }
    }
}

/// An output record formatted for import into an external accounting system.
///
/// `custom` carries the system-specific fields (customer reference,
/// classification tag, memo) under the target system's own field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_type: LedgerEntryType,
    pub system: String,
    pub account: String,
    pub amount: Money,
    pub date: NaiveDate,
    pub description: String,
    pub custom: BTreeMap<String, String>,
}
