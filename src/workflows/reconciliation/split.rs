use tracing::info;

use super::domain::{Allocation, Money, Transaction, TransactionStatus};

/// Enforces that a proposed split sums exactly to the transaction amount.
///
/// Comparison happens in integer cents. A rejected split leaves the
/// transaction untouched; an accepted split atomically replaces the
/// allocation list and marks the transaction mapped.
pub fn apply_split(
    transaction: &mut Transaction,
    allocations: Vec<Allocation>,
) -> Result<(), AllocationMismatch> {
    let proposed_total: Money = allocations.iter().map(|a| a.amount).sum();

    if proposed_total != transaction.amount {
        return Err(AllocationMismatch {
            expected_cents: transaction.amount.cents(),
            actual_cents: proposed_total.cents(),
        });
    }

    transaction.allocations = allocations;
    transaction.requires_split = false;
    transaction.status = TransactionStatus::Mapped;

    info!(
        transaction_id = %transaction.id.0,
        amount = %transaction.amount,
        allocations = transaction.allocations.len(),
        "transaction reconciled"
    );

    Ok(())
}

/// Assign a ledger category to a transaction that does not need splitting.
pub fn categorize(transaction: &mut Transaction, category: String) {
    transaction.category = Some(category);
    if !transaction.requires_split {
        transaction.status = TransactionStatus::Mapped;
        info!(
            transaction_id = %transaction.id.0,
            amount = %transaction.amount,
            "transaction reconciled"
        );
    }
}

/// Split total does not equal the transaction amount to the cent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "allocation total {actual_cents} cents does not equal transaction amount {expected_cents} cents (delta {})",
    actual_cents - expected_cents
)]
pub struct AllocationMismatch {
    pub expected_cents: i64,
    pub actual_cents: i64,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::workflows::reconciliation::domain::{Direction, TransactionId};

    fn tuition_transaction(cents: i64) -> Transaction {
        Transaction {
            id: TransactionId("txn-001".to_string()),
            date: NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date"),
            description: "Tuition ACH batch".to_string(),
            amount: Money::from_cents(cents),
            direction: Direction::Inbound,
            account_ref: "operating".to_string(),
            memo: None,
            requires_split: true,
            status: TransactionStatus::NeedsSplit,
            category: None,
            allocations: Vec::new(),
        }
    }

    fn allocation(beneficiary: &str, cents: i64) -> Allocation {
        Allocation {
            beneficiary: beneficiary.to_string(),
            amount: Money::from_cents(cents),
            tag: Some("Grade 4".to_string()),
        }
    }

    #[test]
    fn exact_split_marks_transaction_mapped() {
        let mut txn = tuition_transaction(250_000);
        let result = apply_split(
            &mut txn,
            vec![allocation("Avery P.", 125_000), allocation("Sam P.", 125_000)],
        );

        assert!(result.is_ok());
        assert_eq!(txn.status, TransactionStatus::Mapped);
        assert!(!txn.requires_split);
        assert_eq!(txn.allocated_total(), txn.amount);
    }

    #[test]
    fn mismatched_split_is_rejected_and_leaves_state_unchanged() {
        let mut txn = tuition_transaction(250_000);
        let before = txn.clone();

        let error = apply_split(
            &mut txn,
            vec![allocation("Avery P.", 125_000), allocation("Sam P.", 124_999)],
        )
        .expect_err("off-by-one-cent split must be rejected");

        assert_eq!(error.expected_cents, 250_000);
        assert_eq!(error.actual_cents, 249_999);
        assert_eq!(txn, before);
    }

    #[test]
    fn mismatch_error_reports_the_delta() {
        let mut txn = tuition_transaction(100_000);
        let error = apply_split(&mut txn, vec![allocation("Avery P.", 99_000)])
            .expect_err("short split rejected");
        assert!(error.to_string().contains("delta -1000"));
    }

    #[test]
    fn categorize_maps_a_non_split_transaction() {
        let mut txn = tuition_transaction(50_000);
        txn.requires_split = false;
        txn.status = TransactionStatus::NeedsCategory;

        categorize(&mut txn, "Facilities".to_string());

        assert_eq!(txn.status, TransactionStatus::Mapped);
        assert_eq!(txn.category.as_deref(), Some("Facilities"));
    }
}
