use serde::Serialize;

use super::domain::{
    ReconciliationStatus, Transaction, TransactionStatus, TrancheDeposit,
};
use super::risk::PortfolioRiskSummary;

/// Read-only projection of reconciliation progress for dashboard surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub total_tranches: usize,
    pub total_lines: usize,
    pub confirmed_lines: usize,
    pub flagged_lines: usize,
    pub tranche_statuses: Vec<TrancheStatusEntry>,
    pub transaction_statuses: Vec<TransactionStatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrancheStatusEntry {
    pub status: ReconciliationStatus,
    pub status_label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionStatusEntry {
    pub status: TransactionStatus,
    pub status_label: &'static str,
    pub count: usize,
}

pub fn reconciliation_summary(
    deposits: &[TrancheDeposit],
    transactions: &[Transaction],
) -> ReconciliationSummary {
    let tranche_statuses = [
        ReconciliationStatus::Unmapped,
        ReconciliationStatus::PartiallyMapped,
        ReconciliationStatus::NeedsAttention,
        ReconciliationStatus::FullyMapped,
    ]
    .into_iter()
    .map(|status| TrancheStatusEntry {
        status,
        status_label: status.label(),
        count: deposits
            .iter()
            .filter(|deposit| deposit.reconciliation_status == status)
            .count(),
    })
    .collect();

    let transaction_statuses = [
        TransactionStatus::NeedsSplit,
        TransactionStatus::NeedsCategory,
        TransactionStatus::Mapped,
    ]
    .into_iter()
    .map(|status| TransactionStatusEntry {
        status,
        status_label: status.label(),
        count: transactions
            .iter()
            .filter(|transaction| transaction.status == status)
            .count(),
    })
    .collect();

    let total_lines = deposits.iter().map(|deposit| deposit.lines.len()).sum();
    let confirmed_lines = deposits.iter().map(TrancheDeposit::confirmed_count).sum();
    let flagged_lines = deposits
        .iter()
        .flat_map(|deposit| deposit.lines.iter())
        .filter(|line| !line.flags.is_empty())
        .count();

    ReconciliationSummary {
        total_tranches: deposits.len(),
        total_lines,
        confirmed_lines,
        flagged_lines,
        tranche_statuses,
        transaction_statuses,
    }
}

/// Risk projection with display strings ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummaryView {
    pub total_contracts: usize,
    pub low_risk: usize,
    pub medium_risk: usize,
    pub high_risk: usize,
    pub intervention_needed: usize,
    pub revenue_at_risk_cents: i64,
    pub revenue_at_risk_display: String,
    pub predicted_attrition_pct: f64,
}

impl RiskSummaryView {
    pub fn from_summary(summary: &PortfolioRiskSummary) -> Self {
        Self {
            total_contracts: summary.total_contracts,
            low_risk: summary.low_risk,
            medium_risk: summary.medium_risk,
            high_risk: summary.high_risk,
            intervention_needed: summary.intervention_needed,
            revenue_at_risk_cents: summary.revenue_at_risk.cents(),
            revenue_at_risk_display: summary.revenue_at_risk.to_string(),
            predicted_attrition_pct: summary.predicted_attrition_pct,
        }
    }
}
