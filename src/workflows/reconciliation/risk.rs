use serde::Serialize;

use super::domain::{Contract, ContractStatus, Money, PaymentRecord, RiskLevel};

/// Number of most-recent payment records considered by the classifier.
pub const RISK_WINDOW: usize = 3;

/// Classification derived from a contract's trailing payment history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub status: ContractStatus,
    pub level: RiskLevel,
    pub mean_days_late: f64,
}

/// Classify a payment history slice (most recent first).
///
/// Pure function of the trailing window: the mean of days-late over the
/// most recent `RISK_WINDOW` records (fewer if the history is shorter).
/// Band edges compare integer day-sums against `threshold * n` so exact
/// boundaries never depend on float rounding. A trailing mean of exactly
/// 30 stays high risk.
pub fn assess(history: &[PaymentRecord]) -> RiskAssessment {
    let window = &history[..history.len().min(RISK_WINDOW)];
    if window.is_empty() {
        return RiskAssessment {
            status: ContractStatus::Current,
            level: RiskLevel::Low,
            mean_days_late: 0.0,
        };
    }

    let n = window.len() as u64;
    let day_sum: u64 = window.iter().map(|record| u64::from(record.days_late)).sum();
    let mean_days_late = day_sum as f64 / n as f64;

    let (status, level) = if day_sum >= 30 * n {
        (ContractStatus::AtRisk, RiskLevel::High)
    } else if day_sum > 10 * n {
        (ContractStatus::Current, RiskLevel::Medium)
    } else {
        (ContractStatus::Current, RiskLevel::Low)
    };

    RiskAssessment {
        status,
        level,
        mean_days_late,
    }
}

/// Append a reconciled payment to the contract and recompute its risk state
/// from the updated history slice. The classification is always recomputed
/// in full, never patched incrementally.
///
/// Intervention handling: the high band requires intervention, the low band
/// clears it, and the medium band carries the prior value forward.
pub fn record_payment(contract: &mut Contract, record: PaymentRecord) -> RiskAssessment {
    contract.history.insert(0, record);

    let assessment = assess(&contract.history);
    contract.status = assessment.status;
    contract.risk_level = assessment.level;
    contract.intervention_needed = match assessment.level {
        RiskLevel::High => true,
        RiskLevel::Low => false,
        RiskLevel::Medium => contract.intervention_needed,
    };

    assessment
}

/// Read-only portfolio aggregates consumed by reporting dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRiskSummary {
    pub total_contracts: usize,
    pub low_risk: usize,
    pub medium_risk: usize,
    pub high_risk: usize,
    pub intervention_needed: usize,
    /// Sum of monthly tuition across high-risk contracts.
    pub revenue_at_risk: Money,
    /// (high*0.7 + medium*0.3) / total * 100.
    pub predicted_attrition_pct: f64,
}

pub fn portfolio_summary(contracts: &[Contract]) -> PortfolioRiskSummary {
    let total_contracts = contracts.len();
    let mut low_risk = 0;
    let mut medium_risk = 0;
    let mut high_risk = 0;
    let mut intervention_needed = 0;
    let mut revenue_at_risk = Money::ZERO;

    for contract in contracts {
        match contract.risk_level {
            RiskLevel::Low => low_risk += 1,
            RiskLevel::Medium => medium_risk += 1,
            RiskLevel::High => {
                high_risk += 1;
                revenue_at_risk += contract.monthly_tuition;
            }
        }
        if contract.intervention_needed {
            intervention_needed += 1;
        }
    }

    let predicted_attrition_pct = if total_contracts == 0 {
        0.0
    } else {
        (high_risk as f64 * 0.7 + medium_risk as f64 * 0.3) / total_contracts as f64 * 100.0
    };

    PortfolioRiskSummary {
        total_contracts,
        low_risk,
        medium_risk,
        high_risk,
        intervention_needed,
        revenue_at_risk,
        predicted_attrition_pct,
    }
}
