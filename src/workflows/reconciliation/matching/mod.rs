mod rules;

pub use rules::{MatchComponent, MatchFactor};

use serde::{Deserialize, Serialize};

use super::domain::{
    AdvisoryFlag, Contract, ContractId, FamilyId, FamilyPaymentLine, FlagKind, FlagSeverity,
};

/// Weights for the additive confidence formula, in hundredths so scoring and
/// ranking stay in integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    pub base_points: u16,
    pub amount_points: u16,
    pub family_points: u16,
    pub roster_points: u16,
    /// Minimum points for automatic confirmation eligibility.
    pub auto_map_threshold: u16,
    /// Days late past which a line is flagged regardless of matching.
    pub late_flag_days: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            base_points: 50,
            amount_points: 30,
            family_points: 40,
            roster_points: 10,
            auto_map_threshold: 90,
            late_flag_days: 30,
        }
    }
}

/// Stateless engine that scores candidate (payment line, contract) pairs.
///
/// The engine is advisory: it proposes ranked candidates and flags, and the
/// caller must explicitly confirm every mapping so an audit trail of who
/// approved it exists.
pub struct MatchingEngine {
    config: MatchConfig,
}

impl MatchingEngine {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Score one payment line against the known contracts.
    ///
    /// Candidates are contracts matching at least one factor, ranked by
    /// confidence descending with a contract-id tie-break so identical
    /// inputs always produce identical output.
    pub fn propose(&self, line: &FamilyPaymentLine, contracts: &[Contract]) -> LineMatchReport {
        let mut candidates: Vec<MatchCandidate> = contracts
            .iter()
            .filter_map(|contract| rules::score_candidate(line, contract, &self.config))
            .collect();

        candidates.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| a.contract_id.cmp(&b.contract_id))
        });

        let mut flags = Vec::new();

        if candidates.is_empty() {
            flags.push(AdvisoryFlag {
                kind: FlagKind::NoContractMatch,
                severity: FlagSeverity::High,
                detail: format!(
                    "no contract candidate for family {} ({})",
                    line.family_id.0, line.family_name
                ),
            });
        } else if let Some(top) = candidates.first() {
            if !top.amount_matched {
                flags.push(AdvisoryFlag {
                    kind: FlagKind::AmountMismatch,
                    severity: FlagSeverity::Medium,
                    detail: format!(
                        "paid {} differs from contract {} tuition",
                        line.amount, top.contract_id.0
                    ),
                });
            }
        }

        if line.days_late > self.config.late_flag_days {
            flags.push(AdvisoryFlag {
                kind: FlagKind::LatePayment,
                severity: FlagSeverity::High,
                detail: format!(
                    "payment {} days late (threshold {})",
                    line.days_late, self.config.late_flag_days
                ),
            });
        }

        LineMatchReport {
            family_id: line.family_id.clone(),
            candidates,
            flags,
        }
    }
}

/// One scored contract candidate for a payment line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub contract_id: ContractId,
    /// Confidence in hundredths, capped at 100.
    pub points: u16,
    pub family_matched: bool,
    pub amount_matched: bool,
    pub components: Vec<MatchComponent>,
}

impl MatchCandidate {
    pub fn confidence(&self) -> f64 {
        f64::from(self.points) / 100.0
    }
}

/// Ranked candidates plus advisory flags for one payment line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMatchReport {
    pub family_id: FamilyId,
    pub candidates: Vec<MatchCandidate>,
    pub flags: Vec<AdvisoryFlag>,
}

impl LineMatchReport {
    pub fn top(&self) -> Option<&MatchCandidate> {
        self.candidates.first()
    }

    /// A line may be auto-confirmed only when the top candidate clears the
    /// threshold AND matched on family id. Identity confirmation is a hard
    /// safety requirement, not a side effect of the score arithmetic.
    pub fn auto_mappable(&self, threshold: u16) -> bool {
        self.top()
            .map(|candidate| candidate.family_matched && candidate.points >= threshold)
            .unwrap_or(false)
    }
}
