use serde::{Deserialize, Serialize};

use super::MatchConfig;
use super::{Contract, FamilyPaymentLine, MatchCandidate};

/// Factors contributing to a candidate's confidence, kept discrete so every
/// proposed mapping can be audited component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFactor {
    Base,
    ExactAmount,
    FamilyIdentity,
    RosterSize,
}

/// Discrete contribution to a candidate's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchComponent {
    pub factor: MatchFactor,
    pub points: u16,
    pub notes: String,
}

/// Score one (line, contract) pair. Returns None when the contract matches
/// no factor at all, so it never appears as a candidate.
pub(crate) fn score_candidate(
    line: &FamilyPaymentLine,
    contract: &Contract,
    config: &MatchConfig,
) -> Option<MatchCandidate> {
    let amount_matched = line.amount == contract.monthly_tuition;
    let family_matched = line.family_id == contract.family_id;
    let roster_matched = line.students.len() as u32 == contract.student_count;

    if !amount_matched && !family_matched && !roster_matched {
        return None;
    }

    let mut components = vec![MatchComponent {
        factor: MatchFactor::Base,
        points: config.base_points,
        notes: "baseline confidence for a candidate pairing".to_string(),
    }];
    let mut points = config.base_points;

    if amount_matched {
        components.push(MatchComponent {
            factor: MatchFactor::ExactAmount,
            points: config.amount_points,
            notes: format!(
                "payment {} equals contract monthly tuition",
                line.amount
            ),
        });
        points += config.amount_points;
    }

    if family_matched {
        components.push(MatchComponent {
            factor: MatchFactor::FamilyIdentity,
            points: config.family_points,
            notes: format!("family id {} matches contract", line.family_id.0),
        });
        points += config.family_points;
    }

    if roster_matched {
        components.push(MatchComponent {
            factor: MatchFactor::RosterSize,
            points: config.roster_points,
            notes: format!(
                "{} student name(s) match contract roster size",
                line.students.len()
            ),
        });
        points += config.roster_points;
    }

    Some(MatchCandidate {
        contract_id: contract.id.clone(),
        points: points.min(100),
        family_matched,
        amount_matched,
        components,
    })
}
