use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Ordered close-out steps for one accounting period. The checklist has no
/// automated transition logic: each step is flipped only by explicit
/// external action, and downstream reporting consults the gate.
#[derive(Debug)]
pub struct MonthCloseBlueprint {
    steps: Vec<StepTemplate>,
}

#[derive(Debug, Clone)]
pub struct StepTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl MonthCloseBlueprint {
    pub fn standard() -> Self {
        Self {
            steps: standard_step_templates(),
        }
    }

    pub fn step_templates(&self) -> &[StepTemplate] {
        &self.steps
    }
}

fn standard_step_templates() -> Vec<StepTemplate> {
    vec![
        StepTemplate {
            key: "feed_review",
            name: "Review Bank and Card Feeds",
            description: "Confirm every feed transaction is split or categorized.",
        },
        StepTemplate {
            key: "statement_attachment",
            name: "Attach Bank Statements",
            description: "Attach the month's statements for each operating account.",
        },
        StepTemplate {
            key: "tuition_confirmation",
            name: "Confirm Per-Student Tuition",
            description: "Verify tuition received per enrolled student against contracts.",
        },
        StepTemplate {
            key: "expense_categorization",
            name: "Categorize Expenses",
            description: "Assign ledger categories to all outbound transactions.",
        },
        StepTemplate {
            key: "payroll_verification",
            name: "Verify Payroll",
            description: "Check payroll runs against the staffing roster.",
        },
        StepTemplate {
            key: "report_export",
            name: "Export Period Reports",
            description: "Export the reconciled period to the accounting system.",
        },
    ]
}

#[derive(Debug, Clone)]
pub struct StepInstance {
    pub template: StepTemplate,
    pub done: bool,
    pub completed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecklistView {
    pub period: String,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress_pct: f64,
    pub closed: bool,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonthCloseError {
    #[error("unknown month-close step '{0}'")]
    StepNotFound(String),
}

/// Per-period checklist instance.
#[derive(Debug)]
pub struct MonthCloseChecklist {
    period: String,
    steps: Vec<StepInstance>,
}

impl MonthCloseChecklist {
    pub fn new(blueprint: &MonthCloseBlueprint, period: impl Into<String>) -> Self {
        let steps = blueprint
            .step_templates()
            .iter()
            .cloned()
            .map(|template| StepInstance {
                template,
                done: false,
                completed_on: None,
            })
            .collect();
        Self {
            period: period.into(),
            steps,
        }
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn set_done(
        &mut self,
        step_key: &str,
        done: bool,
        completed_on: Option<NaiveDate>,
    ) -> Result<(), MonthCloseError> {
        let step = self
            .steps
            .iter_mut()
            .find(|step| step.template.key == step_key)
            .ok_or_else(|| MonthCloseError::StepNotFound(step_key.to_owned()))?;

        step.done = done;
        step.completed_on = if done { completed_on } else { None };
        Ok(())
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|step| step.done).count()
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Completed/total as a percentage.
    pub fn progress_pct(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.completed_steps() as f64 / self.total_steps() as f64 * 100.0
    }

    pub fn is_closed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|step| step.done)
    }

    pub fn view(&self) -> ChecklistView {
        ChecklistView {
            period: self.period.clone(),
            completed_steps: self.completed_steps(),
            total_steps: self.total_steps(),
            progress_pct: self.progress_pct(),
            closed: self.is_closed(),
            steps: self
                .steps
                .iter()
                .map(|step| StepView {
                    key: step.template.key,
                    name: step.template.name,
                    description: step.template.description,
                    done: step.done,
                    completed_on: step.completed_on,
                })
                .collect(),
        }
    }
}

/// Keyed registry of checklists, one per accounting period ("2026-01").
#[derive(Default)]
pub struct MonthCloseRegistry {
    periods: Mutex<BTreeMap<String, MonthCloseChecklist>>,
}

impl MonthCloseRegistry {
    pub fn view(&self, period: &str) -> ChecklistView {
        let mut guard = self.periods.lock().expect("month-close mutex poisoned");
        guard
            .entry(period.to_string())
            .or_insert_with(|| MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), period))
            .view()
    }

    pub fn set_step(
        &self,
        period: &str,
        step_key: &str,
        done: bool,
        completed_on: Option<NaiveDate>,
    ) -> Result<ChecklistView, MonthCloseError> {
        let mut guard = self.periods.lock().expect("month-close mutex poisoned");
        let checklist = guard
            .entry(period.to_string())
            .or_insert_with(|| MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), period));
        checklist.set_done(step_key, done, completed_on)?;
        Ok(checklist.view())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StepUpdateRequest {
    pub done: bool,
    #[serde(default)]
    pub completed_on: Option<NaiveDate>,
}

/// Router builder exposing the month-close gate.
pub fn month_close_router(registry: Arc<MonthCloseRegistry>) -> Router {
    Router::new()
        .route("/api/v1/month-close/:period", get(view_handler))
        .route(
            "/api/v1/month-close/:period/steps/:step_key",
            post(step_handler),
        )
        .with_state(registry)
}

async fn view_handler(
    State(registry): State<Arc<MonthCloseRegistry>>,
    Path(period): Path<String>,
) -> Response {
    (StatusCode::OK, axum::Json(registry.view(&period))).into_response()
}

async fn step_handler(
    State(registry): State<Arc<MonthCloseRegistry>>,
    Path((period, step_key)): Path<(String, String)>,
    axum::Json(request): axum::Json<StepUpdateRequest>,
) -> Response {
    match registry.set_step(&period, &step_key, request.done, request.completed_on) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_checklist_starts_at_zero_progress() {
        let checklist = MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), "2026-01");
        assert_eq!(checklist.total_steps(), 6);
        assert_eq!(checklist.completed_steps(), 0);
        assert_eq!(checklist.progress_pct(), 0.0);
        assert!(!checklist.is_closed());
    }

    #[test]
    fn progress_tracks_explicit_step_completion() {
        let mut checklist = MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), "2026-01");
        let completed_on = NaiveDate::from_ymd_opt(2026, 2, 3).expect("valid date");

        checklist
            .set_done("feed_review", true, Some(completed_on))
            .expect("known step");
        checklist
            .set_done("report_export", true, Some(completed_on))
            .expect("known step");

        assert_eq!(checklist.completed_steps(), 2);
        assert!((checklist.progress_pct() - 100.0 * 2.0 / 6.0).abs() < 1e-9);
        assert!(!checklist.is_closed());
    }

    #[test]
    fn closing_requires_every_step() {
        let mut checklist = MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), "2026-01");
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).expect("valid date");
        for key in [
            "feed_review",
            "statement_attachment",
            "tuition_confirmation",
            "expense_categorization",
            "payroll_verification",
            "report_export",
        ] {
            checklist.set_done(key, true, Some(date)).expect("known step");
        }

        assert!(checklist.is_closed());
        assert_eq!(checklist.progress_pct(), 100.0);
    }

    #[test]
    fn reopening_a_step_clears_its_completion_date() {
        let mut checklist = MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), "2026-01");
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).expect("valid date");
        checklist
            .set_done("payroll_verification", true, Some(date))
            .expect("known step");
        checklist
            .set_done("payroll_verification", false, None)
            .expect("known step");

        let view = checklist.view();
        let step = view
            .steps
            .iter()
            .find(|step| step.key == "payroll_verification")
            .expect("step present");
        assert!(!step.done);
        assert!(step.completed_on.is_none());
    }

    #[test]
    fn unknown_step_is_rejected() {
        let mut checklist = MonthCloseChecklist::new(&MonthCloseBlueprint::standard(), "2026-01");
        let error = checklist
            .set_done("close_the_books", true, None)
            .expect_err("unknown step");
        assert_eq!(error, MonthCloseError::StepNotFound("close_the_books".to_string()));
    }

    #[test]
    fn registry_keeps_periods_independent() {
        let registry = MonthCloseRegistry::default();
        registry
            .set_step("2026-01", "feed_review", true, None)
            .expect("known step");

        let january = registry.view("2026-01");
        let february = registry.view("2026-02");
        assert_eq!(january.completed_steps, 1);
        assert_eq!(february.completed_steps, 0);
    }
}
