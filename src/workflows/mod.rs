pub mod month_close;
pub mod reconciliation;
