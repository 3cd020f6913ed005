//! Relational store access.
//!
//! RULE: Only store/ talks to the database.
//! The extractor calls `FeatureSource` methods; it never executes SQL.
//!
//! Two backends answer the same four queries:
//!   - `PgStore`    : production PostgreSQL
//!   - `SqliteStore`: local dev databases and test fixtures

mod pg;
mod sqlite;

pub use self::pg::{PgConnectionProvider, PgStore};
pub use self::sqlite::{SqliteConnectionProvider, SqliteStore};

use crate::{
    config::SourceConfig,
    error::PipelineResult,
    types::ClientId,
};
use chrono::NaiveDateTime;

/// `SELECT client_id, COUNT(*) ... WHERE status = 'paid'`
#[derive(Debug, Clone, PartialEq)]
pub struct PaidLoansRow {
    pub client_id: ClientId,
    pub paid_loans: i64,
}

/// Most recent late payment per client.
#[derive(Debug, Clone, PartialEq)]
pub struct LastLatePaymentRow {
    pub client_id: ClientId,
    pub last_late_on: NaiveDateTime,
}

/// Interest-over-amount ratio for loans inside the window.
/// `None` when the summed amount is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitRateRow {
    pub client_id: ClientId,
    pub profit_rate: Option<f64>,
}

/// The read-only queries the feature extractor needs. Every row set is
/// grouped by client and ordered by `client_id`.
pub trait FeatureSource {
    fn paid_loan_counts(&mut self, paid_status: &str) -> PipelineResult<Vec<PaidLoansRow>>;

    fn last_late_payments(&mut self, late_status: &str) -> PipelineResult<Vec<LastLatePaymentRow>>;

    /// `MAX(loan.created_on)` across the whole table; `None` when empty.
    fn latest_loan_created_on(&mut self) -> PipelineResult<Option<NaiveDateTime>>;

    /// Profit rate over loans with `created_on >= window_start`.
    /// Payment interest is summed per loan before the join so each loan
    /// amount is counted once.
    fn profit_rates_since(&mut self, window_start: NaiveDateTime) -> PipelineResult<Vec<ProfitRateRow>>;
}

/// Opens a fresh connection for every task attempt. Connections are never
/// pooled or reused across runs.
pub trait ConnectionProvider {
    fn connect(&self) -> PipelineResult<Box<dyn FeatureSource>>;
}

/// Build the provider matching the configured source.
pub fn provider_for(source: &SourceConfig) -> Box<dyn ConnectionProvider> {
    match source {
        SourceConfig::Postgres(db) => Box::new(PgConnectionProvider::new(db.clone())),
        SourceConfig::Sqlite { path } => Box::new(SqliteConnectionProvider::new(path.clone())),
    }
}
