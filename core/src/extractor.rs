//! Feature extraction.
//!
//! Issues the read-only aggregate queries and shapes them into the three
//! per-client row sets the decision engine merges:
//!   1. paid_loans      : count of loans with status 'paid'
//!   2. days_since_late : fractional days from the run's as_of to the most
//!                         recent late payment
//!   3. profit_rate_90d : interest / amount for loans in the 90 days ending
//!                         at the latest loan in the dataset
//!
//! The profit window is anchored to the dataset, not the wall clock: a stale
//! replica still produces the window its data describes.

use crate::{
    clock::RunClock,
    error::PipelineResult,
    store::{FeatureSource, PaidLoansRow, ProfitRateRow},
    types::{ClientId, LOAN_STATUS_PAID, PAYMENT_STATUS_LATE},
};
use chrono::{Duration, NaiveDateTime};

pub const PROFIT_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct DaysSinceLateRow {
    pub client_id: ClientId,
    pub days_since_late: f64,
}

/// The three row sets produced by one extraction pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSets {
    pub paid_loans: Vec<PaidLoansRow>,
    pub days_since_late: Vec<DaysSinceLateRow>,
    pub profit_rate_90d: Vec<ProfitRateRow>,
    /// Start of the profit window; `None` when the loan table is empty.
    pub window_start: Option<NaiveDateTime>,
}

/// Start of the profit window for a dataset whose newest loan is `latest`.
pub fn profit_window_start(latest: NaiveDateTime) -> NaiveDateTime {
    latest - Duration::days(PROFIT_WINDOW_DAYS)
}

/// Run all feature queries against `source`. Any query error aborts the
/// whole extraction; partial row sets are never returned.
pub fn extract_features(source: &mut dyn FeatureSource, clock: &RunClock) -> PipelineResult<FeatureSets> {
    let paid_loans = source.paid_loan_counts(LOAN_STATUS_PAID)?;
    log::debug!("paid_loans: {} client(s)", paid_loans.len());

    let days_since_late: Vec<DaysSinceLateRow> = source
        .last_late_payments(PAYMENT_STATUS_LATE)?
        .into_iter()
        .map(|row| DaysSinceLateRow {
            client_id: row.client_id,
            days_since_late: clock.days_since(row.last_late_on),
        })
        .collect();
    log::debug!("days_since_late: {} client(s)", days_since_late.len());

    let window_start = source.latest_loan_created_on()?.map(profit_window_start);
    let profit_rate_90d = match window_start {
        Some(start) => {
            log::debug!("profit window starts at {start}");
            source.profit_rates_since(start)?
        }
        None => {
            log::warn!("loan table is empty, profit_rate_90d will be absent for every client");
            Vec::new()
        }
    };

    log::info!(
        "Extracted features: paid_loans={}, days_since_late={}, profit_rate_90d={}",
        paid_loans.len(),
        days_since_late.len(),
        profit_rate_90d.len()
    );

    Ok(FeatureSets {
        paid_loans,
        days_since_late,
        profit_rate_90d,
        window_start,
    })
}
