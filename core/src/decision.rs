//! Feature merge and the accept/reject rule.
//!
//! RULES:
//!   - `paid_loans` is the left anchor: every client in it appears in the
//!     output exactly once, in its original order, and no other client does.
//!   - Absent features stay `None` in the row. Substitution happens only
//!     inside `decide`, through the named defaults below.
//!   - Thresholds are strict greater-than except the paid-loan count.

use crate::{
    error::{PipelineError, PipelineResult},
    extractor::FeatureSets,
    types::ClientId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ── Constants ────────────────────────────────────────────────────────────────

pub const MIN_PAID_LOANS: i64 = 3;
pub const MIN_PROFIT_RATE: f64 = 0.1;
pub const MIN_DAYS_SINCE_LATE: f64 = 30.0;

/// No qualifying recent loans counts as zero profit (pushes toward REJECT).
pub const DEFAULT_PROFIT_WHEN_ABSENT: f64 = 0.0;
/// No late payment on record counts as infinitely long ago.
pub const DEFAULT_DAYS_LATE_WHEN_ABSENT: f64 = f64::INFINITY;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => "ACCEPT",
            Decision::Reject => "REJECT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACCEPT" => Some(Decision::Accept),
            "REJECT" => Some(Decision::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFeatureRow {
    pub client_id: ClientId,
    pub paid_loans: i64,
    pub days_since_late: Option<f64>,
    pub profit_rate_90d: Option<f64>,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub clients: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl DecisionSummary {
    pub fn of(rows: &[ClientFeatureRow]) -> Self {
        let accepted = rows.iter().filter(|r| r.decision == Decision::Accept).count();
        Self {
            clients: rows.len(),
            accepted,
            rejected: rows.len() - accepted,
        }
    }
}

// ── Rule ─────────────────────────────────────────────────────────────────────

/// The fixed credit decision for one client.
pub fn decide(paid_loans: i64, days_since_late: Option<f64>, profit_rate_90d: Option<f64>) -> Decision {
    let profit = profit_rate_90d.unwrap_or(DEFAULT_PROFIT_WHEN_ABSENT);
    let days_late = days_since_late.unwrap_or(DEFAULT_DAYS_LATE_WHEN_ABSENT);

    if paid_loans >= MIN_PAID_LOANS && profit > MIN_PROFIT_RATE && days_late > MIN_DAYS_SINCE_LATE {
        Decision::Accept
    } else {
        Decision::Reject
    }
}

// ── Merge ────────────────────────────────────────────────────────────────────

/// Left-join the secondary row sets onto `paid_loans` and decide each row.
pub fn merge_features(features: &FeatureSets) -> PipelineResult<Vec<ClientFeatureRow>> {
    let days_late = index_unique(
        "days_since_late",
        features.days_since_late.iter().map(|r| (r.client_id, r.days_since_late)),
    )?;
    let profit = index_unique(
        "profit_rate_90d",
        features.profit_rate_90d.iter().map(|r| (r.client_id, r.profit_rate)),
    )?;
    // Only checked for uniqueness; the anchor keeps its own order.
    index_unique(
        "paid_loans",
        features.paid_loans.iter().map(|r| (r.client_id, r.paid_loans)),
    )?;

    let rows: Vec<ClientFeatureRow> = features
        .paid_loans
        .iter()
        .map(|anchor| {
            let days_since_late = days_late.get(&anchor.client_id).copied();
            // A matched row can still carry a NULL ratio (zero loan amount).
            let profit_rate_90d = profit.get(&anchor.client_id).copied().flatten();
            ClientFeatureRow {
                client_id: anchor.client_id,
                paid_loans: anchor.paid_loans,
                days_since_late,
                profit_rate_90d,
                decision: decide(anchor.paid_loans, days_since_late, profit_rate_90d),
            }
        })
        .collect();

    let summary = DecisionSummary::of(&rows);
    log::info!(
        "Decisions computed: {} client(s), {} ACCEPT, {} REJECT",
        summary.clients,
        summary.accepted,
        summary.rejected
    );
    Ok(rows)
}

fn index_unique<V>(
    feature: &'static str,
    rows: impl Iterator<Item = (ClientId, V)>,
) -> PipelineResult<HashMap<ClientId, V>> {
    let mut index = HashMap::new();
    for (client_id, value) in rows {
        if index.insert(client_id, value).is_some() {
            return Err(PipelineError::DuplicateClient { feature, client_id });
        }
    }
    Ok(index)
}
