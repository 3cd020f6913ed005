//! Shared primitive types used across the pipeline.

/// Borrower identifier as stored in `loan.client_id`.
pub type ClientId = i64;

/// The canonical run identifier.
pub type RunId = String;

/// Loan status counted by the `paid_loans` feature.
pub const LOAN_STATUS_PAID: &str = "paid";

/// Payment status counted by the `days_since_late` feature.
pub const PAYMENT_STATUS_LATE: &str = "late";
