use super::{ConnectionProvider, FeatureSource, LastLatePaymentRow, PaidLoansRow, ProfitRateRow};
use crate::{error::PipelineResult, types::ClientId};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open an existing database file. The source is never created here:
    /// a missing file is an error, not an empty dataset.
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open (or create) a database file and apply the schema.
    pub fn create(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply the `loan`/`payment` schema. Idempotent.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_loan_payment.sql"))?;
        Ok(())
    }

    // ── Fixtures ───────────────────────────────────────────────

    pub fn insert_loan(
        &self,
        id: i64,
        client_id: ClientId,
        amount: f64,
        status: &str,
        created_on: NaiveDateTime,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO loan (id, client_id, amount, status, created_on) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, client_id, amount, status, created_on],
        )?;
        Ok(())
    }

    pub fn insert_payment(
        &self,
        id: i64,
        loan_id: i64,
        interest: f64,
        status: &str,
        created_on: NaiveDateTime,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO payment (id, loan_id, interest, status, created_on) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, loan_id, interest, status, created_on],
        )?;
        Ok(())
    }
}

impl FeatureSource for SqliteStore {
    fn paid_loan_counts(&mut self, paid_status: &str) -> PipelineResult<Vec<PaidLoansRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT client_id, COUNT(*) AS paid_loans
             FROM loan
             WHERE status = ?1
             GROUP BY client_id
             ORDER BY client_id",
        )?;
        let rows = stmt.query_map(params![paid_status], |row| {
            Ok(PaidLoansRow {
                client_id: row.get(0)?,
                paid_loans: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn last_late_payments(&mut self, late_status: &str) -> PipelineResult<Vec<LastLatePaymentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.client_id, MAX(p.created_on) AS last_late_on
             FROM loan l
             JOIN payment p ON l.id = p.loan_id
             WHERE p.status = ?1 AND p.created_on IS NOT NULL
             GROUP BY l.client_id
             ORDER BY l.client_id",
        )?;
        let rows = stmt.query_map(params![late_status], |row| {
            Ok(LastLatePaymentRow {
                client_id: row.get(0)?,
                last_late_on: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn latest_loan_created_on(&mut self) -> PipelineResult<Option<NaiveDateTime>> {
        let latest = self
            .conn
            .query_row("SELECT MAX(created_on) FROM loan", [], |row| row.get(0))?;
        Ok(latest)
    }

    fn profit_rates_since(&mut self, window_start: NaiveDateTime) -> PipelineResult<Vec<ProfitRateRow>> {
        // julianday() normalises 'T' and ' ' separated timestamps before comparing.
        let mut stmt = self.conn.prepare(
            "SELECT l.client_id,
                    CAST(SUM(COALESCE(pi.interest, 0)) AS REAL) / NULLIF(SUM(l.amount), 0) AS profit_rate_90d
             FROM loan l
             LEFT JOIN (
                 SELECT loan_id, SUM(interest) AS interest
                 FROM payment
                 GROUP BY loan_id
             ) pi ON pi.loan_id = l.id
             WHERE julianday(l.created_on) >= julianday(?1)
             GROUP BY l.client_id
             ORDER BY l.client_id",
        )?;
        let rows = stmt.query_map(params![window_start], |row| {
            Ok(ProfitRateRow {
                client_id: row.get(0)?,
                profit_rate: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

pub struct SqliteConnectionProvider {
    path: PathBuf,
}

impl SqliteConnectionProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn connect(&self) -> PipelineResult<Box<dyn FeatureSource>> {
        log::debug!("Opening sqlite source {}", self.path.display());
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}
