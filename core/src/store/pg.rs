use super::{ConnectionProvider, FeatureSource, LastLatePaymentRow, PaidLoansRow, ProfitRateRow};
use crate::{config::DatabaseConfig, error::PipelineResult};
use chrono::NaiveDateTime;
use postgres::{Client, NoTls};

// Casts pin the wire types: the source schema may use int4/numeric/timestamptz
// and the client decodes strictly. Division operands are cast first; SUM over
// integer columns is bigint and would truncate.

const PAID_LOANS_SQL: &str =
    "SELECT client_id::bigint, COUNT(*)::bigint AS paid_loans
     FROM loan
     WHERE status = $1
     GROUP BY client_id
     ORDER BY client_id";

const LAST_LATE_SQL: &str =
    "SELECT l.client_id::bigint, MAX(p.created_on)::timestamp AS last_late_on
     FROM loan l
     JOIN payment p ON l.id = p.loan_id
     WHERE p.status = $1 AND p.created_on IS NOT NULL
     GROUP BY l.client_id
     ORDER BY l.client_id";

const LATEST_LOAN_SQL: &str = "SELECT MAX(created_on)::timestamp FROM loan";

const PROFIT_RATE_SQL: &str =
    "SELECT l.client_id::bigint,
            SUM(COALESCE(pi.interest, 0))::float8 / NULLIF(SUM(l.amount)::float8, 0) AS profit_rate_90d
     FROM loan l
     LEFT JOIN (
         SELECT loan_id, SUM(interest) AS interest
         FROM payment
         GROUP BY loan_id
     ) pi ON pi.loan_id = l.id
     WHERE l.created_on::timestamp >= $1
     GROUP BY l.client_id
     ORDER BY l.client_id";

pub struct PgStore {
    client: Client,
}

impl PgStore {
    /// Connect to the configured target database.
    pub fn connect(db: &DatabaseConfig) -> PipelineResult<Self> {
        Self::connect_to(db, &db.name)
    }

    /// Connect with the same credentials to a different database on the
    /// same server (the restore utility uses the maintenance database).
    pub fn connect_to(db: &DatabaseConfig, dbname: &str) -> PipelineResult<Self> {
        log::debug!("Connecting to postgres at {}:{}/{dbname}", db.host, db.port);
        let client = postgres::Config::new()
            .host(&db.host)
            .port(db.port)
            .user(&db.user)
            .password(&db.password)
            .dbname(dbname)
            .application_name("feature-runner")
            .connect(NoTls)?;
        Ok(Self { client })
    }

    pub(crate) fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl FeatureSource for PgStore {
    fn paid_loan_counts(&mut self, paid_status: &str) -> PipelineResult<Vec<PaidLoansRow>> {
        let rows = self.client.query(PAID_LOANS_SQL, &[&paid_status])?;
        rows.iter()
            .map(|row| {
                Ok(PaidLoansRow {
                    client_id: row.try_get(0)?,
                    paid_loans: row.try_get(1)?,
                })
            })
            .collect()
    }

    fn last_late_payments(&mut self, late_status: &str) -> PipelineResult<Vec<LastLatePaymentRow>> {
        let rows = self.client.query(LAST_LATE_SQL, &[&late_status])?;
        rows.iter()
            .map(|row| {
                Ok(LastLatePaymentRow {
                    client_id: row.try_get(0)?,
                    last_late_on: row.try_get(1)?,
                })
            })
            .collect()
    }

    fn latest_loan_created_on(&mut self) -> PipelineResult<Option<NaiveDateTime>> {
        let row = self.client.query_one(LATEST_LOAN_SQL, &[])?;
        Ok(row.try_get(0)?)
    }

    fn profit_rates_since(&mut self, window_start: NaiveDateTime) -> PipelineResult<Vec<ProfitRateRow>> {
        let rows = self.client.query(PROFIT_RATE_SQL, &[&window_start])?;
        rows.iter()
            .map(|row| {
                Ok(ProfitRateRow {
                    client_id: row.try_get(0)?,
                    profit_rate: row.try_get(1)?,
                })
            })
            .collect()
    }
}

pub struct PgConnectionProvider {
    db: DatabaseConfig,
}

impl PgConnectionProvider {
    pub fn new(db: DatabaseConfig) -> Self {
        Self { db }
    }
}

impl ConnectionProvider for PgConnectionProvider {
    fn connect(&self) -> PipelineResult<Box<dyn FeatureSource>> {
        Ok(Box::new(PgStore::connect(&self.db)?))
    }
}

#[cfg(test)]
mod tests {
    use super::PROFIT_RATE_SQL;

    #[test]
    fn profit_ratio_divides_in_floating_point() {
        let ratio = PROFIT_RATE_SQL
            .lines()
            .find(|l| l.contains("profit_rate_90d"))
            .unwrap();
        let (numerator, denominator) = ratio.split_once(" / ").unwrap();

        assert!(numerator.trim_end().ends_with("::float8"), "{numerator}");
        assert!(denominator.contains("SUM(l.amount)::float8"), "{denominator}");
    }
}
