//! Destructive database restore for test/dev environments.
//!
//! Steps, in order, aborting on the first failure:
//!   1. terminate other sessions on the target database
//!   2. DROP DATABASE IF EXISTS
//!   3. CREATE DATABASE
//!   4. replay the SQL dump with psql
//!
//! Steps 1-3 run over a connection to the maintenance database. The target
//! name is bound as a parameter where SQL allows it and quoted as an
//! identifier where it does not. psql is spawned with an argument vector,
//! never through a shell.

use crate::{
    config::DatabaseConfig,
    error::{PipelineError, PipelineResult},
    store::PgStore,
};
use std::path::Path;
use std::process::Command;

const TERMINATE_SQL: &str =
    "SELECT pg_terminate_backend(pid)
     FROM pg_stat_activity
     WHERE datname = $1 AND pid <> pg_backend_pid()";

/// Quote a PostgreSQL identifier: wrap in double quotes, double any
/// embedded double quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The psql invocation that replays `dump_file` into the target database.
pub fn psql_load_command(db: &DatabaseConfig, dump_file: &Path) -> Command {
    let mut cmd = Command::new("psql");
    cmd.arg("-X")
        .arg("-q")
        .args(["-h", db.host.as_str()])
        .arg("-p")
        .arg(db.port.to_string())
        .args(["-U", db.user.as_str()])
        .args(["-d", db.name.as_str()])
        .args(["-v", "ON_ERROR_STOP=1"])
        .arg("-f")
        .arg(dump_file)
        .env("PGPASSWORD", &db.password);
    cmd
}

/// Run `cmd` to completion; any non-zero exit is an error.
pub fn run_command(step: &str, cmd: &mut Command) -> PipelineResult<()> {
    log::debug!("Running step '{step}': {cmd:?}");
    let status = cmd.status().map_err(|e| PipelineError::CommandFailed {
        step: step.to_string(),
        status: format!("spawn failure ({e})"),
    })?;
    if !status.success() {
        return Err(PipelineError::CommandFailed {
            step: step.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Drop, recreate and reload the configured database from `dump_file`.
pub fn restore_database(db: &DatabaseConfig, dump_file: &Path) -> PipelineResult<()> {
    // Refuse before anything destructive happens.
    if !dump_file.is_file() {
        return Err(PipelineError::Config(format!(
            "dump file {} does not exist",
            dump_file.display()
        )));
    }
    db.validate_for_restore()?;

    log::info!("Resetting database '{}' on {}:{}", db.name, db.host, db.port);
    let mut admin = PgStore::connect_to(db, &db.maintenance_db)?;
    let client = admin.client_mut();

    let terminated = client.query(TERMINATE_SQL, &[&db.name])?.len();
    log::info!("Terminated {terminated} session(s) on '{}'", db.name);

    let target = quote_ident(&db.name);
    client.batch_execute(&format!("DROP DATABASE IF EXISTS {target}"))?;
    client.batch_execute(&format!("CREATE DATABASE {target}"))?;
    drop(admin);

    log::info!("Loading {} into '{}'", dump_file.display(), db.name);
    run_command("load dump", &mut psql_load_command(db, dump_file))?;

    log::info!("Database '{}' restored", db.name);
    Ok(())
}
