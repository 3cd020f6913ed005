//! Restore utility: identifier quoting, psql invocation, exit handling.
//! Nothing here talks to a live database.

use client_features_core::{
    config::DatabaseConfig,
    error::PipelineError,
    restore::{psql_load_command, quote_ident, restore_database, run_command},
};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

fn db() -> DatabaseConfig {
    DatabaseConfig {
        host: "localhost".into(),
        port: 5433,
        user: "etl".into(),
        password: "p@ss; rm -rf /".into(),
        name: "lending".into(),
        maintenance_db: "postgres".into(),
    }
}

#[test]
fn identifiers_are_double_quoted() {
    assert_eq!(quote_ident("lending"), "\"lending\"");
    assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    assert_eq!(quote_ident("x; DROP TABLE loan"), "\"x; DROP TABLE loan\"");
}

#[test]
fn psql_is_invoked_with_an_argument_vector() {
    let cmd = psql_load_command(&db(), Path::new("/data/dump.sql"));

    assert_eq!(cmd.get_program(), "psql");
    let args: Vec<&OsStr> = cmd.get_args().collect();
    let expected: Vec<&OsStr> = [
        "-X", "-q", "-h", "localhost", "-p", "5433", "-U", "etl", "-d", "lending",
        "-v", "ON_ERROR_STOP=1", "-f", "/data/dump.sql",
    ]
    .iter()
    .map(OsStr::new)
    .collect();
    assert_eq!(args, expected);
}

#[test]
fn password_travels_in_the_environment_only() {
    let cmd = psql_load_command(&db(), Path::new("/data/dump.sql"));

    let password = cmd
        .get_envs()
        .find(|(k, _)| *k == OsStr::new("PGPASSWORD"))
        .and_then(|(_, v)| v);
    assert_eq!(password, Some(OsStr::new("p@ss; rm -rf /")));
    assert!(cmd.get_args().all(|a| a != OsStr::new("p@ss; rm -rf /")));
}

#[test]
fn missing_dump_file_aborts_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let result = restore_database(&db(), &dir.path().join("absent.sql"));

    assert!(matches!(result, Err(PipelineError::Config(_))));
}

#[test]
fn restoring_over_the_maintenance_database_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("dump.sql");
    std::fs::write(&dump, "SELECT 1;").unwrap();
    let db = DatabaseConfig { name: "postgres".into(), ..db() };

    match restore_database(&db, &dump) {
        Err(PipelineError::Config(msg)) => assert!(msg.contains("maintenance"), "{msg}"),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn unknown_program_is_a_failed_step() {
    let mut cmd = Command::new("definitely-not-a-real-program-4f1c");
    match run_command("load dump", &mut cmd) {
        Err(PipelineError::CommandFailed { step, .. }) => assert_eq!(step, "load dump"),
        other => panic!("expected CommandFailed, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn non_zero_exit_is_a_failed_step() {
    let result = run_command("drop database", &mut Command::new("false"));
    assert!(matches!(result, Err(PipelineError::CommandFailed { .. })));

    assert!(run_command("noop", &mut Command::new("true")).is_ok());
}
