//! Client feature ETL: extract loan and payment aggregates, decide
//! ACCEPT/REJECT per client, write a Parquet artifact and publish it.

pub mod artifact;
pub mod clock;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod extractor;
pub mod publisher;
pub mod restore;
pub mod store;
pub mod task;
pub mod types;
