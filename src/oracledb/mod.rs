// ABOUTME: Oracle backend for the flashback engine, built on the `oracle` (ODPI-C) crate
// ABOUTME: Provides the pooled OracleDatabase, SQL text, row conversion and error classification

pub mod connection;
pub mod database;
pub mod errors;
pub mod rows;
pub mod sql;

pub use connection::connect;
pub use database::OracleDatabase;
