// ABOUTME: Library root for flashback-capture
// ABOUTME: Consistent Oracle table capture: retention checks, pinned backfill, SCN-windowed changes

pub mod commands;
pub mod config;
pub mod error;
pub mod flashback;
pub mod oracledb;
pub mod testing;
pub mod utils;

pub use error::{CaptureError, ErrorKind, Result};
