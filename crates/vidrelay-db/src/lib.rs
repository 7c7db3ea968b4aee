//! vidrelay job ledger
//!
//! Durable record of every transfer job. All state changes go through
//! [`JobLedger::update`], a compare-and-swap on the job's current state, so two
//! workers can never both own the same job.

pub mod db;

pub use db::job::PgJobLedger;
pub use db::ledger::{validate_mutation, JobLedger, LedgerError, NEW_JOB_CHANNEL};
pub use db::memory::MemoryJobLedger;
