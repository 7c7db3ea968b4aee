//! Ledger contract and its backends
//
// Contract and shared validation
pub mod ledger;
//
// PostgreSQL backend
pub mod job;
//
// Process-local backend for development and tests
pub mod memory;
