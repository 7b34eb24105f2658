//! Side-effecting operations: configuration files, discovery, processes, and
//! the CSV ledger.

pub mod batch;
pub mod cache;
pub mod discover;
pub mod ledger;
pub mod process;
pub mod registry;
