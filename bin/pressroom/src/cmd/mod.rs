//! Command implementations.

pub mod process;
pub mod rebuild;
pub mod reconcile;
