//! objstore Test & Validation Infrastructure
//!
//! Fault-injecting backends and a small harness for driving the lifecycle and replication
//! engines end to end against in-memory and local-disk storage.

pub mod chaos;
pub mod harness;

#[cfg(test)]
mod lifecycle_e2e;
#[cfg(test)]
mod policy_invariants;
#[cfg(test)]
mod replication_e2e;

pub use chaos::{Fault, FaultHandle, FlakyBackend};
pub use harness::{aged, keyring, TestEnv};
