#![warn(missing_docs)]

//! objstore policy engine: lifecycle retention sweeps and cross-backend replication with
//! layered encryption, per-policy status accounting, and per-policy scheduling.

pub mod changelog;
pub mod detector;
pub mod error;
pub mod layers;
pub mod lifecycle;
pub mod manager;
pub mod persist;
pub mod replication;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod sweep;
pub mod syncer;

pub use changelog::{ChangeEvent, ChangeLog, ChangeOperation};
pub use error::{ErrorKind, PolicyError, PolicyResult};
pub use layers::{CopyPlan, LayerFactories};
pub use lifecycle::{LifecycleAction, LifecyclePolicy};
pub use manager::{ManagerOptions, ReplicationManager};
pub use persist::PolicyFile;
pub use replication::{
    EncryptionConfig, EncryptionPolicy, ReplicationMode, ReplicationPolicy, ReplicationStatus,
    SyncResult,
};
pub use scheduler::Scheduler;
pub use status::{StatusAccumulator, StatusSnapshot};
pub use store::{Policy, PolicyStore};
pub use sweep::{LifecycleManager, SweepReport};
