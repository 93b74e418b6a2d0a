#![warn(missing_docs)]

//! objstore management subsystem: admin service, REST adapter, configuration and CLI

pub mod api;
pub mod cli;
pub mod config;
pub mod http;

pub use api::{
    AddLifecyclePolicyRequest, AddReplicationPolicyRequest, AdminService, ApiError, ApiResult,
    LifecyclePolicyView, PolicyList, RecordChangeRequest, TriggerSyncRequest,
};
pub use config::ObjstoreConfig;
