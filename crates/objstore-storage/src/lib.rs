#![warn(missing_docs)]

//! objstore storage subsystem: backend contract, memory and local-disk backends, the backend
//! facade that routes `"<backend>:<key>"` references, and archive destinations.

pub mod archive;
pub mod backend;
pub mod error;
pub mod facade;
pub mod factory;
pub mod local;
pub mod memory;
pub mod types;
pub mod validation;

pub use archive::{new_archiver, Archiver, BackendArchiver};
pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use facade::{Facade, FacadeConfig};
pub use factory::{new_backend, BackendConfig};
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use types::{ListOptions, ListResult, Metadata, ObjectInfo};
