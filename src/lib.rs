//! replinit - Idempotent MongoDB Replica Set Bootstrapper
//!
//! Brings a fresh mongod into a known replica set topology. On start the
//! target node is asked for its replica set configuration; if it has none,
//! the configured topology is submitted with `replSetInitiate`, exactly once.
//!
//! # Features
//!
//! - Topology loaded from TOML, defaulting to a single-node `docker-replicaset`
//! - Strict check policy: only "not initiated" triggers initiation,
//!   connectivity errors are retried with backoff
//! - Lenient check policy for compatibility with blanket-catch init scripts
//! - Concurrent initiation races reported as success
//! - Optional wait for the node to become primary

pub mod config;
pub mod error;
pub mod topology;
pub mod node;
pub mod bootstrap;

pub use config::BootstrapConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BootstrapConfig, CheckPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::topology::{MemberConfig, ReplicaSetConfig};
    pub use crate::node::{MemoryNode, MongoNode, ReplicaSetAdmin};
    pub use crate::bootstrap::{bootstrap, BootstrapOptions, BootstrapOutcome, BootstrapState, Initiator};
}
