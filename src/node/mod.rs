//! Node Admin Module
//!
//! The administrative calls the bootstrapper makes against a single
//! database node, behind a trait so the control flow can run against
//! a real server or an in-process fake.

mod mongo;
pub mod memory;

pub use mongo::MongoNode;
pub use memory::MemoryNode;

use mongodb::bson::Document;

use crate::error::Result;

/// Replica set administration on one node
#[async_trait::async_trait]
pub trait ReplicaSetAdmin: Send + Sync {
    /// Address of the node, for logs and errors
    fn address(&self) -> &str;

    /// Current replica set configuration (`replSetGetConfig`)
    ///
    /// Fails with [`crate::Error::NotInitiated`] when the node has no
    /// configuration yet.
    async fn current_config(&self) -> Result<Document>;

    /// Submit a new topology (`replSetInitiate`)
    async fn initiate(&self, config: &Document) -> Result<()>;

    /// Whether the node currently accepts writes as primary (`hello`)
    async fn is_writable_primary(&self) -> Result<bool>;
}
