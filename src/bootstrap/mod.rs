//! Bootstrap Module
//!
//! Checks whether a node already belongs to a configured replica set and
//! initiates the requested topology when it does not.
//!
//! ```text
//! Unchecked --(config found)--------------------------> Configured
//! Unchecked --(not initiated / lenient check error)---> Initiating --(initiate returns)--> Done
//! ```

mod backoff;
mod initiator;

pub use backoff::Backoff;
pub use initiator::Initiator;

use std::time::Duration;

use crate::config::{BootstrapSection, CheckPolicy};
use crate::node::ReplicaSetAdmin;
use crate::topology::ReplicaSetConfig;

/// Progress of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Node not queried yet
    Unchecked,
    /// Node already had a config; nothing to do
    Configured,
    /// Initiate request in flight
    Initiating,
    /// Initiate request returned
    Done,
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapState::Unchecked => write!(f, "UNCHECKED"),
            BootstrapState::Configured => write!(f, "CONFIGURED"),
            BootstrapState::Initiating => write!(f, "INITIATING"),
            BootstrapState::Done => write!(f, "DONE"),
        }
    }
}

/// Result of a successful bootstrap run
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// Node was already configured; `drift` is set when its topology
    /// differs from the requested one or could not be read
    AlreadyConfigured {
        existing: Option<ReplicaSetConfig>,
        drift: bool,
    },
    /// This run initiated the replica set
    Initiated,
    /// Another bootstrapper initiated the set between our check and our initiate
    LostRace,
}

impl std::fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapOutcome::AlreadyConfigured { drift: false, .. } => write!(f, "already configured"),
            BootstrapOutcome::AlreadyConfigured { drift: true, .. } => {
                write!(f, "already configured (topology differs)")
            }
            BootstrapOutcome::Initiated => write!(f, "initiated"),
            BootstrapOutcome::LostRace => write!(f, "initiated by another bootstrapper"),
        }
    }
}

/// Runtime options for a bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Error policy for the configuration check
    pub check_policy: CheckPolicy,
    /// Attempts for the configuration check (strict policy only)
    pub check_attempts: u32,
    /// Initial retry backoff
    pub retry_backoff: Duration,
    /// Retry backoff cap
    pub max_backoff: Duration,
    /// Wait for primary after initiating
    pub wait_for_primary: bool,
    /// Upper bound for the primary wait
    pub primary_timeout: Duration,
    /// Poll interval for the primary wait
    pub poll_interval: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self::from(&BootstrapSection::default())
    }
}

impl From<&BootstrapSection> for BootstrapOptions {
    fn from(section: &BootstrapSection) -> Self {
        Self {
            check_policy: section.check_policy,
            check_attempts: section.check_attempts.max(1),
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
            wait_for_primary: section.wait_for_primary,
            primary_timeout: Duration::from_secs(section.primary_timeout_secs),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
        }
    }
}

/// Run a bootstrap against `node` with the given topology
pub async fn bootstrap<N>(
    node: &N,
    topology: &ReplicaSetConfig,
    options: BootstrapOptions,
) -> crate::Result<BootstrapOutcome>
where
    N: ReplicaSetAdmin + ?Sized,
{
    Initiator::new(node, topology, options).run().await
}
