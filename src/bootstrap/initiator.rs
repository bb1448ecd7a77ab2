//! Bootstrap Initiator
//!
//! Drives one node from `Unchecked` to either `Configured` or `Done`.

use mongodb::bson::Document;
use tokio::time::{sleep, Instant};

use super::{Backoff, BootstrapOptions, BootstrapOutcome, BootstrapState};
use crate::config::CheckPolicy;
use crate::error::{Error, Result};
use crate::node::ReplicaSetAdmin;
use crate::topology::ReplicaSetConfig;

/// Initiates a replica set on one node, at most once
pub struct Initiator<'a, N: ReplicaSetAdmin + ?Sized> {
    node: &'a N,
    topology: &'a ReplicaSetConfig,
    options: BootstrapOptions,
    state: BootstrapState,
}

impl<'a, N: ReplicaSetAdmin + ?Sized> Initiator<'a, N> {
    /// Create an initiator for `node`
    pub fn new(node: &'a N, topology: &'a ReplicaSetConfig, options: BootstrapOptions) -> Self {
        Self {
            node,
            topology,
            options,
            state: BootstrapState::Unchecked,
        }
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn transition(&mut self, next: BootstrapState) {
        tracing::debug!("Bootstrap state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the bootstrap
    pub async fn run(&mut self) -> Result<BootstrapOutcome> {
        self.topology.validate()?;

        tracing::info!(
            "Checking replica set configuration on {} (policy: {})",
            self.node.address(),
            self.options.check_policy
        );

        match self.check().await {
            Ok(existing) => return self.already_configured(&existing),
            Err(e) if e.is_not_initiated() => {
                tracing::info!("Node {} has no replica set configuration", self.node.address());
            }
            Err(e) if self.options.check_policy == CheckPolicy::Lenient => {
                tracing::warn!(
                    "Configuration check on {} failed ({}); initiating anyway",
                    self.node.address(),
                    e
                );
            }
            Err(e) => {
                tracing::error!("Configuration check on {} failed: {}", self.node.address(), e);
                return Err(e);
            }
        }

        self.transition(BootstrapState::Initiating);
        let desired = self.topology.to_document();
        tracing::info!(
            "Initiating replica set '{}' with {} member(s)",
            self.topology.id,
            self.topology.members.len()
        );
        tracing::debug!("replSetInitiate document: {}", desired);

        let result = self.node.initiate(&desired).await;
        self.transition(BootstrapState::Done);

        match result {
            Ok(()) => {
                tracing::info!("Replica set '{}' initiated", self.topology.id);
                if self.options.wait_for_primary {
                    self.wait_for_primary().await?;
                }
                Ok(BootstrapOutcome::Initiated)
            }
            Err(Error::AlreadyInitiated) => {
                tracing::warn!(
                    "Replica set on {} was initiated concurrently by another bootstrapper",
                    self.node.address()
                );
                Ok(BootstrapOutcome::LostRace)
            }
            Err(e) => {
                tracing::error!("Failed to initiate replica set on {}: {}", self.node.address(), e);
                Err(e)
            }
        }
    }

    /// Query the current config, retrying connectivity errors under the strict policy
    async fn check(&self) -> Result<Document> {
        let attempts = match self.options.check_policy {
            CheckPolicy::Strict => self.options.check_attempts.max(1),
            CheckPolicy::Lenient => 1,
        };
        let mut backoff = Backoff::new(self.options.retry_backoff, self.options.max_backoff);

        let mut attempt = 1;
        loop {
            match self.node.current_config().await {
                Ok(config) => return Ok(config),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Check attempt {}/{} on {} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        self.node.address(),
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn already_configured(&mut self, existing: &Document) -> Result<BootstrapOutcome> {
        self.transition(BootstrapState::Configured);
        tracing::debug!("Existing replica set config: {}", existing);

        // The node is configured either way; an unreadable config is drift, not failure.
        let existing = match ReplicaSetConfig::from_document(existing) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(
                    "Node {} is already configured but its config could not be read ({}); leaving it unchanged",
                    self.node.address(),
                    e
                );
                return Ok(BootstrapOutcome::AlreadyConfigured { existing: None, drift: true });
            }
        };

        let drift = !existing.same_topology(self.topology);
        if drift {
            tracing::warn!(
                "Node {} is already configured as '{}' with a different topology; leaving it unchanged",
                self.node.address(),
                existing.id
            );
        } else {
            tracing::info!(
                "Replica set '{}' already configured on {}; nothing to do",
                existing.id,
                self.node.address()
            );
        }

        Ok(BootstrapOutcome::AlreadyConfigured {
            existing: Some(existing),
            drift,
        })
    }

    /// Poll `hello` until the node reports itself writable primary
    async fn wait_for_primary(&self) -> Result<()> {
        let started = Instant::now();
        // A timeout too large to represent means wait without a deadline.
        let deadline = started.checked_add(self.options.primary_timeout);
        tracing::info!("Waiting for {} to become primary", self.node.address());

        loop {
            match self.node.is_writable_primary().await {
                Ok(true) => {
                    tracing::info!(
                        "Node {} is primary after {:?}",
                        self.node.address(),
                        started.elapsed()
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    tracing::debug!("hello on {} failed while waiting: {}", self.node.address(), e);
                }
                Err(e) => return Err(e),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::PrimaryTimeout {
                    address: self.node.address().to_string(),
                    waited_secs: self.options.primary_timeout.as_secs(),
                });
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use mongodb::bson::doc;
    use crate::bootstrap::bootstrap;
    use crate::node::MemoryNode;
    use crate::topology::MemberConfig;

    const ADDR: &str = "mongo_db_node_01:27017";

    fn options(policy: CheckPolicy) -> BootstrapOptions {
        BootstrapOptions {
            check_policy: policy,
            check_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            wait_for_primary: false,
            primary_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn unreachable() -> Error {
        Error::Connectivity {
            address: ADDR.into(),
            reason: "connection refused".into(),
        }
    }

    fn configured_doc() -> Document {
        doc! {
            "_id": "docker-replicaset",
            "version": 1,
            "term": 3_i64,
            "members": [
                { "_id": 0, "host": ADDR, "priority": 1.0, "votes": 1 }
            ]
        }
    }

    #[tokio::test]
    async fn test_fresh_node_is_initiated_with_literal_topology() {
        let node = MemoryNode::new(ADDR);
        let topology = ReplicaSetConfig::default();
        let mut initiator = Initiator::new(&node, &topology, options(CheckPolicy::Strict));

        let outcome = initiator.run().await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initiated);
        assert_eq!(initiator.state(), BootstrapState::Done);
        assert_eq!(node.initiate_calls().await, 1);

        let stored = node.stored_config().await.unwrap();
        assert_eq!(stored.get_str("_id").unwrap(), "docker-replicaset");
        let members = stored.get_array("members").unwrap();
        assert_eq!(members.len(), 1);
        let member = members[0].as_document().unwrap();
        assert_eq!(member.get_i32("_id").unwrap(), 0);
        assert_eq!(member.get_str("host").unwrap(), ADDR);
    }

    #[tokio::test]
    async fn test_configured_node_is_left_untouched() {
        let node = MemoryNode::with_config(ADDR, configured_doc());
        let topology = ReplicaSetConfig::default();
        let mut initiator = Initiator::new(&node, &topology, options(CheckPolicy::Strict));

        let outcome = initiator.run().await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::AlreadyConfigured { drift: false, .. }));
        assert_eq!(initiator.state(), BootstrapState::Configured);
        assert_eq!(node.initiate_calls().await, 0);
        assert_eq!(node.stored_config().await.unwrap(), configured_doc());
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let node = MemoryNode::new(ADDR);
        let topology = ReplicaSetConfig::default();

        let first = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await.unwrap();
        assert_eq!(first, BootstrapOutcome::Initiated);
        let after_first = node.stored_config().await;

        let second = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await.unwrap();
        assert!(matches!(second, BootstrapOutcome::AlreadyConfigured { drift: false, .. }));
        assert_eq!(node.stored_config().await, after_first);
        assert_eq!(node.initiate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_lost_race_is_not_an_error() {
        let racer = ReplicaSetConfig::single_node("docker-replicaset", ADDR).to_document();
        let node = MemoryNode::new(ADDR).with_racing_initiator(racer.clone());
        let topology = ReplicaSetConfig::default();

        let outcome = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::LostRace);
        assert_eq!(node.stored_config().await, Some(racer));
    }

    #[tokio::test]
    async fn test_strict_retries_transient_connectivity() {
        let node = MemoryNode::with_config(ADDR, configured_doc())
            .with_check_failures(vec![unreachable(), unreachable()]);
        let topology = ReplicaSetConfig::default();

        let outcome = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await.unwrap();
        assert!(matches!(outcome, BootstrapOutcome::AlreadyConfigured { .. }));
        assert_eq!(node.check_calls().await, 3);
        assert_eq!(node.initiate_calls().await, 0);
    }

    #[tokio::test]
    async fn test_strict_surfaces_persistent_connectivity() {
        let node = MemoryNode::new(ADDR)
            .with_check_failures(vec![unreachable(), unreachable(), unreachable(), unreachable()]);
        let topology = ReplicaSetConfig::default();
        let mut initiator = Initiator::new(&node, &topology, options(CheckPolicy::Strict));

        let result = initiator.run().await;
        assert!(matches!(result, Err(Error::Connectivity { .. })));
        assert_eq!(initiator.state(), BootstrapState::Unchecked);
        assert_eq!(node.check_calls().await, 3);
        assert_eq!(node.initiate_calls().await, 0);
    }

    #[tokio::test]
    async fn test_strict_does_not_retry_other_errors() {
        let node = MemoryNode::new(ADDR).with_check_failures(vec![Error::Command {
            code: 13,
            name: "Unauthorized".into(),
            message: "command replSetGetConfig requires authentication".into(),
        }]);
        let topology = ReplicaSetConfig::default();

        let result = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await;
        assert!(matches!(result, Err(Error::Command { code: 13, .. })));
        assert_eq!(node.check_calls().await, 1);
        assert_eq!(node.initiate_calls().await, 0);
    }

    #[tokio::test]
    async fn test_strict_reports_replication_disabled() {
        let node = MemoryNode::new(ADDR).without_replication();
        let topology = ReplicaSetConfig::default();

        let result = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await;
        assert!(matches!(result, Err(Error::ReplicationDisabled(_))));
        assert_eq!(node.initiate_calls().await, 0);
    }

    // Known gap of the lenient policy: a flaky check on an already configured
    // node still sends an initiate request. The server rejects it, so the run
    // ends as a lost race instead of a clean no-op.
    #[tokio::test]
    async fn test_lenient_initiates_after_transient_check_error() {
        let node = MemoryNode::with_config(ADDR, configured_doc())
            .with_check_failures(vec![unreachable()]);
        let topology = ReplicaSetConfig::default();

        let outcome = bootstrap(&node, &topology, options(CheckPolicy::Lenient)).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::LostRace);
        assert_eq!(node.check_calls().await, 1);
        assert_eq!(node.initiate_calls().await, 1);
        assert_eq!(node.stored_config().await.unwrap(), configured_doc());
    }

    #[tokio::test]
    async fn test_lenient_initiates_fresh_node_after_any_error() {
        let node = MemoryNode::new(ADDR).with_check_failures(vec![unreachable()]);
        let topology = ReplicaSetConfig::default();

        let outcome = bootstrap(&node, &topology, options(CheckPolicy::Lenient)).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initiated);
        assert_eq!(node.initiate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_initiate_failure_propagates() {
        let node = MemoryNode::new(ADDR).with_initiate_failure(Error::Command {
            code: 93,
            name: "InvalidReplicaSetConfig".into(),
            message: "No host described in new configuration".into(),
        });
        let topology = ReplicaSetConfig::default();
        let mut initiator = Initiator::new(&node, &topology, options(CheckPolicy::Strict));

        let result = initiator.run().await;
        assert!(matches!(result, Err(Error::Command { code: 93, .. })));
        assert_eq!(initiator.state(), BootstrapState::Done);
        assert_eq!(node.initiate_calls().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_topology_never_reaches_node() {
        let node = MemoryNode::new(ADDR);
        let topology = ReplicaSetConfig {
            id: "rs0".into(),
            members: vec![MemberConfig::new(0, ADDR), MemberConfig::new(0, "other:27017")],
        };

        let result = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await;
        assert!(matches!(result, Err(Error::InvalidTopology(_))));
        assert_eq!(node.check_calls().await, 0);
    }

    #[tokio::test]
    async fn test_drift_is_reported_not_fixed() {
        let node = MemoryNode::with_config(ADDR, configured_doc());
        let topology = ReplicaSetConfig::single_node("rs0", "elsewhere:27017");

        let outcome = bootstrap(&node, &topology, options(CheckPolicy::Strict)).await.unwrap();
        match outcome {
            BootstrapOutcome::AlreadyConfigured { existing, drift } => {
                assert!(drift);
                assert_eq!(existing.unwrap().id, "docker-replicaset");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(node.stored_config().await.unwrap(), configured_doc());
    }

    #[tokio::test]
    async fn test_waits_for_primary() {
        let node = MemoryNode::new(ADDR).with_election_delay(Some(3));
        let topology = ReplicaSetConfig::default();
        let mut opts = options(CheckPolicy::Strict);
        opts.wait_for_primary = true;
        opts.primary_timeout = Duration::from_secs(5);

        let outcome = bootstrap(&node, &topology, opts).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initiated);
        assert_eq!(node.hello_calls().await, 4);
    }

    #[tokio::test]
    async fn test_primary_wait_times_out() {
        let node = MemoryNode::new(ADDR).with_election_delay(None);
        let topology = ReplicaSetConfig::default();
        let mut opts = options(CheckPolicy::Strict);
        opts.wait_for_primary = true;

        let result = bootstrap(&node, &topology, opts).await;
        assert!(matches!(result, Err(Error::PrimaryTimeout { .. })));
        // The node was still initiated.
        assert!(node.stored_config().await.is_some());
    }

    #[tokio::test]
    async fn test_huge_primary_timeout_does_not_overflow() {
        let config = crate::config::BootstrapConfig::from_str(
            "[bootstrap]\nprimary_timeout_secs = 9223372036854775807\npoll_interval_ms = 1",
        )
        .unwrap();
        let node = MemoryNode::new(ADDR).with_election_delay(Some(2));

        let outcome = bootstrap(&node, &config.replica_set, BootstrapOptions::from(&config.bootstrap))
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initiated);
        assert_eq!(node.hello_calls().await, 3);
    }

    #[tokio::test]
    async fn test_primary_wait_retries_connectivity_errors() {
        let node = MemoryNode::new(ADDR).with_hello_failures(vec![unreachable(), unreachable()]);
        let topology = ReplicaSetConfig::default();
        let mut opts = options(CheckPolicy::Strict);
        opts.wait_for_primary = true;
        opts.primary_timeout = Duration::from_secs(5);

        let outcome = bootstrap(&node, &topology, opts).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::Initiated);
        assert_eq!(node.hello_calls().await, 3);
    }

    #[tokio::test]
    async fn test_primary_wait_surfaces_other_errors() {
        let node = MemoryNode::new(ADDR).with_hello_failures(vec![Error::Command {
            code: 13,
            name: "Unauthorized".into(),
            message: "command hello requires authentication".into(),
        }]);
        let topology = ReplicaSetConfig::default();
        let mut opts = options(CheckPolicy::Strict);
        opts.wait_for_primary = true;

        let result = bootstrap(&node, &topology, opts).await;
        assert!(matches!(result, Err(Error::Command { code: 13, .. })));
        assert_eq!(node.hello_calls().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_existing_config_is_drift() {
        let garbled = doc! { "_id": "docker-replicaset", "version": 4 };
        let node = MemoryNode::with_config(ADDR, garbled.clone());
        let topology = ReplicaSetConfig::default();

        for policy in [CheckPolicy::Strict, CheckPolicy::Lenient] {
            let outcome = bootstrap(&node, &topology, options(policy)).await.unwrap();
            assert_eq!(
                outcome,
                BootstrapOutcome::AlreadyConfigured { existing: None, drift: true }
            );
        }
        assert_eq!(node.initiate_calls().await, 0);
        assert_eq!(node.stored_config().await, Some(garbled));
    }

    #[tokio::test]
    async fn test_no_primary_wait_when_already_configured() {
        let node = MemoryNode::with_config(ADDR, configured_doc());
        let topology = ReplicaSetConfig::default();
        let mut opts = options(CheckPolicy::Strict);
        opts.wait_for_primary = true;

        bootstrap(&node, &topology, opts).await.unwrap();
        assert_eq!(node.hello_calls().await, 0);
    }
}
