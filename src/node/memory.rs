//! In-memory Node
//!
//! A fake mongod that keeps its replica set config in memory. It follows
//! the server's rules for the three admin commands and can be scripted
//! to fail, so bootstrap behaviour can be exercised without a database.

use std::collections::VecDeque;

use mongodb::bson::Document;
use tokio::sync::Mutex;

use super::ReplicaSetAdmin;
use crate::error::{Error, Result};

struct MemoryState {
    /// Stored replica set config (None = not initiated)
    config: Option<Document>,
    /// Whether the node was started with --replSet
    replication_enabled: bool,
    /// Errors returned by the next config checks, in order
    check_failures: VecDeque<Error>,
    /// Error returned by the next initiate call
    initiate_failure: Option<Error>,
    /// Config installed by a competing bootstrapper right before our initiate
    racing_config: Option<Document>,
    /// Errors returned by the next hello calls, in order
    hello_failures: VecDeque<Error>,
    /// hello polls after initiation before the node reports primary
    polls_until_primary: Option<u32>,
    check_calls: usize,
    initiate_calls: usize,
    hello_calls: usize,
}

/// In-memory stand-in for a mongod
pub struct MemoryNode {
    address: String,
    state: Mutex<MemoryState>,
}

impl MemoryNode {
    /// A fresh node started with `--replSet` and no config
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::new(MemoryState {
                config: None,
                replication_enabled: true,
                check_failures: VecDeque::new(),
                initiate_failure: None,
                racing_config: None,
                hello_failures: VecDeque::new(),
                polls_until_primary: Some(0),
                check_calls: 0,
                initiate_calls: 0,
                hello_calls: 0,
            }),
        }
    }

    /// A node that already holds `config`
    pub fn with_config(address: impl Into<String>, config: Document) -> Self {
        let mut node = Self::new(address);
        node.state.get_mut().config = Some(config);
        node
    }

    /// Node started without `--replSet`
    pub fn without_replication(mut self) -> Self {
        self.state.get_mut().replication_enabled = false;
        self
    }

    /// Fail the next config checks with these errors
    pub fn with_check_failures(mut self, errors: Vec<Error>) -> Self {
        self.state.get_mut().check_failures = errors.into();
        self
    }

    /// Fail the next initiate call with this error
    pub fn with_initiate_failure(mut self, error: Error) -> Self {
        self.state.get_mut().initiate_failure = Some(error);
        self
    }

    /// Another bootstrapper initiates `config` between our check and our initiate
    pub fn with_racing_initiator(mut self, config: Document) -> Self {
        self.state.get_mut().racing_config = Some(config);
        self
    }

    /// Fail the next hello calls with these errors
    pub fn with_hello_failures(mut self, errors: Vec<Error>) -> Self {
        self.state.get_mut().hello_failures = errors.into();
        self
    }

    /// Report primary only after `polls` hello calls; `None` never elects
    pub fn with_election_delay(mut self, polls: Option<u32>) -> Self {
        self.state.get_mut().polls_until_primary = polls;
        self
    }

    /// Snapshot of the stored config
    pub async fn stored_config(&self) -> Option<Document> {
        self.state.lock().await.config.clone()
    }

    /// Number of config checks received
    pub async fn check_calls(&self) -> usize {
        self.state.lock().await.check_calls
    }

    /// Number of initiate calls received
    pub async fn initiate_calls(&self) -> usize {
        self.state.lock().await.initiate_calls
    }

    /// Number of hello calls received
    pub async fn hello_calls(&self) -> usize {
        self.state.lock().await.hello_calls
    }
}

#[async_trait::async_trait]
impl ReplicaSetAdmin for MemoryNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn current_config(&self) -> Result<Document> {
        let mut state = self.state.lock().await;
        state.check_calls += 1;

        if let Some(err) = state.check_failures.pop_front() {
            return Err(err);
        }
        if !state.replication_enabled {
            return Err(Error::ReplicationDisabled(self.address.clone()));
        }

        state.config.clone().ok_or(Error::NotInitiated)
    }

    async fn initiate(&self, config: &Document) -> Result<()> {
        let mut state = self.state.lock().await;
        state.initiate_calls += 1;

        if let Some(err) = state.initiate_failure.take() {
            return Err(err);
        }
        if !state.replication_enabled {
            return Err(Error::ReplicationDisabled(self.address.clone()));
        }
        if let Some(racing) = state.racing_config.take() {
            state.config = Some(racing);
        }
        if state.config.is_some() {
            return Err(Error::AlreadyInitiated);
        }

        // The server stamps version and term on the stored document.
        let mut stored = config.clone();
        stored.insert("version", 1);
        stored.insert("term", 1_i64);
        state.config = Some(stored);
        Ok(())
    }

    async fn is_writable_primary(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.hello_calls += 1;

        if let Some(err) = state.hello_failures.pop_front() {
            return Err(err);
        }
        if state.config.is_none() {
            return Ok(false);
        }

        match state.polls_until_primary {
            Some(0) => Ok(true),
            Some(n) => {
                state.polls_until_primary = Some(n - 1);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
