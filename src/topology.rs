//! Replica Set Topology
//!
//! Typed form of the document submitted with `replSetInitiate` and
//! reported back by `replSetGetConfig`.

use std::collections::HashSet;

use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest member priority the server accepts
pub const MAX_PRIORITY: f64 = 1000.0;

/// Replica set topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// Replica set name (`_id`)
    pub id: String,

    /// Members of the set
    pub members: Vec<MemberConfig>,
}

/// A single replica set member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Member `_id`, unique within the set
    pub id: i32,

    /// Member address (host:port)
    pub host: String,

    /// Election priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    /// Number of votes (0 or 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<i32>,

    /// Member is an arbiter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter_only: Option<bool>,

    /// Member is hidden from clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

impl MemberConfig {
    /// Create a member with server defaults for everything but id and host
    pub fn new(id: i32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            priority: None,
            votes: None,
            arbiter_only: None,
            hidden: None,
        }
    }

    fn is_voting(&self) -> bool {
        self.votes.unwrap_or(1) > 0
    }

    fn to_document(&self) -> Document {
        let mut member = doc! {
            "_id": self.id,
            "host": self.host.clone(),
        };
        if let Some(priority) = self.priority {
            member.insert("priority", priority);
        }
        if let Some(votes) = self.votes {
            member.insert("votes", votes);
        }
        if let Some(arbiter_only) = self.arbiter_only {
            member.insert("arbiterOnly", arbiter_only);
        }
        if let Some(hidden) = self.hidden {
            member.insert("hidden", hidden);
        }
        member
    }

    fn from_document(member: &Document) -> Result<Self> {
        let id = member
            .get("_id")
            .and_then(bson_to_i64)
            .ok_or_else(|| Error::MalformedResponse("member is missing a numeric _id".into()))?;
        let id = i32::try_from(id)
            .map_err(|_| Error::MalformedResponse(format!("member _id {} out of range", id)))?;
        let host = member
            .get_str("host")
            .map_err(|_| Error::MalformedResponse(format!("member {} is missing host", id)))?;

        Ok(Self {
            id,
            host: host.to_string(),
            priority: member.get("priority").and_then(bson_to_f64),
            votes: member
                .get("votes")
                .and_then(bson_to_i64)
                .and_then(|v| i32::try_from(v).ok()),
            arbiter_only: member.get("arbiterOnly").and_then(Bson::as_bool),
            hidden: member.get("hidden").and_then(Bson::as_bool),
        })
    }
}

impl Default for ReplicaSetConfig {
    fn default() -> Self {
        Self {
            id: "docker-replicaset".to_string(),
            members: vec![MemberConfig::new(0, "mongo_db_node_01:27017")],
        }
    }
}

impl ReplicaSetConfig {
    /// Single-member topology for the given node
    pub fn single_node(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: vec![MemberConfig::new(0, host)],
        }
    }

    /// Validate the topology against the rules the server enforces on initiate
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidTopology("replica set id cannot be empty".into()));
        }

        if self.members.is_empty() {
            return Err(Error::InvalidTopology("replica set needs at least one member".into()));
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for member in &self.members {
            if member.id < 0 {
                return Err(Error::InvalidTopology(format!(
                    "member id {} cannot be negative",
                    member.id
                )));
            }
            if !ids.insert(member.id) {
                return Err(Error::InvalidTopology(format!("duplicate member id {}", member.id)));
            }

            validate_host(&member.host)?;
            if !hosts.insert(member.host.to_ascii_lowercase()) {
                return Err(Error::InvalidTopology(format!("duplicate member host {}", member.host)));
            }

            if let Some(votes) = member.votes {
                if !(0..=1).contains(&votes) {
                    return Err(Error::InvalidTopology(format!(
                        "member {} votes must be 0 or 1",
                        member.id
                    )));
                }
            }
            if let Some(priority) = member.priority {
                if !(0.0..=MAX_PRIORITY).contains(&priority) {
                    return Err(Error::InvalidTopology(format!(
                        "member {} priority must be between 0 and {}",
                        member.id, MAX_PRIORITY
                    )));
                }
                if !member.is_voting() && priority > 0.0 {
                    return Err(Error::InvalidTopology(format!(
                        "member {} has no votes and must have priority 0",
                        member.id
                    )));
                }
                if member.arbiter_only == Some(true) && priority > 0.0 {
                    return Err(Error::InvalidTopology(format!(
                        "arbiter {} must have priority 0",
                        member.id
                    )));
                }
            }
        }

        if !self.members.iter().any(MemberConfig::is_voting) {
            return Err(Error::InvalidTopology("at least one member must vote".into()));
        }

        Ok(())
    }

    /// BSON document for `replSetInitiate`
    pub fn to_document(&self) -> Document {
        let members: Vec<Bson> = self
            .members
            .iter()
            .map(|m| Bson::Document(m.to_document()))
            .collect();

        doc! {
            "_id": self.id.clone(),
            "members": members,
        }
    }

    /// Parse a document reported by `replSetGetConfig`
    ///
    /// Fields not modelled here (`version`, `term`, `settings`, ...) are ignored.
    pub fn from_document(config: &Document) -> Result<Self> {
        let id = config
            .get_str("_id")
            .map_err(|_| Error::MalformedResponse("replica set config is missing _id".into()))?;
        let members = config
            .get_array("members")
            .map_err(|_| Error::MalformedResponse("replica set config is missing members".into()))?;

        let members = members
            .iter()
            .map(|m| match m {
                Bson::Document(d) => MemberConfig::from_document(d),
                other => Err(Error::MalformedResponse(format!(
                    "member entry is not a document: {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: id.to_string(),
            members,
        })
    }

    /// Compare set name and member (id, host) pairs, ignoring member order
    pub fn same_topology(&self, other: &ReplicaSetConfig) -> bool {
        self.id == other.id && self.member_keys() == other.member_keys()
    }

    fn member_keys(&self) -> Vec<(i32, String)> {
        let mut keys: Vec<_> = self
            .members
            .iter()
            .map(|m| (m.id, m.host.to_ascii_lowercase()))
            .collect();
        keys.sort();
        keys
    }
}

/// Check that `host` looks like `hostname:port`
pub fn validate_host(host: &str) -> Result<()> {
    let (name, port) = host
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidTopology(format!("host '{}' must be hostname:port", host)))?;

    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidTopology(format!("host '{}' has an invalid hostname", host)));
    }

    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(Error::InvalidTopology(format!("host '{}' has an invalid port", host))),
    }
}

fn bson_to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn bson_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}
