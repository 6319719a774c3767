// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::BallotNum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The opaque payload agreed on per instance. Nothing in this crate looks
/// inside it; it is only carried and compared for equality in tests.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Value(pub i64);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one independent Paxos instance: a single version of a key.
/// Versions of the same key share nothing.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub key: String,
    pub version: u64,
}

impl InstanceId {
    pub fn new(key: impl Into<String>, version: u64) -> Self {
        InstanceId {
            key: key.into(),
            version,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.key, self.version)
    }
}

/// The body of both Prepare and Accept calls. `val` is absent for Prepare
/// and carries the proposed value for Accept.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposerRequest {
    pub id: InstanceId,
    pub bal: BallotNum,
    pub val: Option<Value>,
}

/// An acceptor's state as it was _before_ a Prepare was applied.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReply {
    pub last_bal: BallotNum,
    pub val: Option<Value>,
    pub v_bal: BallotNum,
}

/// The promise floor an acceptor held _before_ an Accept was applied. A
/// `last_bal` above the proposer's ballot means the Accept was refused.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReply {
    pub last_bal: BallotNum,
}

/// One frame sent to an acceptor service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Prepare(ProposerRequest),
    Accept(ProposerRequest),
}

impl Request {
    pub fn instance(&self) -> &InstanceId {
        match self {
            Request::Prepare(r) | Request::Accept(r) => &r.id,
        }
    }
}

/// One frame sent back by an acceptor service. `Error` is only produced for
/// malformed requests; well-formed Prepare and Accept calls always get their
/// typed reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Prepare(PrepareReply),
    Accept(AcceptReply),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_frame_omits_nothing_needed() {
        let req = Request::Prepare(ProposerRequest {
            id: InstanceId::new("k", 3),
            bal: BallotNum::new(1, 2),
            val: None,
        });
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"key\":\"k\""));
        assert!(!line.contains('\n'));
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back.instance(), &InstanceId::new("k", 3));
        assert_eq!(back, req);
    }

    #[test]
    fn instance_ids_render_with_version() {
        assert_eq!(InstanceId::new("apple", 7).to_string(), "apple@v7");
        assert_ne!(InstanceId::new("a", 0), InstanceId::new("a", 1));
    }
}
