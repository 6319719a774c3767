// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    AcceptReply, BallotNum, Config, Error, InstanceId, PrepareReply, Proposer, ProposerRequest,
    Result, Step, Value,
};
use async_trait::async_trait;
use futures::future::join_all;
use itertools::Itertools;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The RPC boundary between a proposer and the acceptors.
///
/// Implementations carry a request to acceptor `acceptor` and bring back
/// its reply. They need not bound their own latency: every call is wrapped
/// in the acceptor set's per-call timeout.
#[async_trait]
pub trait AcceptorClient: Send + Sync {
    async fn prepare(&self, acceptor: u64, req: &ProposerRequest) -> Result<PrepareReply>;
    async fn accept(&self, acceptor: u64, req: &ProposerRequest) -> Result<AcceptReply>;
}

/// Which of the two acceptor calls a broadcast is carrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Prepare,
    Accept,
}

/// The full set of acceptors a proposer runs against, and the client used
/// to reach them. Quorum is computed from `ids`, not from whoever answers.
#[derive(Clone, Debug)]
pub struct AcceptorSet<C> {
    client: C,
    ids: Vec<u64>,
    rpc_timeout: Duration,
}

impl<C: AcceptorClient> AcceptorSet<C> {
    pub fn new(client: C, ids: Vec<u64>) -> Self {
        AcceptorSet {
            client,
            ids,
            rpc_timeout: crate::cfg::DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn from_config(client: C, cfg: &Config) -> Self {
        AcceptorSet::new(client, cfg.acceptor_ids.clone()).with_rpc_timeout(cfg.rpc_timeout)
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sends `req` as a Prepare to every acceptor at once and returns the
    /// replies that arrived in time, in acceptor order.
    pub async fn prepare_all(&self, req: &ProposerRequest) -> Vec<PrepareReply> {
        let client = &self.client;
        self.broadcast(Operation::Prepare, move |aid| client.prepare(aid, req))
            .await
    }

    /// Sends `req` as an Accept to every acceptor at once.
    pub async fn accept_all(&self, req: &ProposerRequest) -> Vec<AcceptReply> {
        let client = &self.client;
        self.broadcast(Operation::Accept, move |aid| client.accept(aid, req))
            .await
    }

    // A failed or timed-out call simply contributes no reply: it is a
    // missing vote, never a rejection, and never aborts the other calls.
    async fn broadcast<R, F, Fut>(&self, op: Operation, call: F) -> Vec<R>
    where
        R: std::fmt::Debug,
        F: Fn(u64) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let rpc_timeout = self.rpc_timeout;
        let calls = self.ids.iter().map(|&aid| {
            let pending = call(aid);
            async move {
                match within_rpc_timeout(aid, rpc_timeout, pending).await {
                    Ok(reply) => {
                        debug!("proposer: {:?} reply from acceptor-{}: {:?}", op, aid, reply);
                        Some(reply)
                    }
                    Err(e) => {
                        warn!("proposer: {:?} failure from acceptor-{}: {}", op, aid, e);
                        None
                    }
                }
            }
        });
        join_all(calls).await.into_iter().flatten().collect()
    }
}

async fn within_rpc_timeout<R, Fut>(acceptor: u64, rpc_timeout: Duration, call: Fut) -> Result<R>
where
    Fut: Future<Output = Result<R>>,
{
    match tokio::time::timeout(rpc_timeout, call).await {
        Ok(res) => res,
        Err(_) => Err(Error::RpcTimeout { acceptor }),
    }
}

impl Proposer {
    /// Runs the two phases, retrying with higher ballots, until a value is
    /// established for this instance or a read finds nothing to establish.
    ///
    /// There is no bound on the number of retries; see
    /// [`run_within`](Proposer::run_within). The one way a run gives up by
    /// itself is [`Error::BallotsExhausted`].
    pub async fn run<C: AcceptorClient>(
        &mut self,
        acceptors: &AcceptorSet<C>,
        val: Option<Value>,
    ) -> Result<Option<Value>> {
        if acceptors.is_empty() {
            return Err(Error::EmptyAcceptorSet);
        }
        info!(
            "proposer: run {} from {} against [{}]",
            self.id,
            self.bal,
            acceptors.ids().iter().join(",")
        );
        let mut step = self.start(acceptors.len(), val);
        loop {
            step = match step {
                Step::Prepare(req) => {
                    let replies = acceptors.prepare_all(&req).await;
                    self.on_prepare_replies(&replies)
                }
                Step::Accept(req) => {
                    let replies = acceptors.accept_all(&req).await;
                    self.on_accept_replies(&replies)
                }
                Step::Done(v) => return Ok(v),
                Step::Exhausted => return Err(Error::BallotsExhausted { ballot: self.bal }),
            }
        }
    }

    /// Like [`run`](Proposer::run), giving up after `budget`. On expiry the
    /// proposer keeps its last ballot, so a later run resumes above it.
    pub async fn run_within<C: AcceptorClient>(
        &mut self,
        acceptors: &AcceptorSet<C>,
        val: Option<Value>,
        budget: Duration,
    ) -> Result<Option<Value>> {
        match tokio::time::timeout(budget, self.run(acceptors, val)).await {
            Ok(res) => res,
            Err(_) => {
                warn!("proposer: {} gave up at {} after {:?}", self.id, self.bal, budget);
                Err(Error::DeadlineExceeded { ballot: self.bal })
            }
        }
    }
}

/// Set/get by key and version on top of [`Proposer`].
///
/// Every call uses a fresh proposer starting at ballot
/// `{0, proposer_id}`; distinct clients should use distinct ids.
#[derive(Clone, Debug)]
pub struct KvClient<C> {
    acceptors: AcceptorSet<C>,
    proposer_id: u64,
    budget: Option<Duration>,
}

impl<C: AcceptorClient> KvClient<C> {
    pub fn new(acceptors: AcceptorSet<C>, proposer_id: u64) -> Self {
        KvClient {
            acceptors,
            proposer_id,
            budget: None,
        }
    }

    /// Bounds every call by `budget`.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Tries to establish `val` at `key`/`version`. Returns the value that
    /// the instance actually holds, which is an earlier one if the version
    /// was already taken.
    pub async fn set(&self, key: &str, version: u64, val: Value) -> Result<Option<Value>> {
        self.propose(InstanceId::new(key, version), Some(val)).await
    }

    /// Reads `key`/`version`, returning `None` if nothing was ever voted.
    pub async fn get(&self, key: &str, version: u64) -> Result<Option<Value>> {
        self.propose(InstanceId::new(key, version), None).await
    }

    async fn propose(&self, id: InstanceId, val: Option<Value>) -> Result<Option<Value>> {
        let mut p = Proposer::new(id, BallotNum::new(0, self.proposer_id));
        match self.budget {
            Some(budget) => p.run_within(&self.acceptors, val, budget).await,
            None => p.run(&self.acceptors, val).await,
        }
    }
}
