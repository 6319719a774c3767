// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate is a small multi-version key-value store in which every
 * `(key, version)` pair is its own, independent instance of classic
 * single-decree Paxos. Writing a version means running Paxos on that
 * instance to establish an immutable value; reading it means running Paxos
 * _without_ a value of one's own, which surfaces (and re-establishes)
 * whatever value, if any, was already voted for.
 *
 * There is no leader, no log linking versions, no durable storage and no
 * reconfiguration: the caller picks the next version number, acceptor state
 * lives in memory for the life of the process, and the acceptor set is
 * fixed. What remains is the part that has to be right:
 *
 *   - The acceptor state machine ([`AcceptorState`]): a promise floor
 *     `last_bal` and a vote `(val, v_bal)` per instance, with the usual
 *     rule that nothing below the floor is ever voted for.
 *
 *   - The proposer ([`Proposer`]): Prepare to every acceptor, adopt the
 *     highest vote seen in a majority, Accept it (or our own value) at a
 *     majority, and on any refusal retry everything with a higher ballot.
 *
 * Only one value is ever chosen per instance, however many proposers race
 * and however many acceptor calls fail; safety rests entirely on the
 * acceptors' ballot comparisons, never on proposer-side coordination.
 *
 * The proposer is an explicit state machine stepped with batches of replies,
 * so the same code runs under the async fan-out in [`client`] and under the
 * exhaustive model checker in the tests. Transports are pluggable through
 * [`AcceptorClient`]; [`local`] hosts acceptors in-process, [`net`] speaks
 * newline-delimited JSON over TCP with acceptor `id` on `base_port + id`.
 *
 * ## Liveness
 *
 * Retries are unbounded: two proposers can keep outbidding each other
 * forever. Callers that need a ceiling should use
 * [`Proposer::run_within`] or [`KvClient::with_budget`].
 *
 * ## Reference
 *
 * Leslie Lamport. Paxos Made Simple. ACM SIGACT News 32(4), 2001.
 */

mod acceptor;
mod ballot;
pub mod cfg;
pub mod client;
mod error;
pub mod local;
pub mod logging;
mod message;
pub mod net;
pub mod proposer;
mod registry;

pub use acceptor::AcceptorState;
pub use ballot::BallotNum;
pub use cfg::Config;
pub use client::{AcceptorClient, AcceptorSet, KvClient, Operation};
pub use error::{Error, Result};
pub use local::LocalAcceptors;
pub use message::{
    AcceptReply, InstanceId, PrepareReply, ProposerRequest, Request, Response, Value,
};
pub use net::{serve_acceptor, serve_acceptors, AcceptorServer, TcpAcceptorClient};
pub use proposer::{quorum, NoQuorum, Proposer, RunStage, Step};
pub use registry::{InstanceHandle, InstanceRegistry};
