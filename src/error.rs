// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::BallotNum;

/// Errors surfaced by the transports, the acceptor service and the proposer
/// driver.
///
/// Failing to reach a quorum is deliberately absent: that outcome is
/// [`NoQuorum`](crate::proposer::NoQuorum), consumed by the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// The acceptor could not be dialled, or is marked down.
    #[error("acceptor {acceptor} unreachable")]
    Unreachable { acceptor: u64 },

    #[error("rpc to acceptor {acceptor} timed out")]
    RpcTimeout { acceptor: u64 },

    /// A peer sent a line longer than the frame limit.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: u64 },

    /// The acceptor answered with an error frame.
    #[error("acceptor refused request: {0}")]
    Remote(String),

    #[error("reply does not match request")]
    UnexpectedReply,

    /// An Accept carried no value.
    #[error("accept request carries no value")]
    MissingValue,

    #[error("acceptor set is empty")]
    EmptyAcceptorSet,

    /// A bounded run ran out of time; `ballot` is the last one tried.
    #[error("no value established before deadline (last ballot {ballot})")]
    DeadlineExceeded { ballot: BallotNum },

    /// An acceptor promised a ballot at the last counter value, so the
    /// proposer has no higher ballot left to retry with.
    #[error("ballots exhausted (last ballot {ballot})")]
    BallotsExhausted { ballot: BallotNum },

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
