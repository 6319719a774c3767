// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{AcceptReply, BallotNum, PrepareReply, Value};
use tracing::trace;

/// The acceptor side of one Paxos instance.
///
/// - `last_bal` is the promise floor: nothing below it will be voted for.
/// - `val` / `v_bal` are the last vote cast and the ballot it was cast in.
///
/// `v_bal <= last_bal` holds after every call, and `val` is present exactly
/// when `v_bal` is non-zero (some Accept has succeeded). Neither call ever
/// fails; a stale ballot is refused implicitly, by handing back a `last_bal`
/// higher than the caller's.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct AcceptorState {
    pub last_bal: BallotNum,
    pub val: Option<Value>,
    pub v_bal: BallotNum,
}

impl AcceptorState {
    pub fn new() -> Self {
        AcceptorState::default()
    }

    /// Phase 1. Raises the promise floor to `bal` if `bal >= last_bal` and
    /// returns the whole state as it was before, so the proposer can recover
    /// any earlier vote.
    pub fn prepare(&mut self, bal: BallotNum) -> PrepareReply {
        let reply = PrepareReply {
            last_bal: self.last_bal,
            val: self.val,
            v_bal: self.v_bal,
        };
        if bal >= self.last_bal {
            trace!("promise {} (floor was {})", bal, self.last_bal);
            self.last_bal = bal;
        }
        reply
    }

    /// Phase 2. Votes for `val` under `bal` if `bal >= last_bal`. Only the
    /// prior promise floor is returned; that is enough for the proposer to
    /// tell whether it was outraced.
    pub fn accept(&mut self, bal: BallotNum, val: Value) -> AcceptReply {
        let reply = AcceptReply {
            last_bal: self.last_bal,
        };
        if bal >= self.last_bal {
            trace!("vote {} under {}", val, bal);
            self.last_bal = bal;
            self.val = Some(val);
            self.v_bal = bal;
        }
        reply
    }

    pub fn has_voted(&self) -> bool {
        !self.v_bal.is_zero()
    }
}
