// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{AcceptReply, BallotNum, InstanceId, PrepareReply, ProposerRequest, Value};
use tracing::{debug, info, warn};

// The proposer is written as an explicit state machine rather than as one
// async function so that the same code can be driven both by the async
// fan-out in `client` and by the model checker, which needs to clone, hash
// and compare proposer states between steps.
//
// A run moves Init -> Phase1 -> Phase2 -> Fini, falling back to Phase1 with
// a higher ballot whenever either phase misses its quorum. Each transition
// is triggered by handing in the full set of replies gathered for the
// outstanding phase, and answers with the next `Step` to perform. A run
// that is outraced at the last counter value ends in Exhausted.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunStage {
    Init,      // Newly-constructed proposer; run has not begun.
    Phase1,    // Prepare broadcast outstanding.
    Phase2,    // Accept broadcast outstanding.
    Fini,      // Finished, with or without a value.
    Exhausted, // Outraced by a ballot no bump can pass.
}

/// What the driver must do next.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Step {
    /// Send this Prepare to every acceptor and hand the replies to
    /// [`Proposer::on_prepare_replies`].
    Prepare(ProposerRequest),
    /// Send this Accept to every acceptor and hand the replies to
    /// [`Proposer::on_accept_replies`].
    Accept(ProposerRequest),
    /// The run is over. `None` means a read found nothing to establish.
    Done(Option<Value>),
    /// The run gave up: an acceptor has promised a ballot at the last
    /// counter value, so no retry can outrank it.
    Exhausted,
}

/// A phase was refused by too many acceptors. `highest` is the largest
/// ballot seen in a refusing reply (or our own, if none refused).
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct NoQuorum {
    pub highest: BallotNum,
}

/// Size of a majority of `acceptors`.
pub fn quorum(acceptors: usize) -> usize {
    acceptors / 2 + 1
}

/// Counts Phase 1 replies in arrival order. A reply votes for us if its
/// `last_bal` does not exceed `bal`. Once `quorum` votes are in, returns the
/// value carried by the vote with the strictly highest `v_bal` among them
/// (absent if none of them had voted).
pub fn tally_promises<'a, I>(
    bal: &BallotNum,
    replies: I,
    quorum: usize,
) -> Result<Option<Value>, NoQuorum>
where
    I: IntoIterator<Item = &'a PrepareReply>,
{
    let mut count = 0;
    let mut highest = *bal;
    let mut max_voted = PrepareReply::default();
    for r in replies {
        if r.last_bal > *bal {
            highest = highest.max(r.last_bal);
            continue;
        }
        if r.v_bal > max_voted.v_bal {
            max_voted = *r;
        }
        count += 1;
        if count == quorum {
            return Ok(max_voted.val);
        }
    }
    Err(NoQuorum { highest })
}

/// Counts Phase 2 replies the same way as [`tally_promises`].
pub fn tally_accepts<'a, I>(bal: &BallotNum, replies: I, quorum: usize) -> Result<(), NoQuorum>
where
    I: IntoIterator<Item = &'a AcceptReply>,
{
    let mut count = 0;
    let mut highest = *bal;
    for r in replies {
        if r.last_bal > *bal {
            highest = highest.max(r.last_bal);
            continue;
        }
        count += 1;
        if count == quorum {
            return Ok(());
        }
    }
    Err(NoQuorum { highest })
}

/// Drives one instance towards a chosen value.
///
/// With a candidate value a run is a write; without one it is a read that
/// surfaces (and re-establishes) whatever value is already voted. Either
/// way the result may differ from the candidate: a value discovered in
/// Phase 1 always wins over the caller's.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Proposer {
    pub id: InstanceId,
    pub(crate) bal: BallotNum,

    // Reset once per run.
    pub(crate) candidate: Option<Value>,
    pub(crate) quorum: usize,
    pub(crate) stage: RunStage,
    pub(crate) chosen: Option<Value>,
    pub(crate) attempts: u64,

    // Reset once per Phase1 -> Phase2 attempt.
    pub(crate) val: Option<Value>,
}

impl Proposer {
    pub fn new(id: InstanceId, bal: BallotNum) -> Self {
        Proposer {
            id,
            bal,
            candidate: None,
            quorum: 0,
            stage: RunStage::Init,
            chosen: None,
            attempts: 0,
            val: None,
        }
    }

    /// The working ballot. It only moves between attempts.
    pub fn ballot(&self) -> BallotNum {
        self.bal
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Number of Phase 1 attempts made by the current run.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn is_fini(&self) -> bool {
        self.stage == RunStage::Fini
    }

    /// The value established by a finished run.
    pub fn chosen(&self) -> Option<Value> {
        self.chosen
    }

    /// Starts a run against `acceptors` acceptors, optionally proposing
    /// `val`. May be called at any time; any run in progress is abandoned.
    pub fn start(&mut self, acceptors: usize, val: Option<Value>) -> Step {
        self.quorum = quorum(acceptors);
        self.candidate = val;
        self.chosen = None;
        self.attempts = 0;
        self.begin_attempt()
    }

    /// The step currently awaited by the state machine.
    pub fn current_step(&self) -> Option<Step> {
        match self.stage {
            RunStage::Init => None,
            RunStage::Phase1 => Some(Step::Prepare(self.request())),
            RunStage::Phase2 => Some(Step::Accept(self.request())),
            RunStage::Fini => Some(Step::Done(self.chosen)),
            RunStage::Exhausted => Some(Step::Exhausted),
        }
    }

    pub fn on_prepare_replies<'a, I>(&mut self, replies: I) -> Step
    where
        I: IntoIterator<Item = &'a PrepareReply>,
    {
        if self.stage != RunStage::Phase1 {
            debug!("proposer {}: ignoring prepare replies in {:?}", self.id, self.stage);
            return self.current_step().unwrap_or(Step::Done(None));
        }
        let discovered = match tally_promises(&self.bal, replies, self.quorum) {
            Ok(discovered) => discovered,
            Err(NoQuorum { highest }) => {
                warn!(
                    instance = %self.id,
                    "phase 1 missed quorum, highest ballot {}, retrying",
                    highest
                );
                return self.retry(highest);
            }
        };
        match discovered {
            Some(v) => {
                info!(instance = %self.id, "phase 1 found voted value {}", v);
                self.candidate = Some(v);
            }
            None => debug!(
                instance = %self.id,
                "no voted value seen, proposing {:?}",
                self.candidate
            ),
        }
        match self.candidate {
            None => {
                info!(instance = %self.id, "nothing to propose, finishing");
                self.finish(None)
            }
            Some(v) => {
                self.val = Some(v);
                self.stage = RunStage::Phase2;
                Step::Accept(self.request())
            }
        }
    }

    pub fn on_accept_replies<'a, I>(&mut self, replies: I) -> Step
    where
        I: IntoIterator<Item = &'a AcceptReply>,
    {
        if self.stage != RunStage::Phase2 {
            debug!("proposer {}: ignoring accept replies in {:?}", self.id, self.stage);
            return self.current_step().unwrap_or(Step::Done(None));
        }
        match tally_accepts(&self.bal, replies, self.quorum) {
            Ok(()) => {
                info!(
                    instance = %self.id,
                    ballot = %self.bal,
                    "value {:?} voted by a quorum",
                    self.val
                );
                self.finish(self.val)
            }
            Err(NoQuorum { highest }) => {
                warn!(
                    instance = %self.id,
                    "phase 2 missed quorum, highest ballot {}, retrying",
                    highest
                );
                self.retry(highest)
            }
        }
    }

    fn request(&self) -> ProposerRequest {
        ProposerRequest {
            id: self.id.clone(),
            bal: self.bal,
            val: self.val,
        }
    }

    fn begin_attempt(&mut self) -> Step {
        self.val = None;
        self.attempts += 1;
        self.stage = RunStage::Phase1;
        Step::Prepare(self.request())
    }

    // Phase 1 evidence belongs to the old ballot, so a retry always starts
    // over from Prepare.
    fn retry(&mut self, highest: BallotNum) -> Step {
        match self.bal.bumped_past(&highest) {
            Some(bal) => {
                self.bal = bal;
                self.begin_attempt()
            }
            None => {
                warn!(instance = %self.id, "no ballot above {}, giving up", highest);
                self.val = None;
                self.stage = RunStage::Exhausted;
                Step::Exhausted
            }
        }
    }

    fn finish(&mut self, val: Option<Value>) -> Step {
        self.chosen = val;
        self.stage = RunStage::Fini;
        Step::Done(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(n: u64, p: u64) -> BallotNum {
        BallotNum::new(n, p)
    }

    fn promise(last: BallotNum, voted: Option<(BallotNum, i64)>) -> PrepareReply {
        PrepareReply {
            last_bal: last,
            val: voted.map(|(_, v)| Value(v)),
            v_bal: voted.map(|(bal, _)| bal).unwrap_or_default(),
        }
    }

    fn ack(last: BallotNum) -> AcceptReply {
        AcceptReply { last_bal: last }
    }

    #[test]
    fn quorum_is_a_majority() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 2);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
    }

    #[test]
    fn promises_pick_highest_vote() {
        let replies = vec![
            promise(b(1, 1), Some((b(1, 1), 10))),
            promise(b(2, 1), Some((b(2, 1), 20))),
            promise(BallotNum::ZERO, None),
        ];
        assert_eq!(tally_promises(&b(3, 2), &replies, 3), Ok(Some(Value(20))));
    }

    #[test]
    fn promises_stop_counting_at_quorum() {
        // The third reply carries a vote, but quorum is met before it.
        let replies = vec![
            promise(BallotNum::ZERO, None),
            promise(BallotNum::ZERO, None),
            promise(b(1, 1), Some((b(1, 1), 10))),
        ];
        assert_eq!(tally_promises(&b(3, 2), &replies, 2), Ok(None));
    }

    #[test]
    fn equal_vote_ballots_do_not_override() {
        let replies = vec![
            promise(b(1, 1), Some((b(1, 1), 10))),
            promise(b(1, 1), Some((b(1, 1), 11))),
        ];
        assert_eq!(tally_promises(&b(2, 1), &replies, 2), Ok(Some(Value(10))));
    }

    #[test]
    fn refusals_report_the_highest_ballot() {
        let replies = vec![
            promise(b(4, 1), None),
            promise(BallotNum::ZERO, None),
            promise(b(7, 3), None),
            promise(b(5, 9), None),
        ];
        assert_eq!(
            tally_promises(&b(2, 2), &replies, 3),
            Err(NoQuorum { highest: b(7, 3) })
        );
    }

    #[test]
    fn no_replies_is_no_quorum_at_own_ballot() {
        assert_eq!(
            tally_accepts(&b(2, 2), &[], 1),
            Err(NoQuorum { highest: b(2, 2) })
        );
    }

    #[test]
    fn equal_floor_counts_as_accepted() {
        let replies = vec![ack(b(2, 2)), ack(b(1, 0))];
        assert_eq!(tally_accepts(&b(2, 2), &replies, 2), Ok(()));
        assert!(tally_accepts(&b(2, 1), &replies, 2).is_err());
    }

    #[test]
    fn write_on_fresh_instance() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(0, 2));
        assert_eq!(p.stage(), RunStage::Init);
        let step = p.start(3, Some(Value(5)));
        match step {
            Step::Prepare(req) => assert_eq!(req.val, None),
            other => panic!("unexpected {:?}", other),
        }
        let empty = vec![PrepareReply::default(); 3];
        match p.on_prepare_replies(&empty) {
            Step::Accept(req) => {
                assert_eq!(req.val, Some(Value(5)));
                assert_eq!(req.bal, b(0, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
        let acks = vec![ack(b(0, 2)), ack(b(0, 2))];
        assert_eq!(p.on_accept_replies(&acks), Step::Done(Some(Value(5))));
        assert!(p.is_fini());
        assert_eq!(p.chosen(), Some(Value(5)));
        assert_eq!(p.attempts(), 1);
    }

    #[test]
    fn discovered_value_overrides_candidate() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(5, 2));
        p.start(3, Some(Value(99)));
        let replies = vec![
            promise(b(1, 1), Some((b(1, 1), 7))),
            promise(BallotNum::ZERO, None),
        ];
        match p.on_prepare_replies(&replies) {
            Step::Accept(req) => assert_eq!(req.val, Some(Value(7))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn read_of_nothing_finishes_without_value() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(0, 1));
        p.start(3, None);
        let replies = vec![PrepareReply::default(); 3];
        assert_eq!(p.on_prepare_replies(&replies), Step::Done(None));
        assert!(p.is_fini());
        assert_eq!(p.chosen(), None);
    }

    #[test]
    fn phase2_refusal_restarts_from_prepare() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(0, 1));
        p.start(3, Some(Value(1)));
        p.on_prepare_replies(&vec![PrepareReply::default(); 3]);
        let refused = vec![ack(b(0, 2)), ack(b(0, 2)), ack(BallotNum::ZERO)];
        match p.on_accept_replies(&refused) {
            Step::Prepare(req) => {
                assert_eq!(req.bal, b(1, 1));
                assert_eq!(req.val, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(p.stage(), RunStage::Phase1);
        assert_eq!(p.attempts(), 2);
    }

    #[test]
    fn discovered_value_survives_retries() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(1, 1));
        p.start(1, Some(Value(1)));
        p.on_prepare_replies(&[promise(b(0, 3), Some((b(0, 3), 3)))]);
        // Outraced in phase 2, then a later phase 1 sees no vote at all.
        p.on_accept_replies(&[ack(b(2, 2))]);
        match p.on_prepare_replies(&[PrepareReply::default()]) {
            Step::Accept(req) => assert_eq!(req.val, Some(Value(3))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn outraced_at_last_counter_is_exhausted() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(u64::MAX, 1));
        p.start(1, Some(Value(1)));
        let refused = promise(b(u64::MAX, 2), None);
        assert_eq!(p.on_prepare_replies(&[refused]), Step::Exhausted);
        assert_eq!(p.stage(), RunStage::Exhausted);
        assert_eq!(p.ballot(), b(u64::MAX, 1));
        assert_eq!(p.chosen(), None);
        // Later replies don't revive it.
        assert_eq!(p.on_accept_replies(&[]), Step::Exhausted);

        // A fresh run may still succeed if the acceptors allow it.
        p.start(1, Some(Value(1)));
        assert!(matches!(
            p.on_prepare_replies(&[PrepareReply::default()]),
            Step::Accept(_)
        ));
    }

    #[test]
    fn stray_replies_are_ignored() {
        let mut p = Proposer::new(InstanceId::new("k", 0), b(0, 1));
        assert_eq!(p.on_accept_replies(&[]), Step::Done(None));
        p.start(1, None);
        assert!(matches!(p.on_accept_replies(&[]), Step::Prepare(_)));
        assert_eq!(p.attempts(), 1);
    }
}
