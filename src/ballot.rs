// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `BallotNum` names one attempt by one proposer to establish a value.
///
/// Ballots are totally ordered: first by the counter `n`, then by
/// `proposer_id`. Two distinct proposers therefore never hold equal ballots
/// even when their counters collide, which is what stops both of them from
/// believing they hold the highest ballot at once.
///
/// The derived `Ord` relies on the field order below; `a >= b` is exactly
/// "`a.n > b.n`, or `a.n == b.n` and `a.proposer_id >= b.proposer_id`".
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BallotNum {
    pub n: u64,
    pub proposer_id: u64,
}

impl BallotNum {
    /// The ballot every acceptor starts from; lower than any real ballot
    /// except another `{0, 0}`.
    pub const ZERO: BallotNum = BallotNum {
        n: 0,
        proposer_id: 0,
    };

    pub const fn new(n: u64, proposer_id: u64) -> Self {
        BallotNum { n, proposer_id }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The ballot a proposer retries with after being outraced by
    /// `highest`: one counter step past it, keeping our own identity.
    /// `None` once `highest` holds the last counter value, since nothing
    /// of ours can then outrank it.
    pub fn bumped_past(&self, highest: &BallotNum) -> Option<BallotNum> {
        let n = highest.n.checked_add(1)?;
        Some(BallotNum {
            n,
            proposer_id: self.proposer_id,
        })
    }
}

impl fmt::Display for BallotNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bal({}.{})", self.n, self.proposer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<BallotNum> {
        let mut v = vec![];
        for n in 0..4 {
            for p in 0..4 {
                v.push(BallotNum::new(n, p));
            }
        }
        v
    }

    #[test]
    fn counter_dominates_proposer_id() {
        assert!(BallotNum::new(2, 0) > BallotNum::new(1, 9));
        assert!(BallotNum::new(1, 2) > BallotNum::new(1, 1));
        assert!(BallotNum::new(1, 1) >= BallotNum::new(1, 1));
        assert!(!(BallotNum::new(0, 1) >= BallotNum::new(0, 2)));
    }

    #[test]
    fn order_is_total_and_transitive() {
        let all = sample();
        for a in &all {
            assert!(a >= a);
            for b in &all {
                if a != b {
                    assert!((a >= b) != (b >= a), "{} vs {}", a, b);
                }
                for c in &all {
                    if a >= b && b >= c {
                        assert!(a >= c);
                    }
                }
            }
        }
    }

    #[test]
    fn bump_keeps_identity() {
        let mine = BallotNum::new(0, 1);
        let bumped = mine.bumped_past(&BallotNum::new(4, 2)).unwrap();
        assert_eq!(bumped, BallotNum::new(5, 1));
        assert!(bumped > BallotNum::new(4, 2));
    }

    #[test]
    fn bump_past_last_counter_is_exhausted() {
        let mine = BallotNum::new(u64::MAX, 1);
        assert_eq!(mine.bumped_past(&BallotNum::new(u64::MAX, 2)), None);
        assert_eq!(
            mine.bumped_past(&BallotNum::new(u64::MAX - 1, 2)),
            Some(BallotNum::new(u64::MAX, 1))
        );
    }

    #[test]
    fn zero_is_the_floor() {
        assert!(BallotNum::ZERO.is_zero());
        assert_eq!(BallotNum::default(), BallotNum::ZERO);
        assert!(sample().iter().all(|b| *b >= BallotNum::ZERO));
    }
}
