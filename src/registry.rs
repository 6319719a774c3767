// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    AcceptReply, AcceptorState, Error, InstanceId, PrepareReply, ProposerRequest, Request, Response,
    Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

type Versions = HashMap<u64, InstanceHandle>;

/// One acceptor's view of every instance it has been asked about.
///
/// Locking is two-tier. The `storage` lock covers only the lookup (and lazy
/// creation) of an instance's entry and is dropped before any protocol
/// logic runs. Each entry carries its own lock, held for the whole
/// read-modify-write of a Prepare or Accept. Unrelated instances never wait
/// on each other, and no lock is ever held across a network call.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    storage: Mutex<HashMap<String, Versions>>,
}

/// Shared reference to one instance's acceptor state.
#[derive(Clone, Debug, Default)]
pub struct InstanceHandle(Arc<Mutex<AcceptorState>>);

impl InstanceHandle {
    /// Locks the instance. The returned guard is the exclusive handle;
    /// dropping it releases the instance.
    // Every mutation is a handful of plain assignments after the reply has
    // been captured, so a poisoned lock still guards a consistent state.
    pub fn lock(&self) -> MutexGuard<'_, AcceptorState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        InstanceRegistry::default()
    }

    /// Returns the entry for `id`, creating an empty one (`last_bal` and
    /// `v_bal` zero, no value) on first touch.
    pub fn get_or_create(&self, id: &InstanceId) -> InstanceHandle {
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        storage
            .entry(id.key.clone())
            .or_default()
            .entry(id.version)
            .or_insert_with(|| {
                debug!("creating instance {}", id);
                InstanceHandle::default()
            })
            .clone()
    }

    /// A copy of the state of `id`, without creating it.
    pub fn snapshot(&self, id: &InstanceId) -> Option<AcceptorState> {
        let handle = {
            let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
            storage.get(&id.key)?.get(&id.version)?.clone()
        };
        let state = handle.lock().clone();
        Some(state)
    }

    pub fn instance_count(&self) -> usize {
        let storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);
        storage.values().map(|versions| versions.len()).sum()
    }

    pub fn prepare(&self, req: &ProposerRequest) -> PrepareReply {
        info!("acceptor: prepare {} {}", req.id, req.bal);
        let handle = self.get_or_create(&req.id);
        let mut state = handle.lock();
        state.prepare(req.bal)
    }

    /// Fails only for an Accept that carries no value; the instance is not
    /// touched in that case.
    pub fn accept(&self, req: &ProposerRequest) -> Result<AcceptReply> {
        info!("acceptor: accept {} {} {:?}", req.id, req.bal, req.val);
        let val = req.val.ok_or(Error::MissingValue)?;
        let handle = self.get_or_create(&req.id);
        let mut state = handle.lock();
        Ok(state.accept(req.bal, val))
    }

    /// Answers one wire frame.
    pub fn handle(&self, req: &Request) -> Response {
        match req {
            Request::Prepare(r) => Response::Prepare(self.prepare(r)),
            Request::Accept(r) => match self.accept(r) {
                Ok(reply) => Response::Accept(reply),
                Err(e) => Response::Error(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BallotNum, Value};
    use std::thread;

    fn req(key: &str, version: u64, n: u64, val: Option<i64>) -> ProposerRequest {
        ProposerRequest {
            id: InstanceId::new(key, version),
            bal: BallotNum::new(n, 1),
            val: val.map(Value),
        }
    }

    #[test]
    fn first_touch_creates_empty_instance() {
        let reg = InstanceRegistry::new();
        assert_eq!(reg.snapshot(&InstanceId::new("k", 0)), None);
        let reply = reg.prepare(&req("k", 0, 1, None));
        assert_eq!(reply, PrepareReply::default());
        assert_eq!(reg.instance_count(), 1);
        let state = reg.snapshot(&InstanceId::new("k", 0)).unwrap();
        assert_eq!(state.last_bal, BallotNum::new(1, 1));
    }

    #[test]
    fn versions_are_independent() {
        let reg = InstanceRegistry::new();
        reg.accept(&req("k", 0, 5, Some(50))).unwrap();
        let reply = reg.prepare(&req("k", 1, 1, None));
        assert_eq!(reply.val, None);
        assert_eq!(reply.last_bal, BallotNum::ZERO);
        assert_eq!(reg.instance_count(), 2);
    }

    #[test]
    fn accept_reply_is_a_copy() {
        let reg = InstanceRegistry::new();
        let reply = reg.accept(&req("k", 0, 1, Some(1))).unwrap();
        reg.get_or_create(&InstanceId::new("k", 0)).lock().last_bal = BallotNum::new(100, 0);
        assert_eq!(reply.last_bal, BallotNum::ZERO);
    }

    #[test]
    fn accept_without_value_is_rejected() {
        let reg = InstanceRegistry::new();
        reg.prepare(&req("k", 0, 1, None));
        let resp = reg.handle(&Request::Accept(req("k", 0, 1, None)));
        assert!(matches!(resp, Response::Error(_)));
        let state = reg.snapshot(&InstanceId::new("k", 0)).unwrap();
        assert!(!state.has_voted());
    }

    #[test]
    fn held_instance_does_not_block_others() {
        let reg = Arc::new(InstanceRegistry::new());
        let held = reg.get_or_create(&InstanceId::new("a", 0));
        let _guard = held.lock();
        let other = Arc::clone(&reg);
        let reply = thread::spawn(move || other.prepare(&req("b", 0, 1, None)))
            .join()
            .unwrap();
        assert_eq!(reply.last_bal, BallotNum::ZERO);
    }

    #[test]
    fn concurrent_accepts_leave_consistent_state() {
        let reg = Arc::new(InstanceRegistry::new());
        let threads: Vec<_> = (1..=8u64)
            .map(|p| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for n in 0..50 {
                        let r = ProposerRequest {
                            id: InstanceId::new("k", 0),
                            bal: BallotNum::new(n, p),
                            val: Some(Value((n * 10 + p) as i64)),
                        };
                        reg.prepare(&r);
                        reg.accept(&r).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let state = reg.snapshot(&InstanceId::new("k", 0)).unwrap();
        assert!(state.v_bal <= state.last_bal);
        assert_eq!(state.last_bal, BallotNum::new(49, 8));
        assert_eq!(state.val, Some(Value(498)));
    }
}
