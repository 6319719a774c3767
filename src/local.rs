// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    AcceptReply, AcceptorClient, Error, InstanceRegistry, PrepareReply, ProposerRequest, Result,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct LocalAcceptor {
    registry: Arc<InstanceRegistry>,
    up: bool,
    delay: Option<Duration>,
}

/// Acceptors hosted in this process, reached without a network.
///
/// Each acceptor can be taken down (calls fail as unreachable) or slowed
/// down (calls sleep before being served), which is how the cluster tests
/// exercise missing votes and per-call timeouts. Clones share the same
/// acceptors.
#[derive(Clone, Debug, Default)]
pub struct LocalAcceptors {
    acceptors: Arc<Mutex<BTreeMap<u64, LocalAcceptor>>>,
}

impl LocalAcceptors {
    pub fn new<I: IntoIterator<Item = u64>>(ids: I) -> Self {
        let acceptors = ids
            .into_iter()
            .map(|id| {
                let acc = LocalAcceptor {
                    registry: Arc::new(InstanceRegistry::new()),
                    up: true,
                    delay: None,
                };
                (id, acc)
            })
            .collect();
        LocalAcceptors {
            acceptors: Arc::new(Mutex::new(acceptors)),
        }
    }

    pub fn ids(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    pub fn registry(&self, id: u64) -> Option<Arc<InstanceRegistry>> {
        self.lock().get(&id).map(|acc| Arc::clone(&acc.registry))
    }

    pub fn set_up(&self, id: u64, up: bool) {
        if let Some(acc) = self.lock().get_mut(&id) {
            acc.up = up;
        }
    }

    pub fn set_delay(&self, id: u64, delay: Option<Duration>) {
        if let Some(acc) = self.lock().get_mut(&id) {
            acc.delay = delay;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, LocalAcceptor>> {
        self.acceptors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn reach(&self, id: u64) -> Result<Arc<InstanceRegistry>> {
        let (registry, delay) = {
            let acceptors = self.lock();
            match acceptors.get(&id) {
                Some(acc) if acc.up => (Arc::clone(&acc.registry), acc.delay),
                _ => return Err(Error::Unreachable { acceptor: id }),
            }
        };
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            // Give racing proposers a chance to interleave between calls.
            None => tokio::task::yield_now().await,
        }
        Ok(registry)
    }
}

#[async_trait]
impl AcceptorClient for LocalAcceptors {
    async fn prepare(&self, acceptor: u64, req: &ProposerRequest) -> Result<PrepareReply> {
        let registry = self.reach(acceptor).await?;
        Ok(registry.prepare(req))
    }

    async fn accept(&self, acceptor: u64, req: &ProposerRequest) -> Result<AcceptReply> {
        let registry = self.reach(acceptor).await?;
        registry.accept(req)
    }
}
