// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_PORT: u16 = 3333;
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Where the acceptors live and how long to wait for each of them.
///
/// Acceptor `id` listens on `host:(base_port + id)`. The acceptor set named
/// here is the _whole_ set: quorum is a majority of `acceptor_ids`, whether
/// or not they are all up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub base_port: u16,
    pub acceptor_ids: Vec<u64>,
    #[serde(with = "millis")]
    pub rpc_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".into(),
            base_port: DEFAULT_BASE_PORT,
            acceptor_ids: vec![0, 1, 2],
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

impl Config {
    /// Defaults, overridden by `PAXOS_KV_HOST`, `PAXOS_KV_BASE_PORT`,
    /// `PAXOS_KV_ACCEPTORS` (comma-separated ids) and
    /// `PAXOS_KV_RPC_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(host) = var("PAXOS_KV_HOST") {
            cfg.host = host;
        }
        if let Some(port) = var("PAXOS_KV_BASE_PORT") {
            cfg.base_port = parse("PAXOS_KV_BASE_PORT", &port)?;
        }
        if let Some(ids) = var("PAXOS_KV_ACCEPTORS") {
            cfg.acceptor_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("PAXOS_KV_ACCEPTORS", s))
                .collect::<Result<Vec<u64>>>()?;
        }
        if let Some(ms) = var("PAXOS_KV_RPC_TIMEOUT_MS") {
            cfg.rpc_timeout = Duration::from_millis(parse("PAXOS_KV_RPC_TIMEOUT_MS", &ms)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.acceptor_ids.is_empty() {
            return Err(Error::EmptyAcceptorSet);
        }
        if self.acceptor_ids.iter().unique().count() != self.acceptor_ids.len() {
            return Err(Error::Config(format!(
                "duplicate acceptor ids in [{}]",
                self.acceptor_ids.iter().join(",")
            )));
        }
        for id in &self.acceptor_ids {
            self.acceptor_port(*id)?;
        }
        Ok(())
    }

    pub fn acceptor_port(&self, id: u64) -> Result<u16> {
        let port = u64::from(self.base_port) + id;
        if port > u64::from(u16::MAX) {
            return Err(Error::Config(format!(
                "acceptor {} overflows port range from base {}",
                id, self.base_port
            )));
        }
        Ok(port as u16)
    }

    pub fn acceptor_addr(&self, id: u64) -> Result<String> {
        Ok(format!("{}:{}", self.host, self.acceptor_port(id)?))
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: cannot parse {:?}", name, raw)))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
