// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Acceptors over TCP.
//!
//! Frames are single lines of JSON: a [`Request`] from the proposer, answered
//! by exactly one [`Response`]. A connection may carry any number of
//! request/response pairs; the client below opens one per call. A line
//! longer than [`MAX_FRAME`] ends the connection.

use crate::{
    AcceptReply, AcceptorClient, Config, Error, InstanceRegistry, PrepareReply, ProposerRequest,
    Request, Response, Result,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest accepted frame, newline included.
pub const MAX_FRAME: u64 = 64 * 1024;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running acceptor. Dropping it stops accepting new connections.
#[derive(Debug)]
pub struct AcceptorServer {
    id: u64,
    local_addr: SocketAddr,
    registry: Arc<InstanceRegistry>,
    task: JoinHandle<()>,
}

impl AcceptorServer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }
}

impl Drop for AcceptorServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Binds acceptor `id` on `addr` with an empty registry and serves it on
/// the current runtime.
pub async fn serve_acceptor(id: u64, addr: &str) -> Result<AcceptorServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let registry = Arc::new(InstanceRegistry::new());
    let task = tokio::spawn(accept_loop(id, listener, Arc::clone(&registry)));
    info!("acceptor-{} is serving on {}", id, local_addr);
    Ok(AcceptorServer {
        id,
        local_addr,
        registry,
        task,
    })
}

/// Serves every acceptor named in `cfg` on `host:(base_port + id)`.
pub async fn serve_acceptors(cfg: &Config) -> Result<Vec<AcceptorServer>> {
    cfg.validate()?;
    let mut servers = Vec::with_capacity(cfg.acceptor_ids.len());
    for &id in &cfg.acceptor_ids {
        servers.push(serve_acceptor(id, &cfg.acceptor_addr(id)?).await?);
    }
    Ok(servers)
}

async fn accept_loop(id: u64, listener: TcpListener, registry: Arc<InstanceRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("acceptor-{}: connection from {}", id, peer);
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, registry).await {
                        warn!("acceptor-{}: connection from {} failed: {}", id, peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("acceptor-{}: accept failed: {}", id, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, registry: Arc<InstanceRegistry>) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut line = String::new();
    loop {
        match read_frame(&mut rd, &mut line).await {
            Ok(true) => (),
            Ok(false) => return Ok(()),
            Err(e @ Error::FrameTooLarge { .. }) => {
                write_frame(&mut wr, &Response::Error(e.to_string())).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => registry.handle(&req),
            Err(e) => Response::Error(format!("bad frame: {}", e)),
        };
        write_frame(&mut wr, &resp).await?;
    }
}

// Reads one line into `line`, newline included. Returns false at a clean
// end of stream. A final line without a newline still counts as a frame.
async fn read_frame<R>(rd: &mut R, line: &mut String) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *rd).take(MAX_FRAME).read_line(line).await?;
    if n == 0 {
        return Ok(false);
    }
    if !line.ends_with('\n') && n as u64 == MAX_FRAME {
        return Err(Error::FrameTooLarge { limit: MAX_FRAME });
    }
    Ok(true)
}

async fn write_frame<W, T>(wr: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut buf = serde_json::to_vec(frame)?;
    buf.push(b'\n');
    wr.write_all(&buf).await?;
    Ok(())
}

/// Reaches acceptors over TCP, dialling a fresh connection per call.
#[derive(Clone, Debug)]
pub struct TcpAcceptorClient {
    addrs: BTreeMap<u64, String>,
}

impl TcpAcceptorClient {
    /// Addresses every acceptor in `cfg` at `host:(base_port + id)`.
    pub fn new(cfg: &Config) -> Result<Self> {
        let addrs = cfg
            .acceptor_ids
            .iter()
            .map(|&id| cfg.acceptor_addr(id).map(|addr| (id, addr)))
            .collect::<Result<_>>()?;
        Ok(TcpAcceptorClient { addrs })
    }

    /// Uses an explicit address book instead of the port convention.
    pub fn with_addrs<I: IntoIterator<Item = (u64, SocketAddr)>>(addrs: I) -> Self {
        let addrs = addrs
            .into_iter()
            .map(|(id, addr)| (id, addr.to_string()))
            .collect();
        TcpAcceptorClient { addrs }
    }

    async fn call(&self, acceptor: u64, req: &Request) -> Result<Response> {
        let addr = self
            .addrs
            .get(&acceptor)
            .ok_or(Error::Unreachable { acceptor })?;
        let stream = match TcpStream::connect(addr.as_str()).await {
            Ok(s) => s,
            Err(e) => {
                debug!("dial acceptor-{} at {}: {}", acceptor, addr, e);
                return Err(Error::Unreachable { acceptor });
            }
        };
        let (rd, mut wr) = stream.into_split();
        write_frame(&mut wr, req).await?;
        let mut line = String::new();
        if !read_frame(&mut BufReader::new(rd), &mut line).await? {
            return Err(Error::UnexpectedReply);
        }
        Ok(serde_json::from_str(&line)?)
    }
}

#[async_trait]
impl AcceptorClient for TcpAcceptorClient {
    async fn prepare(&self, acceptor: u64, req: &ProposerRequest) -> Result<PrepareReply> {
        match self.call(acceptor, &Request::Prepare(req.clone())).await? {
            Response::Prepare(reply) => Ok(reply),
            Response::Error(e) => Err(Error::Remote(e)),
            Response::Accept(_) => Err(Error::UnexpectedReply),
        }
    }

    async fn accept(&self, acceptor: u64, req: &ProposerRequest) -> Result<AcceptReply> {
        match self.call(acceptor, &Request::Accept(req.clone())).await? {
            Response::Accept(reply) => Ok(reply),
            Response::Error(e) => Err(Error::Remote(e)),
            Response::Prepare(_) => Err(Error::UnexpectedReply),
        }
    }
}
