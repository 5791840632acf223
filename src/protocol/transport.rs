use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{read_frame, write_frame, Request, Response};
use crate::core::bucket::Payload;
use crate::core::identifier::{Identifier, NodeAddress, Peer};
use crate::core::ring::RoutingStep;
use crate::{Error, Result};

/// The RPC client side: a process-wide cache of one connection per peer.
///
/// Connections are dialed lazily on first use and evicted on any failure,
/// including a timeout, so the next call re-dials. One request/response
/// exchange runs on a connection at a time; concurrent callers to the same
/// peer queue on the per-connection lock.
pub struct Transport {
    connections: Mutex<HashMap<NodeAddress, Arc<AsyncMutex<Connection>>>>,
    rpc_timeout: Duration,
}

#[derive(Default)]
struct Connection {
    stream: Option<TcpStream>,
}

impl Transport {
    pub fn new(rpc_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            rpc_timeout,
        })
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<NodeAddress, Arc<AsyncMutex<Connection>>>> {
        self.connections.lock().expect("connection cache lock poisoned")
    }

    /// One request/response exchange with `addr`, bounded by the RPC timeout.
    pub async fn call(&self, addr: &NodeAddress, request: &Request) -> Result<Response> {
        let slot = {
            let mut map = self.lock_map();
            map.entry(addr.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Connection::default())))
                .clone()
        };
        let mut conn = slot.lock().await;
        match timeout(self.rpc_timeout, Self::exchange(&mut conn, addr, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => {
                self.discard(addr, &mut conn);
                Err(Error::Transport {
                    addr: addr.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                self.discard(addr, &mut conn);
                Err(Error::Transport {
                    addr: addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "rpc timed out"),
                })
            }
        }
    }

    async fn exchange(
        conn: &mut Connection,
        addr: &NodeAddress,
        request: &Request,
    ) -> io::Result<Response> {
        let stream = match conn.stream.take() {
            Some(stream) => conn.stream.insert(stream),
            None => {
                trace!(%addr, "dialing peer");
                let stream = TcpStream::connect(addr.as_str()).await?;
                conn.stream.insert(stream)
            }
        };
        write_frame(stream, request).await?;
        read_frame(stream).await
    }

    fn discard(&self, addr: &NodeAddress, conn: &mut Connection) {
        conn.stream = None;
        self.lock_map().remove(addr);
        debug!(%addr, "evicted cached connection after rpc failure");
    }

    /// Drop every cached connection. A socket closes as its last reference
    /// goes away; an exchange still in flight finishes against its own
    /// handle and surfaces an error or timeout as usual.
    pub fn close_all(&self) {
        let count = {
            let mut map = self.lock_map();
            let count = map.len();
            map.clear();
            count
        };
        debug!(count, "closed cached connections");
    }

    pub fn cached_connections(&self) -> usize {
        self.lock_map().len()
    }

    // --- typed wrappers over the wire surface ---

    pub async fn find_successor(
        &self,
        addr: &NodeAddress,
        target: Identifier,
    ) -> Result<RoutingStep> {
        match self.call(addr, &Request::FindSuccessor { target }).await? {
            Response::FindSuccessor { step } => Ok(step),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn get_predecessor(&self, addr: &NodeAddress) -> Result<Option<Peer>> {
        match self.call(addr, &Request::GetPredecessor).await? {
            Response::Predecessor { predecessor } => Ok(predecessor),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn get_successors(&self, addr: &NodeAddress) -> Result<Vec<Peer>> {
        match self.call(addr, &Request::GetSuccessors).await? {
            Response::Successors { successors } => Ok(successors),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn notify(&self, addr: &NodeAddress, candidate: Peer) -> Result<()> {
        match self.call(addr, &Request::Notify { candidate }).await? {
            Response::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn ping(&self, addr: &NodeAddress) -> Result<()> {
        match self.call(addr, &Request::Ping).await? {
            Response::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn store(&self, addr: &NodeAddress, key: Identifier, payload: Payload) -> Result<()> {
        match self.call(addr, &Request::Store { key, payload }).await? {
            Response::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn get_file(&self, addr: &NodeAddress, filename: &str) -> Result<Payload> {
        let request = Request::GetFile {
            filename: filename.to_owned(),
        };
        match self.call(addr, &request).await? {
            Response::File { payload } => Ok(payload),
            Response::NotFound => Err(Error::NotFound {
                filename: filename.to_owned(),
            }),
            _ => Err(Error::UnexpectedResponse),
        }
    }
}
