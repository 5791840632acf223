use std::io;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::transport::Transport;
use super::{read_frame, write_frame, Request, Response};
use crate::core::bucket::Payload;
use crate::core::identifier::{Identifier, Peer};
use crate::node::Node;
use crate::{Error, Result};

/// Bind the RPC listener. Separate from `spawn` so the caller can learn the
/// actual port before the node's address is fixed (ephemeral binds).
pub async fn bind(bind_address: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((bind_address, port))
        .await
        .map_err(Error::Io)
}

/// Run the accept loop until the shutdown flag flips. Each connection gets
/// its own task reading request frames and writing one reply per request.
pub fn spawn(
    listener: TcpListener,
    node: Arc<Node>,
    transport: Arc<Transport>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(serve(listener, node, transport, shutdown))
}

async fn serve(
    listener: TcpListener,
    node: Arc<Node>,
    transport: Arc<Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(addr = %node.addr(), "rpc server listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    trace!(%remote, "accepted connection");
                    tokio::spawn(handle_connection(
                        stream,
                        node.clone(),
                        transport.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(addr = %node.addr(), "rpc server stopping");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    node: Arc<Node>,
    transport: Arc<Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            read = read_frame::<_, Request>(&mut stream) => {
                let request = match read {
                    Ok(request) => request,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        trace!(error = %e, "dropping connection on bad frame");
                        break;
                    }
                };
                let response = dispatch(&node, &transport, request);
                if let Err(e) = write_frame(&mut stream, &response).await {
                    trace!(error = %e, "dropping connection on failed write");
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn dispatch(node: &Arc<Node>, transport: &Arc<Transport>, request: Request) -> Response {
    match request {
        Request::FindSuccessor { target } => Response::FindSuccessor {
            step: node.handle_find_successor(target),
        },
        Request::GetPredecessor => Response::Predecessor {
            predecessor: node.predecessor(),
        },
        Request::GetSuccessors => Response::Successors {
            successors: node.successor_list(),
        },
        Request::Notify { candidate } => {
            let handoff = node.handle_notify(candidate.clone());
            if !handoff.is_empty() {
                // ship the keys outside the handler; the ack must not wait
                // on another node
                tokio::spawn(transfer_keys(
                    node.clone(),
                    transport.clone(),
                    candidate,
                    handoff,
                ));
            }
            Response::Ack
        }
        Request::Ping => Response::Ack,
        Request::Store { key, payload } => {
            node.handle_store(key, payload);
            Response::Ack
        }
        Request::GetFile { filename } => match node.handle_get_file(&filename) {
            Some(payload) => Response::File { payload },
            None => Response::NotFound,
        },
    }
}

/// Move drained keys to the predecessor that now owns them. A key whose
/// transfer fails goes back into the local bucket; the next accepted notify
/// retries it.
async fn transfer_keys(
    node: Arc<Node>,
    transport: Arc<Transport>,
    new_owner: Peer,
    entries: Vec<(Identifier, Payload)>,
) {
    for (key, payload) in entries {
        if let Err(e) = transport.store(&new_owner.addr, key, payload.clone()).await {
            debug!(error = %e, %key, owner = %new_owner, "key handoff failed, keeping locally");
            node.restore_key(key, payload);
        }
    }
}
