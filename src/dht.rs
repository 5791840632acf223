use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::core::bucket::Payload;
use crate::core::identifier::{Identifier, NodeAddress, Peer};
use crate::maintenance::Controller;
use crate::node::{Node, NodeSnapshot};
use crate::protocol::lookup::{resolve_successor, resolve_successor_via};
use crate::protocol::server;
use crate::protocol::transport::Transport;
use crate::{Error, Result};

/// A running Chord node: RPC server, maintenance loops, and the routed
/// store/lookup operations the command layer invokes.
pub struct ChordDht {
    node: Arc<Node>,
    transport: Arc<Transport>,
    controller: Controller,
}

impl std::fmt::Debug for ChordDht {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChordDht").finish_non_exhaustive()
    }
}

impl ChordDht {
    /// Bring a node to the Live state: bind the RPC listener, create or join
    /// a ring, then start maintenance. A failed join tears everything down.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let listener = server::bind(&config.bind_address, config.bind_port).await?;
        let port = listener.local_addr().map_err(Error::Io)?.port();
        let addr = NodeAddress::new(&config.bind_address, port);
        let id_override = config
            .identifier_override
            .as_deref()
            .map(Identifier::from_hashed);

        let node = Arc::new(Node::new(addr, id_override, config.successor_list_length));
        let transport = Transport::new(config.rpc_timeout());
        let controller = Controller::new(node.clone(), transport.clone());
        controller.register(server::spawn(
            listener,
            node.clone(),
            transport.clone(),
            controller.subscribe(),
        ));

        match config.bootstrap() {
            Some(bootstrap) => {
                if let Err(e) = join_ring(&node, &transport, bootstrap).await {
                    controller.shutdown().await;
                    return Err(e);
                }
                info!(node = %node.self_peer(), "joined ring");
            }
            None => info!(node = %node.self_peer(), "created ring"),
        }

        controller.start(config.periods());
        Ok(Self {
            node,
            transport,
            controller,
        })
    }

    pub fn self_peer(&self) -> &Peer {
        self.node.self_peer()
    }

    /// Route `filename`'s key to its owner. Exposed for the `LookUp` command.
    pub async fn resolve(&self, filename: &str) -> Result<Peer> {
        let key = Identifier::from_hashed(filename);
        resolve_successor(&self.node, &self.transport, key).await
    }

    /// Store a payload under the hashed filename at the responsible node.
    pub async fn store_file(&self, filename: &str, payload: Payload) -> Result<Peer> {
        let key = Identifier::from_hashed(filename);
        let owner = resolve_successor(&self.node, &self.transport, key).await?;
        if owner.id == self.node.id() {
            self.node.handle_store(key, payload);
        } else {
            self.transport.store(&owner.addr, key, payload).await?;
        }
        debug!(filename, %owner, "stored file");
        Ok(owner)
    }

    /// Retrieve the payload stored under the hashed filename.
    pub async fn fetch_file(&self, filename: &str) -> Result<Payload> {
        let key = Identifier::from_hashed(filename);
        let owner = resolve_successor(&self.node, &self.transport, key).await?;
        if owner.id == self.node.id() {
            return self.node.handle_get_file(filename).ok_or(Error::NotFound {
                filename: filename.to_owned(),
            });
        }
        self.transport.get_file(&owner.addr, filename).await
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.node.snapshot()
    }

    /// Best-effort shutdown: stop the loops and the server, close cached
    /// connections. Stored keys are not handed off.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }
}

/// Resolve our successor through the bootstrap peer and adopt it. Any
/// failure here is fatal to joining; the caller must not continue with a
/// half-initialized ring.
pub async fn join_ring(node: &Node, transport: &Transport, bootstrap: NodeAddress) -> Result<()> {
    let successor = resolve_successor_via(transport, &bootstrap, node.id())
        .await
        .map_err(|source| Error::JoinFailed {
            bootstrap: bootstrap.clone(),
            source: Box::new(source),
        })?;
    debug!(%successor, "bootstrap lookup finished");
    node.adopt_initial_successor(successor);
    Ok(())
}
