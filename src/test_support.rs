#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    use crate::core::identifier::{Identifier, NodeAddress, Peer};
    use crate::node::Node;
    use crate::protocol::server;
    use crate::protocol::transport::Transport;

    pub fn id(value: u64) -> Identifier {
        Identifier::from_low_u64(value)
    }

    pub fn peer(port: u16, id_value: u64) -> Peer {
        Peer::with_id(NodeAddress::new("127.0.0.1", port), id(id_value))
    }

    /// A node serving RPCs on an ephemeral local port, with its identifier
    /// pinned so tests can reason about ring positions exactly. Maintenance
    /// is driven manually by calling the step functions.
    pub struct RingHandle {
        pub node: Arc<Node>,
        pub transport: Arc<Transport>,
        shutdown: watch::Sender<bool>,
        server: JoinHandle<()>,
    }

    impl RingHandle {
        /// Stop serving RPCs, simulating a node failure. Peers observe
        /// closed connections and refused dials.
        pub async fn kill(&self) {
            let _ = self.shutdown.send(true);
            // the accept loop exits on the flag; give the per-connection
            // tasks a moment to drop their streams
            while !self.server.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn spawn_ring_node(id_value: u64, r: usize) -> RingHandle {
        let listener = server::bind("127.0.0.1", 0)
            .await
            .expect("bind test listener");
        let port = listener
            .local_addr()
            .expect("listener has a local addr")
            .port();
        let node = Arc::new(Node::new(
            NodeAddress::new("127.0.0.1", port),
            Some(id(id_value)),
            r,
        ));
        let transport = Transport::new(Duration::from_millis(500));
        let (shutdown, rx) = watch::channel(false);
        let server = server::spawn(listener, node.clone(), transport.clone(), rx);
        RingHandle {
            node,
            transport,
            shutdown,
            server,
        }
    }
}
