use tracing::trace;

use super::transport::Transport;
use crate::core::identifier::{Identifier, NodeAddress, Peer, M};
use crate::core::ring::RoutingStep;
use crate::node::Node;
use crate::{Error, Result};

/// Upper bound on Forward hops per lookup. Under quiescence a lookup needs
/// O(log N) hops; anything past 2·M means the routing tables are cyclic.
pub const MAX_HOPS: usize = 2 * M;

/// Resolve the successor of `target`, starting from this node's own routing
/// state and following Forward referrals across the network.
pub async fn resolve_successor(
    node: &Node,
    transport: &Transport,
    target: Identifier,
) -> Result<Peer> {
    match node.handle_find_successor(target) {
        RoutingStep::Found(peer) => Ok(peer),
        RoutingStep::Forward(next) => {
            if next.id == node.id() {
                // our own table has nobody closer; we are the terminal answer
                return Ok(node.self_peer().clone());
            }
            follow(transport, next.addr, target, Some(node.self_peer())).await
        }
    }
}

/// Resolve the successor of `target` by asking `bootstrap` first. Used by
/// `join`, where the only thing known about the ring is one address.
pub async fn resolve_successor_via(
    transport: &Transport,
    bootstrap: &NodeAddress,
    target: Identifier,
) -> Result<Peer> {
    follow(transport, bootstrap.clone(), target, None).await
}

async fn follow(
    transport: &Transport,
    mut current: NodeAddress,
    target: Identifier,
    stop_self: Option<&Peer>,
) -> Result<Peer> {
    for hop in 0..MAX_HOPS {
        match transport.find_successor(&current, target).await? {
            RoutingStep::Found(peer) => {
                trace!(%target, hops = hop + 1, "lookup resolved");
                return Ok(peer);
            }
            RoutingStep::Forward(next) => {
                // A node forwarding to itself is the terminal answer, and a
                // referral back to the initiator means the interval wrapped
                // around to us.
                if next.addr == current {
                    return Ok(next);
                }
                if let Some(me) = stop_self {
                    if me.id == next.id {
                        return Ok(me.clone());
                    }
                }
                current = next.addr;
            }
        }
    }
    Err(Error::RoutingExhausted {
        target,
        hops: MAX_HOPS,
    })
}
