use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::core::identifier::{finger_target, M};
use crate::node::Node;
use crate::protocol::lookup::resolve_successor;
use crate::protocol::transport::Transport;
use crate::Result;

/// Periods for the three maintenance loops, already validated into
/// 1..=60000 ms by the configuration layer.
#[derive(Debug, Clone, Copy)]
pub struct MaintenancePeriods {
    pub stabilize: Duration,
    pub fix_fingers: Duration,
    pub check_predecessor: Duration,
}

/// One round of `stabilize`: reconcile the immediate successor with its
/// predecessor pointer, refresh the successor list, and notify.
///
/// Ring state is snapshotted before each RPC and reapplied afterwards; the
/// appliers on `Node` re-check that the snapshot still matches.
pub async fn stabilize_once(node: &Node, transport: &Transport) -> Result<()> {
    let succ = node.successor();
    let pred_of_succ = if succ.addr == *node.addr() {
        // we are our own successor; nothing to ask over the network
        node.predecessor()
    } else {
        match transport.get_predecessor(&succ.addr).await {
            Ok(p) => p,
            Err(e) => {
                // the immediate successor is gone; promote the next one
                node.drop_failed_successor(&succ);
                return Err(e);
            }
        }
    };

    if let Some(p) = pred_of_succ {
        if node.consider_new_successor(p.clone()) {
            debug!(successor = %p, "stabilize adopted a closer successor");
        }
    }

    let succ = node.successor();
    if succ.addr == *node.addr() {
        // singleton ring: no list to splice, nobody to notify
        return Ok(());
    }

    match transport.get_successors(&succ.addr).await {
        Ok(list) => node.splice_successors(succ.clone(), list),
        // per the failure model, a failed list fetch leaves the list as-is
        Err(e) => trace!(error = %e, "successor list fetch failed"),
    }

    if let Err(e) = transport.notify(&succ.addr, node.self_peer().clone()).await {
        trace!(error = %e, "notify failed");
    }
    Ok(())
}

/// One round of `check_predecessor`: ping it, and clear the pointer if the
/// ping fails. The next notify will repopulate it.
pub async fn check_predecessor_once(node: &Node, transport: &Transport) -> Result<()> {
    let Some(pred) = node.predecessor() else {
        return Ok(());
    };
    if let Err(e) = transport.ping(&pred.addr).await {
        debug!(predecessor = %pred, error = %e, "predecessor unreachable, clearing");
        node.clear_predecessor_if(&pred);
    }
    Ok(())
}

/// One round of `fix_fingers`: rebuild the whole table, resolving each row's
/// target through the normal iterative lookup. The previous table stays in
/// place until the rebuild finishes, and survives if any row fails.
pub async fn fix_fingers_once(node: &Node, transport: &Transport) -> Result<()> {
    let mut table = Vec::with_capacity(M);
    for row in 1..=M {
        let target = finger_target(node.id(), row);
        let peer = resolve_successor(node, transport, target).await?;
        table.push(peer);
    }
    node.install_finger_table(table);
    Ok(())
}

/// Owns the three periodic loops and the shutdown flag shared with the RPC
/// server. Loops observe the flag between steps; in-flight RPCs are bounded
/// by the transport timeout.
pub struct Controller {
    node: Arc<Node>,
    transport: Arc<Transport>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(node: Arc<Node>, transport: Arc<Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            node,
            transport,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A receiver for other tasks (the RPC server) that stop with us.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Track an externally spawned task so `shutdown` awaits it too.
    pub fn register(&self, handle: JoinHandle<()>) {
        self.tasks().push(handle);
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().expect("controller task list lock poisoned")
    }

    /// Spawn the three maintenance loops.
    pub fn start(&self, periods: MaintenancePeriods) {
        let node = self.node.clone();
        let transport = self.transport.clone();
        let stabilize = spawn_loop("stabilize", periods.stabilize, self.subscribe(), move || {
            let node = node.clone();
            let transport = transport.clone();
            async move {
                if let Err(e) = stabilize_once(&node, &transport).await {
                    trace!(error = %e, "stabilize round failed");
                }
            }
        });

        let node = self.node.clone();
        let transport = self.transport.clone();
        let fix_fingers = spawn_loop(
            "fix_fingers",
            periods.fix_fingers,
            self.subscribe(),
            move || {
                let node = node.clone();
                let transport = transport.clone();
                async move {
                    if let Err(e) = fix_fingers_once(&node, &transport).await {
                        trace!(error = %e, "fix_fingers round failed");
                    }
                }
            },
        );

        let node = self.node.clone();
        let transport = self.transport.clone();
        let check_predecessor = spawn_loop(
            "check_predecessor",
            periods.check_predecessor,
            self.subscribe(),
            move || {
                let node = node.clone();
                let transport = transport.clone();
                async move {
                    if let Err(e) = check_predecessor_once(&node, &transport).await {
                        trace!(error = %e, "check_predecessor round failed");
                    }
                }
            },
        );

        let mut tasks = self.tasks();
        tasks.push(stabilize);
        tasks.push(fix_fingers);
        tasks.push(check_predecessor);
    }

    /// Flip the shutdown flag, wait for the loops (and any registered task)
    /// to finish their current step, and close every cached connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.transport.close_all();
        debug!(node = %self.node.self_peer(), "node shut down");
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    step: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        // a slow step must not cause a burst of catch-up rounds
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => step().await,
                changed = shutdown.changed() => {
                    // a dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        trace!(name, "maintenance loop stopping");
                        break;
                    }
                }
            }
        }
    })
}
