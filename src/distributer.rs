use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::cluster::Cluster;
use crate::http::Request;
use crate::rpc::RpcClient;
use crate::CrawlResult;

pub const DEFAULT_DISTRIBUTER_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributerState {
    Stopped,
    Running,
    Paused,
}

/// Background loop moving requests from the distribute queue to cluster
/// members, picked round-robin.
pub struct Distributer {
    cluster: Arc<Cluster>,
    client: Arc<RpcClient>,
    last_index: Mutex<usize>,
    state: watch::Sender<DistributerState>,
    max_tasks: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Distributer {
    pub fn new(cluster: Arc<Cluster>, client: Arc<RpcClient>) -> Self {
        let (state, _) = watch::channel(DistributerState::Stopped);
        Self {
            cluster,
            client,
            last_index: Mutex::new(0),
            state,
            max_tasks: DEFAULT_DISTRIBUTER_CONCURRENCY,
            handle: Mutex::new(None),
        }
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks.max(1);
        self
    }

    pub fn state(&self) -> DistributerState {
        *self.state.borrow()
    }

    /// Picks the next member in name order and stamps its name on the request.
    /// The cursor is clamped when membership shrank since the last pick.
    pub fn assign(&self, request: &mut Request) -> Option<String> {
        let nodes = self.cluster.get_all_node();
        if nodes.is_empty() {
            return None;
        }
        let mut index = self.last_index.lock();
        if *index >= nodes.len() {
            *index = 0;
        }
        let name = nodes[*index].name.clone();
        *index += 1;
        request.set_node_name(name.as_str());
        Some(name)
    }

    /// Assigns and forwards one request. Requests whose target cannot be
    /// reached are handled by this node.
    pub async fn distribute(&self, mut request: Request) -> CrawlResult<()> {
        let me = self.client.node().name().to_string();
        let target = self.assign(&mut request).unwrap_or_else(|| me.clone());
        trace!("Distributing {} to {}", request.url, target);
        match self.client.distribute(&target, request.clone()).await {
            Err(e) if target != me && !self.client.is_connected(&target) => {
                warn!("Forwarding {} to {} failed, keeping it: {}", request.url, target, e);
                request.set_node_name(me.as_str());
                self.client.distribute(&me, request).await
            }
            other => other,
        }
    }

    /// Starts the loop, or resumes it when paused.
    pub fn start(self: &Arc<Self>) {
        match self.state() {
            DistributerState::Running => return,
            DistributerState::Paused => {
                self.resume();
                return;
            }
            DistributerState::Stopped => {}
        }
        self.state.send_replace(DistributerState::Running);
        let distributer = Arc::clone(self);
        *self.handle.lock() = Some(tokio::spawn(distributer.run()));
        info!("Distributer started");
    }

    pub fn pause(&self) {
        if self.state() == DistributerState::Running {
            self.state.send_replace(DistributerState::Paused);
            info!("Distributer paused");
        }
    }

    pub fn resume(&self) {
        if self.state() == DistributerState::Paused {
            self.state.send_replace(DistributerState::Running);
            info!("Distributer resumed");
        }
    }

    /// Stops the loop and waits for the forwards in flight.
    pub async fn stop(&self) {
        self.state.send_replace(DistributerState::Stopped);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Distributer task failed: {}", e);
            }
        }
    }

    async fn run(self: Arc<Self>) {
        let mut state = self.state.subscribe();
        let queue = self.client.node().crawler().distribute_queue();
        let mut tasks = JoinSet::new();
        loop {
            let current = *state.borrow_and_update();
            match current {
                DistributerState::Stopped => break,
                DistributerState::Paused => {
                    tokio::select! {
                        Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                        changed = state.changed() => if changed.is_err() { break },
                    }
                    continue;
                }
                DistributerState::Running => {}
            }
            if tasks.len() >= self.max_tasks {
                tasks.join_next().await;
                continue;
            }
            tokio::select! {
                biased;
                changed = state.changed() => if changed.is_err() { break },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                request = queue.get() => match request {
                    Ok(request) => {
                        let distributer = Arc::clone(&self);
                        tasks.spawn(async move {
                            let url = request.url.clone();
                            if let Err(e) = distributer.distribute(request).await {
                                warn!("Distributing {} failed: {}", url, e);
                            }
                        });
                    }
                    Err(_) => {
                        debug!("Distribute queue closed");
                        self.state.send_replace(DistributerState::Stopped);
                        break;
                    }
                },
            }
        }
        while tasks.join_next().await.is_some() {}
        info!("Distributer stopped");
    }
}
