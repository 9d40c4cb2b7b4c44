use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::codec::{read_frame, write_frame};
use super::message::{RpcCall, RpcEnvelope, RpcReply};
use crate::cluster::{Cluster, NodeInfo};
use crate::http::Request;
use crate::node::Node;
use crate::spider::SpiderDefinition;
use crate::{CrawlError, CrawlResult};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// One open stream to a peer. Calls on it are serialized.
pub struct RpcConnection {
    peer: NodeInfo,
    stream: Mutex<TcpStream>,
    broken: AtomicBool,
}

impl RpcConnection {
    fn new(peer: NodeInfo, stream: TcpStream) -> Self {
        Self {
            peer,
            stream: Mutex::new(stream),
            broken: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> &NodeInfo {
        &self.peer
    }

    /// A failed call leaves the stream in an unknown state, so the connection
    /// refuses further calls until it is evicted.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub async fn call(&self, envelope: &RpcEnvelope, timeout: Duration) -> CrawlResult<RpcReply> {
        if self.is_broken() {
            return Err(CrawlError::Transport(format!(
                "connection to {} is broken",
                self.peer
            )));
        }
        let mut stream = self.stream.lock().await;
        let result = call_stream(&mut stream, envelope, timeout).await;
        if result.is_err() {
            self.broken.store(true, Ordering::SeqCst);
        }
        result
    }
}

async fn call_stream(
    stream: &mut TcpStream,
    envelope: &RpcEnvelope,
    timeout: Duration,
) -> CrawlResult<RpcReply> {
    let exchange = async {
        write_frame(stream, envelope).await?;
        read_frame::<_, RpcReply>(stream).await?.ok_or_else(|| {
            CrawlError::Transport("connection closed before the reply".to_string())
        })
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(reply) => reply,
        Err(_) => Err(CrawlError::Transport(format!(
            "{} call timed out after {:?}",
            envelope.call.name(),
            timeout
        ))),
    }
}

/// Outbound side of the peer protocol: membership, heartbeat, request
/// forwarding and spider control fan-out.
pub struct RpcClient {
    node: Arc<Node>,
    cluster: Arc<Cluster>,
    conns: RwLock<HashMap<String, Arc<RpcConnection>>>,
    call_timeout: Duration,
}

impl RpcClient {
    pub fn new(node: Arc<Node>, cluster: Arc<Cluster>) -> Self {
        Self {
            node,
            cluster,
            conns: RwLock::new(HashMap::new()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    fn envelope(&self, call: RpcCall) -> RpcEnvelope {
        RpcEnvelope {
            from: self.node.info().clone(),
            call,
        }
    }

    pub async fn dial(&self, ip: &str, port: u16) -> CrawlResult<TcpStream> {
        let addr = format!("{}:{}", ip, port);
        debug!("{} dialing {}", self.node.name(), addr);
        match tokio::time::timeout(self.call_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(CrawlError::Transport(format!("dial {} failed: {}", addr, e))),
            Err(_) => Err(CrawlError::Transport(format!("dial {} timed out", addr))),
        }
    }

    /// Dials a peer, learns its identity and records it as a cluster member.
    pub async fn connect(&self, ip: &str, port: u16) -> CrawlResult<NodeInfo> {
        let mut stream = self.dial(ip, port).await?;
        let reply = call_stream(&mut stream, &self.envelope(RpcCall::IsAlive), self.call_timeout)
            .await?
            .into_result()?;
        let peer = reply.node;
        if self.node.is_me(&peer.name) {
            return Err(CrawlError::Argument(format!(
                "{}:{} is this node",
                ip, port
            )));
        }
        info!("{} connected to {}", self.node.name(), peer);
        self.conns.write().insert(
            peer.name.clone(),
            Arc::new(RpcConnection::new(peer.clone(), stream)),
        );
        self.cluster.add_node(peer.clone());
        Ok(peer)
    }

    /// Joins the cluster that the node at `ip:port` belongs to.
    ///
    /// Every member the bootstrap node knows is connected and asked to let
    /// this node in. Members that cannot be reached are skipped.
    pub async fn let_me_in(&self, ip: &str, port: u16) -> CrawlResult<()> {
        let mut stream = self.dial(ip, port).await?;
        call_stream(&mut stream, &self.envelope(RpcCall::IsAlive), self.call_timeout)
            .await?
            .into_result()?;
        let members = call_stream(
            &mut stream,
            &self.envelope(RpcCall::GetAllNode),
            self.call_timeout,
        )
        .await?
        .into_result()?
        .nodes;
        drop(stream);

        for member in members {
            if self.node.is_me(&member.name) {
                continue;
            }
            if !self.is_connected(&member.name) {
                if let Err(e) = self.connect(&member.ip, member.port).await {
                    error!("Joining via {} failed: {}", member, e);
                    continue;
                }
            }
            let call = RpcCall::LetMeIn(self.node.info().clone());
            if let Err(e) = self.call_node(&member.name, call).await {
                error!("{} refused to let us in: {}", member, e);
            }
        }
        info!(
            "{} joined the cluster, {} members known",
            self.node.name(),
            self.cluster.len()
        );
        Ok(())
    }

    /// Whether a usable connection to the named peer is open.
    pub fn is_connected(&self, name: &str) -> bool {
        self.conns
            .read()
            .get(name)
            .is_some_and(|conn| !conn.is_broken())
    }

    pub fn connected_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.conns.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn connection(&self, name: &str) -> CrawlResult<Arc<RpcConnection>> {
        self.conns
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(format!("no connection to node {}", name)))
    }

    /// Drops the connection and the membership entry of a peer, unless the
    /// peer reconnected since `conn` was taken. Returns whether it was evicted.
    pub fn evict(&self, conn: &Arc<RpcConnection>) -> bool {
        let name = &conn.peer().name;
        let mut conns = self.conns.write();
        if !conns.get(name).is_some_and(|current| Arc::ptr_eq(current, conn)) {
            debug!("Node {} reconnected, keeping it", name);
            return false;
        }
        conns.remove(name);
        if self.cluster.delete_node(name).is_some() {
            warn!("Node {} evicted from the cluster", name);
        }
        true
    }

    pub async fn call_node(&self, name: &str, call: RpcCall) -> CrawlResult<RpcReply> {
        let conn = self.connection(name)?;
        conn.call(&self.envelope(call), self.call_timeout)
            .await?
            .into_result()
    }

    /// Checks every peer once and evicts those that do not answer.
    pub async fn detect(&self) {
        let conns: Vec<Arc<RpcConnection>> = self.conns.read().values().cloned().collect();
        let envelope = self.envelope(RpcCall::IsAlive);
        let checks = conns.iter().map(|conn| {
            let envelope = &envelope;
            async move { (conn, conn.call(envelope, self.call_timeout).await) }
        });
        for (conn, alive) in join_all(checks).await {
            if let Err(e) = alive {
                warn!("Node {} is dead: {}", conn.peer(), e);
                self.evict(conn);
            }
        }
    }

    /// Runs [`detect`](Self::detect) every `interval` until `shutdown` turns true.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => client.detect().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Heartbeat of {} stopped", client.node.name());
        })
    }

    /// Sends a request to the node it was assigned to. Requests for this node
    /// skip the network.
    pub async fn distribute(&self, node_name: &str, request: Request) -> CrawlResult<()> {
        if self.node.is_me(node_name) {
            return self.node.accept_request(request).map(|_| ());
        }
        self.call_node(node_name, RpcCall::AcceptRequest(request))
            .await
            .map(|_| ())
    }

    /// Calls every peer concurrently and logs the failures.
    async fn fan_out(&self, call: RpcCall) {
        let peers: Vec<NodeInfo> = self
            .cluster
            .get_all_node()
            .into_iter()
            .filter(|n| !self.node.is_me(&n.name))
            .collect();
        let name = call.name();
        let calls = peers.iter().map(|peer| {
            let call = call.clone();
            async move { (peer, self.call_node(&peer.name, call).await) }
        });
        for (peer, result) in join_all(calls).await {
            if let Err(e) = result {
                error!("{} on node {} failed: {}", name, peer, e);
            }
        }
    }

    /// First-starts the spider here (seeding it) and resumes it on every peer.
    pub async fn start_spider(&self, spider_name: &str) -> CrawlResult<()> {
        self.node.crawler().first_start_spider(spider_name)?;
        self.fan_out(RpcCall::StartSpider(spider_name.to_string()))
            .await;
        Ok(())
    }

    pub async fn stop_spider(&self, spider_name: &str) -> CrawlResult<()> {
        let (local, _) = tokio::join!(
            self.node.crawler().stop_spider(spider_name),
            self.fan_out(RpcCall::StopSpider(spider_name.to_string()))
        );
        local
    }

    pub async fn pause_spider(&self, spider_name: &str) -> CrawlResult<()> {
        let local = self.node.crawler().pause_spider(spider_name);
        self.fan_out(RpcCall::PauseSpider(spider_name.to_string()))
            .await;
        local
    }

    pub async fn recover_spider(&self, spider_name: &str) -> CrawlResult<()> {
        let local = self.node.crawler().recover_spider(spider_name);
        self.fan_out(RpcCall::RecoverSpider(spider_name.to_string()))
            .await;
        local
    }

    /// Registers the spider here, then ships a copy to every peer in the
    /// background. A peer failing does not undo the local registration.
    pub async fn add_spider(&self, definition: SpiderDefinition) -> CrawlResult<()> {
        let copy = definition.clone();
        self.node.crawler().add_spider(definition).await?;

        let conns: Vec<Arc<RpcConnection>> = self
            .cluster
            .get_all_node()
            .iter()
            .filter(|n| !self.node.is_me(&n.name))
            .filter_map(|n| match self.connection(&n.name) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    error!("AddSpider to {} skipped: {}", n, e);
                    None
                }
            })
            .collect();
        for conn in conns {
            let envelope = self.envelope(RpcCall::AddSpider(copy.clone()));
            let timeout = self.call_timeout;
            tokio::spawn(async move {
                let result = conn
                    .call(&envelope, timeout)
                    .await
                    .and_then(RpcReply::into_result);
                if let Err(e) = result {
                    error!("AddSpider on node {} failed: {}", conn.peer(), e);
                }
            });
        }
        Ok(())
    }
}
