use log::{error, info};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cluster::{Cluster, NodeInfo};
use crate::config::{parse_peer, NodeConfig};
use crate::control::Controller;
use crate::crawler::Crawler;
use crate::distributer::Distributer;
use crate::http::Request;
use crate::rpc::{RpcClient, RpcServer};
use crate::spider::{DefaultModuleFactory, ModuleFactory};
use crate::CrawlResult;

/// This node: its identity and the crawler it runs.
pub struct Node {
    info: NodeInfo,
    crawler: Arc<Crawler>,
}

impl Node {
    pub fn new(info: NodeInfo, crawler: Arc<Crawler>) -> Self {
        Self { info, crawler }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_me(&self, name: &str) -> bool {
        self.info.name == name
    }

    pub fn crawler(&self) -> &Arc<Crawler> {
        &self.crawler
    }

    pub fn accept_request(&self, request: Request) -> CrawlResult<bool> {
        self.crawler.accept_request(request)
    }
}

/// A running crawling node: RPC server, heartbeat, distributer and crawler,
/// wired together.
pub struct AntNode {
    config: NodeConfig,
    local_addr: SocketAddr,
    node: Arc<Node>,
    cluster: Arc<Cluster>,
    client: Arc<RpcClient>,
    distributer: Arc<Distributer>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AntNode {
    /// Binds the RPC port and starts the background tasks. Joins the
    /// configured peer, if any.
    pub async fn start(config: NodeConfig) -> CrawlResult<Self> {
        Self::start_with_factory(config, None).await
    }

    pub async fn start_with_factory(
        config: NodeConfig,
        factory: Option<Arc<dyn ModuleFactory>>,
    ) -> CrawlResult<Self> {
        config.check()?;
        let listener = RpcServer::bind(&format!("{}:{}", config.ip, config.port)).await?;
        let local_addr = listener.local_addr()?;
        let info = NodeInfo::new(config.name.as_str(), config.ip.as_str(), local_addr.port());

        let factory = factory.unwrap_or_else(|| {
            Arc::new(
                DefaultModuleFactory::new(Some(local_addr))
                    .with_timeout(config.download_timeout()),
            )
        });
        let crawler = Arc::new(Crawler::with_queue(
            factory,
            config.distribute_buffer_cap,
            config.distribute_max_buffer_number,
        )?);
        let node = Arc::new(Node::new(info.clone(), crawler));
        let cluster = Arc::new(Cluster::new());
        cluster.add_node(info.clone());

        let client = Arc::new(
            RpcClient::new(Arc::clone(&node), Arc::clone(&cluster))
                .with_call_timeout(config.rpc_timeout()),
        );
        let distributer = Arc::new(
            Distributer::new(Arc::clone(&cluster), Arc::clone(&client))
                .with_max_tasks(config.distributer_concurrency),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = RpcServer::new(
            listener,
            Arc::clone(&node),
            Arc::clone(&cluster),
            Arc::clone(&client),
        );
        let tasks = vec![
            tokio::spawn(server.run(shutdown_rx.clone())),
            client.spawn_heartbeat(config.heartbeat_interval(), shutdown_rx),
        ];
        distributer.start();
        info!("Node {} up on {}", info, local_addr);

        let ant = Self {
            config,
            local_addr,
            node,
            cluster,
            client,
            distributer,
            shutdown,
            tasks: Mutex::new(tasks),
        };
        if let Some(peer) = ant.config.join.clone() {
            if let Err(e) = ant.join(&peer).await {
                error!("Joining {} failed: {}", peer, e);
            }
        }
        Ok(ant)
    }

    pub async fn join(&self, peer: &str) -> CrawlResult<()> {
        let (ip, port) = parse_peer(peer)?;
        self.client.let_me_in(&ip, port).await
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn info(&self) -> &NodeInfo {
        self.node.info()
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn crawler(&self) -> &Arc<Crawler> {
        self.node.crawler()
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    pub fn distributer(&self) -> &Arc<Distributer> {
        &self.distributer
    }

    pub fn controller(&self) -> Controller {
        Controller::new(
            Arc::clone(&self.node),
            Arc::clone(&self.cluster),
            Arc::clone(&self.client),
            Arc::clone(&self.distributer),
        )
    }

    /// Stops spiders, the distributer and the network tasks.
    pub async fn shutdown(&self) {
        self.node.crawler().shutdown().await;
        self.distributer.stop().await;
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Node task failed: {}", e);
            }
        }
        info!("Node {} shut down", self.node.info());
    }
}
