use log::info;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use crate::{CrawlError, CrawlResult};

/// Identity and address of a cluster member. The name is what requests are routed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn socket_addr(&self) -> CrawlResult<SocketAddr> {
        self.addr()
            .parse()
            .map_err(|e| CrawlError::Argument(format!("bad node address {}: {}", self.addr(), e)))
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:{})", self.name, self.ip, self.port)
    }
}

/// This node's view of the fleet. Only the RPC layer adds and evicts members.
#[derive(Debug, Default)]
pub struct Cluster {
    nodes: RwLock<BTreeMap<String, NodeInfo>>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the node was already known under the same name.
    pub fn add_node(&self, node: NodeInfo) -> bool {
        let mut nodes = self.nodes.write();
        let added = !nodes.contains_key(&node.name);
        if added {
            info!("Node {} joined the cluster", node);
        }
        nodes.insert(node.name.clone(), node);
        added
    }

    pub fn delete_node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.write().remove(name)
    }

    pub fn get_node(&self, name: &str) -> Option<NodeInfo> {
        self.nodes.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.read().contains_key(name)
    }

    /// Snapshot ordered by node name, so every caller sees the same order.
    pub fn get_all_node(&self) -> Vec<NodeInfo> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
