use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::cluster::Cluster;
use crate::distributer::Distributer;
use crate::node::Node;
use crate::rpc::RpcClient;
use crate::spider::SpiderDefinition;
use crate::{CrawlError, CrawlResult};

/// Outcome of an operator command, ready to be rendered as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    pub success: bool,
    pub error_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ControlResult {
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            success: true,
            error_code: 0,
            error: None,
            payload,
        }
    }

    pub fn failed(err: &CrawlError) -> Self {
        Self {
            success: false,
            error_code: err.code(),
            error: Some(err.to_string()),
            payload: None,
        }
    }

    fn from_result<T: Serialize>(result: CrawlResult<T>) -> Self {
        match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
            Ok(Value::Null) => Self::ok(None),
            Ok(value) => Self::ok(Some(value)),
            Err(e) => Self::failed(&e),
        }
    }
}

/// Operator commands for a node and, through it, the whole cluster.
pub struct Controller {
    node: Arc<Node>,
    cluster: Arc<Cluster>,
    client: Arc<RpcClient>,
    distributer: Arc<Distributer>,
}

impl Controller {
    pub fn new(
        node: Arc<Node>,
        cluster: Arc<Cluster>,
        client: Arc<RpcClient>,
        distributer: Arc<Distributer>,
    ) -> Self {
        Self {
            node,
            cluster,
            client,
            distributer,
        }
    }

    pub fn spiders(&self) -> ControlResult {
        ControlResult::from_result(Ok(self.node.crawler().spider_names()))
    }

    pub fn spider_status(&self, name: &str) -> ControlResult {
        ControlResult::from_result(self.node.crawler().spider_status(name))
    }

    pub fn spider_status_list(&self) -> ControlResult {
        ControlResult::from_result(Ok(self.node.crawler().spider_status_list()))
    }

    pub fn cluster(&self) -> ControlResult {
        ControlResult::from_result(Ok(serde_json::json!({
            "node": self.node.info(),
            "nodes": self.cluster.get_all_node(),
            "distributer": self.distributer.state(),
            "distribute_queue_size": self.node.crawler().distribute_queue_size(),
        })))
    }

    /// Registers a spider here and on every peer.
    pub async fn add_spider(&self, definition: SpiderDefinition) -> ControlResult {
        let name = definition.name.clone();
        let result = self.client.add_spider(definition).await;
        if result.is_ok() {
            info!("Spider {} added cluster-wide", name);
        }
        ControlResult::from_result(result)
    }

    /// Seeds the spider on this node and starts it everywhere.
    pub async fn start_spider(&self, name: &str) -> ControlResult {
        let result = self.client.start_spider(name).await;
        if result.is_ok() {
            self.distributer.start();
        }
        ControlResult::from_result(result)
    }

    pub async fn stop_spider(&self, name: &str) -> ControlResult {
        ControlResult::from_result(self.client.stop_spider(name).await)
    }

    pub async fn pause_spider(&self, name: &str) -> ControlResult {
        ControlResult::from_result(self.client.pause_spider(name).await)
    }

    pub async fn recover_spider(&self, name: &str) -> ControlResult {
        ControlResult::from_result(self.client.recover_spider(name).await)
    }
}
