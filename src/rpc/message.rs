use serde::{Deserialize, Serialize};

use crate::cluster::NodeInfo;
use crate::RpcError;
use crate::http::Request;
use crate::spider::SpiderDefinition;
use crate::{CrawlError, CrawlResult, ErrorKind};

/// Operations a peer can ask of this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RpcCall {
    IsAlive,
    AcceptRequest(Request),
    StartSpider(String),
    StopSpider(String),
    PauseSpider(String),
    RecoverSpider(String),
    /// Register a spider on the receiving node only.
    AddSpider(SpiderDefinition),
    /// Register a spider on the receiving node and replicate it to the cluster.
    FirstAddSpider(SpiderDefinition),
    LetMeIn(NodeInfo),
    GetAllNode,
}

impl RpcCall {
    pub fn name(&self) -> &'static str {
        match self {
            RpcCall::IsAlive => "IsAlive",
            RpcCall::AcceptRequest(_) => "AcceptRequest",
            RpcCall::StartSpider(_) => "StartSpider",
            RpcCall::StopSpider(_) => "StopSpider",
            RpcCall::PauseSpider(_) => "PauseSpider",
            RpcCall::RecoverSpider(_) => "RecoverSpider",
            RpcCall::AddSpider(_) => "AddSpider",
            RpcCall::FirstAddSpider(_) => "FirstAddSpider",
            RpcCall::LetMeIn(_) => "LetMeIn",
            RpcCall::GetAllNode => "GetAllNode",
        }
    }
}

/// A call plus the identity of the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub from: NodeInfo,
    pub call: RpcCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReply {
    /// The replying node.
    pub node: NodeInfo,
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeInfo>,
}

impl RpcReply {
    pub fn ok(node: NodeInfo) -> Self {
        Self {
            node,
            result: true,
            error: None,
            nodes: Vec::new(),
        }
    }

    pub fn failed(node: NodeInfo, err: &CrawlError) -> Self {
        Self {
            node,
            result: false,
            error: Some(err.to_rpc()),
            nodes: Vec::new(),
        }
    }

    pub fn from_result(node: NodeInfo, result: CrawlResult<()>) -> Self {
        match result {
            Ok(()) => Self::ok(node),
            Err(e) => Self::failed(node, &e),
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Turns a failed reply back into the error the peer reported.
    pub fn into_result(self) -> CrawlResult<Self> {
        match (&self.error, self.result) {
            (Some(error), _) => Err(CrawlError::from(error.clone())),
            (None, false) => Err(CrawlError::Remote(RpcError {
                code: ErrorKind::Transport.code(),
                message: "Rpc Call Failed".to_string(),
                detail: format!("node {} refused the call", self.node),
            })),
            (None, true) => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json() {
        let envelope = RpcEnvelope {
            from: NodeInfo::new("a", "127.0.0.1", 8001),
            call: RpcCall::StartSpider("books".into()),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["call"]["method"], "StartSpider");
        assert_eq!(json["call"]["params"], "books");

        let back: RpcEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.call.name(), "StartSpider");
    }

    #[test]
    fn test_reply_errors_survive() {
        let node = NodeInfo::new("b", "127.0.0.1", 8002);
        let reply = RpcReply::from_result(
            node.clone(),
            Err(CrawlError::NotFound("spider books".into())),
        );
        let json = serde_json::to_string(&reply).unwrap();
        let back: RpcReply = serde_json::from_str(&json).unwrap();
        assert!(!back.result);
        assert_eq!(back.into_result().unwrap_err().kind(), ErrorKind::NotFound);

        let ok = RpcReply::ok(node).with_nodes(vec![NodeInfo::new("c", "127.0.0.1", 1)]);
        assert_eq!(ok.into_result().unwrap().nodes.len(), 1);
    }
}
