//! A distributed crawling node.
//!
//! Each node runs spiders on a local [`Scheduler`] that moves work through
//! downloader, analyzer and pipeline modules. Requests found while crawling
//! are spread over the cluster round-robin by the [`Distributer`], peers talk
//! over a small TCP protocol in [`rpc`], and spider definitions are
//! replicated to every member.

pub mod buffer;
pub mod cluster;
pub mod config;
pub mod control;
pub mod core;
pub mod crawler;
pub mod distributer;
pub mod http;
pub mod module;
pub mod node;
pub mod parser;
pub mod rpc;
pub mod scheduler;
pub mod spider;
pub mod stats;
pub mod storage;

pub use crate::core::{CrawlError, CrawlResult, ErrorKind, RpcError, Stage};
pub use buffer::Pool;
pub use cluster::{Cluster, NodeInfo};
pub use config::NodeConfig;
pub use control::{ControlResult, Controller};
pub use crawler::Crawler;
pub use distributer::{Distributer, DistributerState};
pub use http::{Request, Response};
pub use node::{AntNode, Node};
pub use parser::{RuleParser, RuleSet};
pub use rpc::{RpcClient, RpcServer};
pub use scheduler::{DataArgs, RequestArgs, Scheduler, Status};
pub use spider::{DefaultModuleFactory, ModuleFactory, Spider, SpiderDefinition, SpiderStatus};
pub use stats::StatsTracker;
pub use storage::ProcessorSpec;
