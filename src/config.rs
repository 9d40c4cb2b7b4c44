use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::crawler::{DISTRIBUTE_BUFFER_CAP, DISTRIBUTE_MAX_BUFFER_NUMBER};
use crate::{CrawlError, CrawlResult};

/// Settings of one crawling node, read from a JSON file or built in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable identity of the node in the cluster.
    pub name: String,
    pub ip: String,
    /// 0 picks a free port.
    pub port: u16,
    /// `ip:port` of a node of the cluster to join at startup.
    pub join: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub download_timeout_ms: u64,
    /// Concurrent forwards the distributer keeps in flight.
    pub distributer_concurrency: usize,
    pub distribute_buffer_cap: u32,
    pub distribute_max_buffer_number: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: Uuid::now_v7().to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8200,
            join: None,
            heartbeat_interval_ms: 5000,
            rpc_timeout_ms: 10_000,
            download_timeout_ms: 30_000,
            distributer_concurrency: 10,
            distribute_buffer_cap: DISTRIBUTE_BUFFER_CAP,
            distribute_max_buffer_number: DISTRIBUTE_MAX_BUFFER_NUMBER,
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> CrawlResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Argument(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            CrawlError::Argument(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> CrawlResult<()> {
        if self.name.trim().is_empty() {
            return Err(CrawlError::Argument("empty node name".to_string()));
        }
        if self.heartbeat_interval_ms == 0 || self.rpc_timeout_ms == 0 {
            return Err(CrawlError::Argument(
                "heartbeat interval and rpc timeout must be positive".to_string(),
            ));
        }
        if self.distributer_concurrency == 0 {
            return Err(CrawlError::Argument(
                "distributer concurrency must be positive".to_string(),
            ));
        }
        if let Some(join) = &self.join {
            parse_peer(join)?;
        }
        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_join(mut self, join: impl Into<String>) -> Self {
        self.join = Some(join.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_distributer_concurrency(mut self, concurrency: usize) -> Self {
        self.distributer_concurrency = concurrency;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

/// Splits `ip:port` at the last colon.
pub fn parse_peer(peer: &str) -> CrawlResult<(String, u16)> {
    let (ip, port) = peer
        .rsplit_once(':')
        .ok_or_else(|| CrawlError::Argument(format!("peer {:?} is not ip:port", peer)))?;
    let port = port
        .parse()
        .map_err(|e| CrawlError::Argument(format!("bad port in {:?}: {}", peer, e)))?;
    if ip.is_empty() {
        return Err(CrawlError::Argument(format!("peer {:?} has no ip", peer)));
    }
    Ok((ip.to_string(), port))
}
