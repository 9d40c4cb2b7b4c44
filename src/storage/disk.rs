use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;
use uuid::Uuid;

use super::item_context;
use crate::module::{Item, ItemProcessor};
use crate::{CrawlError, CrawlResult, Stage};

/// Writes each item as a pretty JSON file under
/// `<base>/<spider>/<host>/<timestamp>_<uuid>.json`.
#[derive(Debug, Clone)]
pub struct DiskSink {
    base_path: PathBuf,
}

impl DiskSink {
    pub async fn new<P: AsRef<Path>>(base_path: P, spider_name: &str) -> CrawlResult<Self> {
        let base_path = base_path.as_ref().join(spider_name);
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn store(&self, item: &Item) -> CrawlResult<PathBuf> {
        let url = item
            .get("url")
            .and_then(|v| v.as_str())
            .and_then(|u| Url::parse(u).ok());
        let host = url
            .as_ref()
            .and_then(|u| u.host_str())
            .unwrap_or("unknown")
            .to_string();

        let now = Utc::now();
        let id = Uuid::now_v7();
        let dir = self.base_path.join(host);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}_{}.json", now.format("%Y%m%d_%H%M%S"), id));

        let json = serde_json::json!({
            "url": url.map(|u| u.to_string()),
            "timestamp": now,
            "data": item,
            "id": id.to_string(),
        });
        fs::write(&path, serde_json::to_string_pretty(&json)?).await?;
        Ok(path)
    }
}

#[async_trait]
impl ItemProcessor for DiskSink {
    async fn process(&self, item: &Item) -> CrawlResult<Item> {
        match self.store(item).await {
            Ok(path) => {
                debug!("Stored item at {}", path.display());
                Ok(item.clone())
            }
            Err(e) => Err(CrawlError::stage(
                Stage::Process,
                format!("disk write failed: {}", e),
                item_context(item),
            )),
        }
    }
}
