use async_trait::async_trait;
use log::info;

use crate::module::{Item, ItemProcessor};
use crate::CrawlResult;

/// Logs every item at info level and passes it on unchanged.
pub struct LogSink {
    spider_name: String,
}

impl LogSink {
    pub fn new(spider_name: impl Into<String>) -> Self {
        Self {
            spider_name: spider_name.into(),
        }
    }
}

#[async_trait]
impl ItemProcessor for LogSink {
    async fn process(&self, item: &Item) -> CrawlResult<Item> {
        info!(
            "[{}] item: {}",
            self.spider_name,
            serde_json::to_string(item)?
        );
        Ok(item.clone())
    }
}
