use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::Pool;
use crate::http::Request;
use crate::scheduler::Status;
use crate::spider::{ModuleFactory, Spider, SpiderDefinition, SpiderStatus};
use crate::{CrawlError, CrawlResult};

pub const DISTRIBUTE_BUFFER_CAP: u32 = 50;
pub const DISTRIBUTE_MAX_BUFFER_NUMBER: u32 = 20000;

/// Per-node registry of spiders plus the queue of requests waiting to be distributed.
pub struct Crawler {
    spiders: RwLock<HashMap<String, Arc<Spider>>>,
    distribute_queue: Arc<Pool<Request>>,
    factory: Arc<dyn ModuleFactory>,
}

impl Crawler {
    pub fn new(factory: Arc<dyn ModuleFactory>) -> CrawlResult<Self> {
        Self::with_queue(factory, DISTRIBUTE_BUFFER_CAP, DISTRIBUTE_MAX_BUFFER_NUMBER)
    }

    pub fn with_queue(
        factory: Arc<dyn ModuleFactory>,
        buffer_cap: u32,
        max_buffer_number: u32,
    ) -> CrawlResult<Self> {
        Ok(Self {
            spiders: RwLock::new(HashMap::new()),
            distribute_queue: Arc::new(Pool::new(buffer_cap, max_buffer_number)?),
            factory,
        })
    }

    pub fn get_spider(&self, name: &str) -> CrawlResult<Arc<Spider>> {
        self.spiders
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(format!("spider {}", name)))
    }

    /// Registers a spider and prepares its scheduler.
    pub async fn add_spider(&self, definition: SpiderDefinition) -> CrawlResult<()> {
        if self.spiders.read().contains_key(&definition.name) {
            return Err(CrawlError::Argument(format!(
                "spider {} already exists",
                definition.name
            )));
        }
        let spider = Spider::new(definition)?;
        spider.init(self.factory.as_ref()).await?;

        let mut spiders = self.spiders.write();
        if spiders.contains_key(spider.name()) {
            return Err(CrawlError::Argument(format!(
                "spider {} already exists",
                spider.name()
            )));
        }
        info!("Added spider {}", spider.name());
        spiders.insert(spider.name().to_string(), Arc::new(spider));
        Ok(())
    }

    /// Removes a spider, stopping it first if it is running.
    pub async fn delete_spider(&self, name: &str) -> CrawlResult<()> {
        let spider = self
            .spiders
            .write()
            .remove(name)
            .ok_or_else(|| CrawlError::NotFound(format!("spider {}", name)))?;
        if matches!(
            spider.scheduler().status(),
            Status::Started | Status::Paused
        ) {
            if let Err(e) = spider.stop().await {
                warn!("Stopping deleted spider {} failed: {}", name, e);
            }
        }
        info!("Deleted spider {}", name);
        Ok(())
    }

    /// Prepares the spider again, e.g. after it was stopped.
    pub async fn init_spider(&self, name: &str) -> CrawlResult<()> {
        let spider = self.get_spider(name)?;
        spider.init(self.factory.as_ref()).await
    }

    pub fn first_start_spider(&self, name: &str) -> CrawlResult<()> {
        self.get_spider(name)?
            .first_start(Some(Arc::clone(&self.distribute_queue)))
    }

    pub fn start_spider(&self, name: &str) -> CrawlResult<()> {
        self.get_spider(name)?
            .start(Some(Arc::clone(&self.distribute_queue)))
    }

    pub async fn stop_spider(&self, name: &str) -> CrawlResult<()> {
        self.get_spider(name)?.stop().await
    }

    pub fn pause_spider(&self, name: &str) -> CrawlResult<()> {
        self.get_spider(name)?.pause()
    }

    pub fn recover_spider(&self, name: &str) -> CrawlResult<()> {
        self.get_spider(name)?.recover()
    }

    /// Hands a request to the spider named in it.
    pub fn accept_request(&self, request: Request) -> CrawlResult<bool> {
        let spider = self.get_spider(&request.spider_name)?;
        Ok(spider.accept_request(request))
    }

    pub fn has_request(&self, request: &Request) -> CrawlResult<bool> {
        Ok(self.get_spider(&request.spider_name)?.has_request(&request.url))
    }

    /// A spider can be stopped once it has gone idle.
    pub fn can_stop_spider(&self, name: &str) -> CrawlResult<bool> {
        Ok(self.get_spider(name)?.idle())
    }

    pub fn can_start_spider(&self, name: &str) -> CrawlResult<bool> {
        Ok(self.get_spider(name)?.can_start())
    }

    pub fn spider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.spiders.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn spider_status(&self, name: &str) -> CrawlResult<SpiderStatus> {
        Ok(self.get_spider(name)?.status())
    }

    pub fn spider_status_list(&self) -> Vec<SpiderStatus> {
        let mut list: Vec<SpiderStatus> =
            self.spiders.read().values().map(|s| s.status()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn distribute_queue(&self) -> Arc<Pool<Request>> {
        Arc::clone(&self.distribute_queue)
    }

    pub fn distribute_queue_size(&self) -> usize {
        self.distribute_queue.total()
    }

    /// Waits for the next request to distribute. Fails once the queue is closed.
    pub async fn pop_request(&self) -> CrawlResult<Request> {
        self.distribute_queue.get().await
    }

    /// Stops every running spider and closes the distribute queue.
    pub async fn shutdown(&self) {
        let spiders: Vec<Arc<Spider>> = self.spiders.read().values().cloned().collect();
        for spider in spiders {
            if matches!(
                spider.scheduler().status(),
                Status::Started | Status::Paused
            ) {
                if let Err(e) = spider.stop().await {
                    warn!("Stopping spider {} failed: {}", spider.name(), e);
                }
            }
        }
        self.distribute_queue.close();
        debug!("Crawler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ModuleArgs, RequestArgs};
    use crate::spider::DefaultModuleFactory;
    use crate::ErrorKind;

    fn crawler() -> Crawler {
        Crawler::new(Arc::new(DefaultModuleFactory::new(None))).unwrap()
    }

    fn definition(name: &str) -> SpiderDefinition {
        SpiderDefinition::new(name)
            .with_request_args(RequestArgs::new(vec!["example.com".into()], 1))
            .with_start_url("http://www.example.com/")
            .unwrap()
    }

    #[tokio::test]
    async fn test_registry() {
        let crawler = crawler();
        crawler.add_spider(definition("b")).await.unwrap();
        crawler.add_spider(definition("a")).await.unwrap();
        let err = crawler.add_spider(definition("a")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);

        assert_eq!(crawler.spider_names(), vec!["a", "b"]);
        assert!(crawler.can_start_spider("a").unwrap());
        assert_eq!(
            crawler.spider_status("zzz").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        let list = crawler.spider_status_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].status, Status::Prepared);

        crawler.delete_spider("b").await.unwrap();
        assert!(crawler.delete_spider("b").await.is_err());
        assert_eq!(crawler.spider_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_accept_request_routes_by_spider_name() {
        let crawler = crawler();
        crawler.add_spider(definition("a")).await.unwrap();
        crawler.start_spider("a").unwrap();
        crawler.pause_spider("a").unwrap();

        let request = Request::parse("http://www.example.com/x")
            .unwrap()
            .with_spider_name("a")
            .with_depth(1);
        assert!(crawler.accept_request(request.clone()).unwrap());
        assert!(crawler.has_request(&request).unwrap());
        assert!(!crawler.accept_request(request.clone()).unwrap());
        assert!(!crawler.can_stop_spider("a").unwrap());

        let orphan = request.with_spider_name("missing");
        assert!(crawler.accept_request(orphan).is_err());

        crawler.recover_spider("a").unwrap();
        crawler.shutdown().await;
        assert_eq!(crawler.spider_status("a").unwrap().status, Status::Stopped);
        assert!(crawler.pop_request().await.is_err());
    }

    struct EmptyFactory;

    #[async_trait::async_trait]
    impl ModuleFactory for EmptyFactory {
        async fn build(&self, _definition: &SpiderDefinition) -> CrawlResult<ModuleArgs> {
            Ok(ModuleArgs::default())
        }
    }

    #[tokio::test]
    async fn test_add_spider_with_bad_modules_is_not_registered() {
        let crawler = Crawler::new(Arc::new(EmptyFactory)).unwrap();
        assert!(crawler.add_spider(definition("a")).await.is_err());
        assert!(crawler.spider_names().is_empty());
    }

    #[tokio::test]
    async fn test_distribute_queue() {
        let crawler = crawler();
        let queue = crawler.distribute_queue();
        queue
            .put(Request::parse("http://www.example.com/").unwrap())
            .await
            .unwrap();
        assert_eq!(crawler.distribute_queue_size(), 1);
        let request = crawler.pop_request().await.unwrap();
        assert_eq!(request.url.as_str(), "http://www.example.com/");
    }
}
