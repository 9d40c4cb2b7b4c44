use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::buffer::Pool;
use crate::http::Request;
use crate::module::{
    calculate_score_simple, generate_mid, Analyzer, Downloader, HttpDownloader, ItemProcessor,
    LocalAnalyzer, LocalPipeline, ModuleType, Pipeline, ResponseParser, SnGenerator,
};
use crate::parser::{RuleParser, RuleSet};
use crate::scheduler::{
    check_status, DataArgs, ModuleArgs, RequestArgs, Scheduler, Status, DEFAULT_MAX_CONCURRENCY,
};
use crate::storage::{LogSink, ProcessorSpec};
use crate::{CrawlError, CrawlResult};

/// Everything needed to build a spider on any node. Plain data: cloning it
/// is the deep copy shipped to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiderDefinition {
    pub name: String,
    #[serde(default)]
    pub request_args: RequestArgs,
    #[serde(default)]
    pub data_args: DataArgs,
    #[serde(default)]
    pub rules: RuleSet,
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
    #[serde(default)]
    pub start_urls: Vec<Url>,
    /// Seeds that need more than a URL (method, headers, body).
    #[serde(default)]
    pub start_requests: Vec<Request>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Stop the processor chain at the first failing step.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_fail_fast() -> bool {
    true
}

impl SpiderDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request_args: RequestArgs::default(),
            data_args: DataArgs::default(),
            rules: RuleSet::default(),
            processors: Vec::new(),
            start_urls: Vec::new(),
            start_requests: Vec::new(),
            max_concurrency: None,
            fail_fast: true,
        }
    }

    pub fn with_request_args(mut self, request_args: RequestArgs) -> Self {
        self.request_args = request_args;
        self
    }

    pub fn with_data_args(mut self, data_args: DataArgs) -> Self {
        self.data_args = data_args;
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_processor(mut self, processor: ProcessorSpec) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_start_url(mut self, url: &str) -> CrawlResult<Self> {
        self.start_urls.push(Url::parse(url)?);
        Ok(self)
    }

    pub fn with_start_request(mut self, request: Request) -> Self {
        self.start_requests.push(request);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn check(&self) -> CrawlResult<()> {
        if self.name.trim().is_empty() {
            return Err(CrawlError::Argument("empty spider name".to_string()));
        }
        self.request_args.check()?;
        self.data_args.check()?;
        RuleParser::new(self.rules.clone())?;
        Ok(())
    }

    /// Seed requests tagged with this spider's name, depth 0.
    pub fn initial_requests(&self) -> Vec<Request> {
        self.start_urls
            .iter()
            .cloned()
            .map(Request::new)
            .chain(self.start_requests.iter().cloned())
            .map(|request| request.with_depth(0).with_spider_name(self.name.as_str()))
            .collect()
    }
}

/// Turns a definition into the modules a scheduler runs.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn build(&self, definition: &SpiderDefinition) -> CrawlResult<ModuleArgs>;
}

/// Builds one HTTP downloader, one rule-driven analyzer and one pipeline per spider.
pub struct DefaultModuleFactory {
    sn: SnGenerator,
    addr: Option<SocketAddr>,
    timeout: Duration,
}

impl DefaultModuleFactory {
    pub fn new(addr: Option<SocketAddr>) -> Self {
        Self {
            sn: SnGenerator::default(),
            addr,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ModuleFactory for DefaultModuleFactory {
    async fn build(&self, definition: &SpiderDefinition) -> CrawlResult<ModuleArgs> {
        let mid = |module_type| generate_mid(module_type, self.sn.get(), self.addr);

        let downloader: Arc<dyn Downloader> = Arc::new(
            HttpDownloader::new(mid(ModuleType::Downloader), Some(calculate_score_simple))?
                .with_timeout(self.timeout),
        );

        let parser: Arc<dyn ResponseParser> = Arc::new(RuleParser::new(definition.rules.clone())?);
        let analyzer: Arc<dyn Analyzer> = Arc::new(LocalAnalyzer::new(
            mid(ModuleType::Analyzer),
            vec![parser],
            Some(calculate_score_simple),
        )?);

        let mut processors: Vec<Arc<dyn ItemProcessor>> = Vec::new();
        for processor in &definition.processors {
            processors.push(processor.build(&definition.name).await?);
        }
        if processors.is_empty() {
            processors.push(Arc::new(LogSink::new(definition.name.as_str())));
        }
        let pipeline: Arc<dyn Pipeline> = Arc::new(LocalPipeline::new(
            mid(ModuleType::Pipeline),
            processors,
            Some(calculate_score_simple),
        )?
        .with_fail_fast(definition.fail_fast));

        Ok(ModuleArgs::new(downloader, analyzer, pipeline))
    }
}

/// Externally visible state of a spider, derived from its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiderStatus {
    pub name: String,
    pub status: Status,
    pub crawled: u64,
    pub success: u64,
    pub running: u64,
    pub waiting: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A named crawl job bound to one scheduler for its whole life.
pub struct Spider {
    definition: SpiderDefinition,
    scheduler: Scheduler,
    start_time: RwLock<Option<DateTime<Utc>>>,
    end_time: RwLock<Option<DateTime<Utc>>>,
}

impl Spider {
    pub fn new(definition: SpiderDefinition) -> CrawlResult<Self> {
        definition.check()?;
        let scheduler = Scheduler::new().with_max_concurrency(
            definition.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        );
        Ok(Self {
            definition,
            scheduler,
            start_time: RwLock::new(None),
            end_time: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &SpiderDefinition {
        &self.definition
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Builds fresh modules and prepares the scheduler.
    pub async fn init(&self, factory: &dyn ModuleFactory) -> CrawlResult<()> {
        if self.scheduler.status() == Status::Prepared {
            return Ok(());
        }
        let modules = factory.build(&self.definition).await?;
        self.scheduler.init(
            self.definition.request_args.clone(),
            self.definition.data_args,
            modules,
        )
    }

    /// Starts and enqueues the seeds. Done once per cluster for a spider.
    pub fn first_start(&self, distribute_queue: Option<Arc<Pool<Request>>>) -> CrawlResult<()> {
        self.scheduler.set_distribute_queue(distribute_queue);
        self.scheduler.start(Some(self.definition.initial_requests()))?;
        *self.start_time.write() = Some(Utc::now());
        info!("Spider {} first started", self.name());
        Ok(())
    }

    /// Starts without seeds; work arrives from peers or from what is buffered.
    pub fn start(&self, distribute_queue: Option<Arc<Pool<Request>>>) -> CrawlResult<()> {
        self.scheduler.set_distribute_queue(distribute_queue);
        self.scheduler.start(None)?;
        *self.start_time.write() = Some(Utc::now());
        info!("Spider {} started", self.name());
        Ok(())
    }

    pub async fn stop(&self) -> CrawlResult<()> {
        self.scheduler.stop().await?;
        *self.end_time.write() = Some(Utc::now());
        info!("Spider {} stopped", self.name());
        Ok(())
    }

    pub fn pause(&self) -> CrawlResult<()> {
        self.scheduler.pause()
    }

    pub fn recover(&self) -> CrawlResult<()> {
        self.scheduler.recover()
    }

    pub fn accept_request(&self, request: Request) -> bool {
        let accepted = self.scheduler.send_req(request);
        if !accepted {
            debug!("Spider {} did not accept a request", self.name());
        }
        accepted
    }

    pub fn has_request(&self, url: &Url) -> bool {
        self.scheduler.has_request(url)
    }

    pub fn idle(&self) -> bool {
        self.scheduler.idle()
    }

    pub fn can_start(&self) -> bool {
        check_status(self.scheduler.status(), Status::Starting).is_ok()
    }

    pub fn status(&self) -> SpiderStatus {
        let summary = self.scheduler.summary();
        let (crawled, success, running) = summary
            .downloaders
            .iter()
            .fold((0, 0, 0), |(called, completed, handling), d| {
                (called + d.called, completed + d.completed, handling + d.handling)
            });
        SpiderStatus {
            name: self.definition.name.clone(),
            status: summary.status,
            crawled,
            success,
            running,
            waiting: summary.req_buffer.map(|b| b.total).unwrap_or(0),
            start_time: *self.start_time.read(),
            end_time: *self.end_time.read(),
        }
    }
}
