use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::buffer::Pool;
use crate::http::{Request, Response};
use crate::module::{
    Data, Downloader, Item, ItemProcessor, LocalAnalyzer, LocalPipeline, Mid, Module, ModuleBase,
    ResponseParser, SnGenerator,
};
use crate::{CrawlError, CrawlResult, ErrorKind};

/// Serves a page per URL without touching the network. Each page links to `/<n+1>`.
struct FakeDownloader {
    base: ModuleBase,
    fail: bool,
}

impl Module for FakeDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, request: Request) -> CrawlResult<Response> {
        let _handling = self.base.start_handling();
        self.base.incr_called();
        self.base.incr_accepted();
        if self.fail {
            return Err(CrawlError::stage(
                crate::Stage::Download,
                "connection refused",
                request.url.as_str(),
            ));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.base.incr_completed();
        let body = format!("page {}", request.url.path());
        Ok(Response::new(request, 200, body))
    }
}

fn mid(letter: char, sn: &SnGenerator) -> Mid {
    format!("{}{}|127.0.0.1:8080", letter, sn.get()).parse().unwrap()
}

fn link_parser() -> Arc<dyn ResponseParser> {
    Arc::new(|response: &Response| -> (Vec<Data>, Vec<CrawlError>) {
        let mut item = Item::new();
        item.insert("url".into(), Value::from(response.url.as_str()));
        item.insert("depth".into(), Value::from(response.depth));

        let current = response
            .url
            .path()
            .trim_start_matches('/')
            .parse::<u32>()
            .unwrap_or(0);
        let next = response.url.join(&format!("/{}", current + 1)).unwrap();
        (
            vec![Data::Item(item), Data::Request(Request::new(next))],
            Vec::new(),
        )
    })
}

fn collector(sink: Arc<Mutex<Vec<Item>>>) -> Arc<dyn ItemProcessor> {
    Arc::new(move |item: &Item| -> CrawlResult<Item> {
        sink.lock().push(item.clone());
        Ok(item.clone())
    })
}

fn module_args(fail_download: bool, sink: Arc<Mutex<Vec<Item>>>) -> ModuleArgs {
    let sn = SnGenerator::new(1, 0);
    ModuleArgs::new(
        Arc::new(FakeDownloader {
            base: ModuleBase::new(mid('D', &sn), None).unwrap(),
            fail: fail_download,
        }),
        Arc::new(LocalAnalyzer::new(mid('A', &sn), vec![link_parser()], None).unwrap()),
        Arc::new(LocalPipeline::new(mid('P', &sn), vec![collector(sink)], None).unwrap()),
    )
}

fn simple_module_args() -> ModuleArgs {
    module_args(false, Arc::new(Mutex::new(Vec::new())))
}

fn seed() -> Request {
    Request::parse("http://cn.bing.com/0").unwrap()
}

async fn wait_idle(sched: &Scheduler) {
    let mut streak = 0;
    for _ in 0..500 {
        if sched.idle() {
            streak += 1;
            if streak >= 3 {
                return;
            }
        } else {
            streak = 0;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scheduler did not become idle: {:?}", sched.summary());
}

#[tokio::test]
async fn test_status_sequence() {
    let sched = Scheduler::new();
    let request_args = RequestArgs::new(vec!["bing.com".into()], 0);
    let data_args = DataArgs::uniform(10, 2);

    assert!(matches!(
        sched.start(Some(vec![seed()])),
        Err(CrawlError::StatusConflict(_))
    ));
    assert!(sched.start(None).is_err());
    assert!(sched.stop().await.is_err());

    sched
        .init(request_args.clone(), data_args, simple_module_args())
        .unwrap();
    sched
        .init(request_args.clone(), data_args, simple_module_args())
        .unwrap();
    assert_eq!(sched.status(), Status::Prepared);
    assert!(sched.stop().await.is_err());

    sched.start(Some(vec![seed()])).unwrap();
    assert_eq!(sched.status(), Status::Started);
    assert!(sched.start(Some(vec![seed()])).is_err());
    assert!(sched
        .init(request_args.clone(), data_args, simple_module_args())
        .is_err());

    sched.stop().await.unwrap();
    assert_eq!(sched.status(), Status::Stopped);
    assert!(sched.stop().await.is_err());
    assert!(sched.start(None).is_err());

    sched
        .init(request_args, data_args, simple_module_args())
        .unwrap();
    assert_eq!(sched.status(), Status::Prepared);
    assert_eq!(sched.url_number(), 0);
}

#[tokio::test]
async fn test_init_rejects_invalid_args() {
    let request_args = RequestArgs::new(Vec::new(), 0);
    let data_args = DataArgs::uniform(10, 2);

    let sched = Scheduler::new();
    let missing_domains = RequestArgs {
        accepted_domains: None,
        max_depth: 0,
    };
    assert!(sched
        .init(missing_domains, data_args, simple_module_args())
        .is_err());

    let mut zero = data_args;
    zero.item_max_buffer_number = 0;
    assert!(sched
        .init(request_args.clone(), zero, simple_module_args())
        .is_err());

    let mut no_pipeline = simple_module_args();
    no_pipeline.pipelines.clear();
    assert!(sched
        .init(request_args.clone(), data_args, no_pipeline)
        .is_err());
    assert_eq!(sched.status(), Status::Unprepared);

    // validation still applies once prepared
    sched
        .init(request_args, data_args, simple_module_args())
        .unwrap();
    let missing_domains = RequestArgs {
        accepted_domains: None,
        max_depth: 0,
    };
    assert!(sched
        .init(missing_domains, data_args, simple_module_args())
        .is_err());
}

#[tokio::test]
async fn test_failed_reinit_stays_stopped() {
    let sched = Scheduler::new();
    let request_args = RequestArgs::new(vec!["bing.com".into()], 0);
    let data_args = DataArgs::uniform(10, 2);
    sched
        .init(request_args.clone(), data_args, simple_module_args())
        .unwrap();
    sched.start(None).unwrap();
    sched.stop().await.unwrap();

    let malformed = RequestArgs::new(vec!["a..b.com".into()], 0);
    assert!(sched
        .init(malformed, data_args, simple_module_args())
        .is_err());
    assert_eq!(sched.status(), Status::Stopped);
    assert!(sched.start(None).is_err());

    sched
        .init(request_args, data_args, simple_module_args())
        .unwrap();
    assert_eq!(sched.status(), Status::Prepared);
}

#[tokio::test]
async fn test_start_rejects_bad_seed_and_keeps_status() {
    let sched = Scheduler::new();
    sched
        .init(
            RequestArgs::new(vec!["bing.com".into()], 0),
            DataArgs::uniform(10, 2),
            simple_module_args(),
        )
        .unwrap();

    let ftp = Request::parse("ftp://cn.bing.com/file").unwrap();
    assert!(matches!(
        sched.start(Some(vec![ftp])),
        Err(CrawlError::Argument(_))
    ));
    let foreign = Request::parse("http://example.com/").unwrap();
    assert!(matches!(
        sched.start(Some(vec![foreign])),
        Err(CrawlError::Argument(_))
    ));
    assert_eq!(sched.status(), Status::Prepared);

    sched.start(Some(vec![seed()])).unwrap();
    sched.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_req_policy_and_dedup() {
    let sched = Scheduler::new();
    sched
        .init(
            RequestArgs::new(vec!["bing.com".into()], 1),
            DataArgs::uniform(10, 2),
            simple_module_args(),
        )
        .unwrap();

    assert!(sched.send_req(seed()));
    assert!(!sched.send_req(seed()));
    assert!(sched.has_request(&seed().url));

    assert!(!sched.send_req(Request::parse("http://example.com/").unwrap()));
    assert!(!sched.send_req(Request::parse("mailto:someone@bing.com").unwrap()));
    assert!(!sched.send_req(
        Request::parse("http://www.bing.com/deep").unwrap().with_depth(2)
    ));
    assert!(sched.send_req(Request::parse("http://www.bing.com/ok").unwrap().with_depth(1)));
    assert_eq!(sched.url_number(), 2);
    assert_eq!(sched.request_number(), 2);
}

#[tokio::test]
async fn test_concurrent_send_req_accepts_once() {
    let sched = Scheduler::new();
    sched
        .init(
            RequestArgs::new(Vec::new(), 0),
            DataArgs::uniform(10, 2),
            simple_module_args(),
        )
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let sched = sched.clone();
            tokio::spawn(async move { sched.send_req(seed()) })
        })
        .collect();
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn test_crawl_until_idle() {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let sched = Scheduler::new().with_max_concurrency(4);
    sched
        .init(
            RequestArgs::new(vec!["bing.com".into()], 3),
            DataArgs::uniform(10, 2),
            module_args(false, Arc::clone(&sink)),
        )
        .unwrap();
    sched.start(Some(vec![seed()])).unwrap();
    wait_idle(&sched).await;

    // depths 0..=3 are crawled, the link to depth 4 is dropped
    let items = sink.lock().clone();
    assert_eq!(items.len(), 4);
    let mut depths: Vec<u64> = items.iter().map(|i| i["depth"].as_u64().unwrap()).collect();
    depths.sort();
    assert_eq!(depths, vec![0, 1, 2, 3]);

    let summary = sched.summary();
    assert_eq!(summary.status, Status::Started);
    assert_eq!(summary.downloaders[0].completed, 4);
    assert_eq!(summary.analyzers[0].completed, 4);
    assert_eq!(summary.pipelines[0].completed, 4);
    assert_eq!(summary.url_number, 4);
    assert!(summary.to_json_pretty().unwrap().contains("\"status\": \"started\""));

    sched.stop().await.unwrap();
    assert!(!sched.send_req(Request::parse("http://cn.bing.com/new").unwrap()));
    assert!(sched.next_error().await.is_none());
}

#[tokio::test]
async fn test_pause_and_recover() {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let sched = Scheduler::new();
    sched
        .init(
            RequestArgs::new(Vec::new(), 0),
            DataArgs::uniform(10, 2),
            module_args(false, Arc::clone(&sink)),
        )
        .unwrap();
    sched.start(None).unwrap();
    sched.pause().unwrap();
    assert_eq!(sched.status(), Status::Paused);
    assert!(sched.pause().is_err());

    assert!(sched.send_req(seed()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sched.request_number(), 1);
    assert!(sink.lock().is_empty());

    sched.recover().unwrap();
    assert!(sched.recover().is_err());
    wait_idle(&sched).await;
    assert_eq!(sink.lock().len(), 1);

    // starting again from paused resumes as well
    sched.pause().unwrap();
    sched.start(None).unwrap();
    assert_eq!(sched.status(), Status::Started);

    sched.pause().unwrap();
    sched.stop().await.unwrap();
    assert_eq!(sched.status(), Status::Stopped);
}

#[tokio::test]
async fn test_new_requests_go_to_distribute_queue() {
    let queue = Arc::new(Pool::new(10, 2).unwrap());
    let sched = Scheduler::new().with_distribute_queue(Arc::clone(&queue));
    sched
        .init(
            RequestArgs::new(vec!["bing.com".into()], 5),
            DataArgs::uniform(10, 2),
            simple_module_args(),
        )
        .unwrap();
    sched.start(Some(vec![seed()])).unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), queue.get())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.url.as_str(), "http://cn.bing.com/1");
    assert_eq!(next.depth, 1);
    wait_idle(&sched).await;
    assert_eq!(sched.url_number(), 1);

    sched.stop().await.unwrap();
}

#[tokio::test]
async fn test_stage_errors_reach_error_buffer() {
    let sched = Scheduler::new();
    sched
        .init(
            RequestArgs::new(Vec::new(), 0),
            DataArgs::uniform(10, 2),
            module_args(true, Arc::new(Mutex::new(Vec::new()))),
        )
        .unwrap();
    sched.start(Some(vec![seed()])).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), sched.next_error())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Download);
    wait_idle(&sched).await;
    sched.stop().await.unwrap();
}
