use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use super::base::{Module, ModuleBase, ScoreCalculator};
use super::data::Data;
use super::mid::{Mid, ModuleType};
use crate::http::Response;
use crate::{CrawlError, CrawlResult, Stage};

/// Turns a response into new requests and items.
#[async_trait]
pub trait ResponseParser: Send + Sync {
    async fn parse(&self, response: &Response) -> (Vec<Data>, Vec<CrawlError>);
}

#[async_trait]
impl<F> ResponseParser for F
where
    F: Fn(&Response) -> (Vec<Data>, Vec<CrawlError>) + Send + Sync,
{
    async fn parse(&self, response: &Response) -> (Vec<Data>, Vec<CrawlError>) {
        self(response)
    }
}

#[async_trait]
pub trait Analyzer: Module {
    fn parser_count(&self) -> usize;

    async fn analyze(&self, response: Response) -> (Vec<Data>, Vec<CrawlError>);
}

/// Runs every parser over each response.
pub struct LocalAnalyzer {
    base: ModuleBase,
    parsers: Vec<Arc<dyn ResponseParser>>,
}

impl LocalAnalyzer {
    pub fn new(
        mid: Mid,
        parsers: Vec<Arc<dyn ResponseParser>>,
        calculator: Option<ScoreCalculator>,
    ) -> CrawlResult<Self> {
        let base = ModuleBase::new(mid, calculator)?;
        base.expect_type(ModuleType::Analyzer)?;
        if parsers.is_empty() {
            return Err(CrawlError::Argument(
                "analyzer needs at least one response parser".to_string(),
            ));
        }
        Ok(Self { base, parsers })
    }
}

impl Module for LocalAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for LocalAnalyzer {
    fn parser_count(&self) -> usize {
        self.parsers.len()
    }

    async fn analyze(&self, response: Response) -> (Vec<Data>, Vec<CrawlError>) {
        let _handling = self.base.start_handling();
        self.base.incr_called();
        if let Err(e) = response.request.validate() {
            return (
                Vec::new(),
                vec![CrawlError::stage(Stage::Analyze, e.to_string(), response.url.as_str())],
            );
        }
        self.base.incr_accepted();

        debug!("Analyzing {} (depth={})", response.url, response.depth);
        let mut data_list = Vec::new();
        let mut errors = Vec::new();
        for parser in &self.parsers {
            let (data, parse_errors) = parser.parse(&response).await;
            data_list.extend(data.into_iter().map(|datum| match datum {
                Data::Request(mut request) => {
                    request.depth = response.depth + 1;
                    if request.spider_name.is_empty() {
                        request.spider_name = response.request.spider_name.clone();
                    }
                    Data::Request(request)
                }
                item => item,
            }));
            errors.extend(parse_errors.into_iter().map(|e| match e {
                stage @ CrawlError::Stage { .. } => stage,
                other => CrawlError::stage(Stage::Analyze, other.to_string(), response.url.as_str()),
            }));
        }
        if errors.is_empty() {
            self.base.incr_completed();
        }
        (data_list, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::module::data::Item;
    use serde_json::Value;

    fn link_parser(fail: bool) -> Arc<dyn ResponseParser> {
        Arc::new(move |response: &Response| -> (Vec<Data>, Vec<CrawlError>) {
            if fail {
                return (Vec::new(), vec![CrawlError::Argument("boom".into())]);
            }
            let mut item = Item::new();
            item.insert("url".into(), Value::from(response.url.as_str()));
            item.insert("depth".into(), Value::from(response.depth));
            let next = Request::parse("http://example.com/next").unwrap();
            (vec![Data::Item(item), Data::Request(next)], Vec::new())
        })
    }

    fn response() -> Response {
        let request = Request::parse("http://example.com/")
            .unwrap()
            .with_depth(1)
            .with_spider_name("demo");
        Response::new(request, 200, "<html></html>")
    }

    #[test]
    fn test_new_rejects_bad_args() {
        let illegal = Mid::new_unchecked("A127.0.0.1");
        assert!(LocalAnalyzer::new(illegal, vec![link_parser(false)], None).is_err());
        assert!(LocalAnalyzer::new("D1".parse().unwrap(), vec![link_parser(false)], None).is_err());
        assert!(LocalAnalyzer::new("A1".parse().unwrap(), Vec::new(), None).is_err());
    }

    #[tokio::test]
    async fn test_analyze_sets_child_depth() {
        let analyzer =
            LocalAnalyzer::new("A1|127.0.0.1:8080".parse().unwrap(), vec![link_parser(false)], None)
                .unwrap();
        let (data, errors) = analyzer.analyze(response()).await;
        assert!(errors.is_empty());
        assert_eq!(data.len(), 2);
        match &data[1] {
            Data::Request(request) => {
                assert_eq!(request.depth, 2);
                assert_eq!(request.spider_name, "demo");
            }
            other => panic!("expected request, got {:?}", other),
        }
        let counts = analyzer.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed, counts.handling), (1, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_analyze_failure_counts() {
        let analyzer =
            LocalAnalyzer::new("A1".parse().unwrap(), vec![link_parser(true)], None).unwrap();
        let (_, errors) = analyzer.analyze(response()).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), crate::ErrorKind::Analyze);
        let counts = analyzer.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_analyze_invalid_response() {
        let analyzer =
            LocalAnalyzer::new("A1".parse().unwrap(), vec![link_parser(false)], None).unwrap();
        let request = Request::parse("ftp://example.com/").unwrap();
        let (data, errors) = analyzer.analyze(Response::new(request, 200, "")).await;
        assert!(data.is_empty());
        assert_eq!(errors.len(), 1);
        let counts = analyzer.counts();
        assert_eq!((counts.called, counts.accepted), (1, 0));
    }
}
