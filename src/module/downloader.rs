use async_trait::async_trait;
use chrono::Utc;
use log::{debug, trace};
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder, Proxy};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::base::{Module, ModuleBase, ScoreCalculator};
use super::mid::{Mid, ModuleType};
use crate::http::{Request, Response};
use crate::stats::StatsTracker;
use crate::{CrawlError, CrawlResult, Stage};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[async_trait]
pub trait Downloader: Module {
    async fn download(&self, request: Request) -> CrawlResult<Response>;
}

/// reqwest backed downloader.
pub struct HttpDownloader {
    base: ModuleBase,
    client: Client,
    proxy_clients: Mutex<HashMap<String, Client>>,
    timeout: Duration,
    stats: StatsTracker,
}

impl HttpDownloader {
    pub fn new(mid: Mid, calculator: Option<ScoreCalculator>) -> CrawlResult<Self> {
        let base = ModuleBase::new(mid, calculator)?;
        base.expect_type(ModuleType::Downloader)?;
        Ok(Self {
            base,
            client: Self::build_client(None)?,
            proxy_clients: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(30),
            stats: StatsTracker::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    fn build_client(proxy: Option<&str>) -> CrawlResult<Client> {
        let mut builder = ClientBuilder::new().user_agent(DEFAULT_USER_AGENT);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| CrawlError::Argument(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| CrawlError::Argument(format!("failed to build http client: {}", e)))
    }

    /// One pooled client per proxy URL.
    fn proxy_client(&self, proxy: &str) -> CrawlResult<Client> {
        let mut clients = self.proxy_clients.lock();
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = Self::build_client(Some(proxy))?;
        clients.insert(proxy.to_string(), client.clone());
        debug!("Built http client for proxy {}", proxy);
        Ok(client)
    }

    fn extract_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|val| (k.to_string(), val.to_string())))
            .collect()
    }

    async fn fetch(&self, request: Request) -> CrawlResult<Response> {
        let client = match request.proxy.as_deref() {
            Some(proxy) => self.proxy_client(proxy)?,
            None => self.client.clone(),
        };

        let mut req = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(self.timeout);
        if let Some(body) = request.body.clone() {
            req = req.body(body);
        }

        let start_time = Utc::now();
        let response = req.send().await.inspect_err(|_| self.stats.record_transport_error())?;
        let status = response.status().as_u16();
        let headers = Self::extract_headers(&response);
        let raw_body = response.bytes().await?;
        let body = String::from_utf8_lossy(&raw_body).into_owned();

        let elapsed = Utc::now() - start_time;
        let host = request.url.host_str().unwrap_or_default();
        self.stats.record(host, status, raw_body.len(), elapsed);
        trace!(
            "Downloaded {} (status={}, bytes={}, elapsed={}ms)",
            request.url,
            status,
            raw_body.len(),
            elapsed.num_milliseconds()
        );

        let mut response = Response::new(request, status, body).with_headers(headers);
        response.timestamp = start_time;
        Ok(response)
    }
}

impl Module for HttpDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn extra(&self) -> Option<Value> {
        Some(self.stats.to_json())
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, request: Request) -> CrawlResult<Response> {
        let _handling = self.base.start_handling();
        self.base.incr_called();
        request
            .validate()
            .map_err(|e| CrawlError::stage(Stage::Download, e.to_string(), request.url.as_str()))?;
        self.base.incr_accepted();

        debug!("Downloading {} (depth={})", request.url, request.depth);
        let response = self.fetch(request).await?;
        self.base.incr_completed();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> HttpDownloader {
        HttpDownloader::new("D1|127.0.0.1:8080".parse().unwrap(), None).unwrap()
    }

    #[test]
    fn test_proxy_clients_are_reused() {
        let d = downloader();
        d.proxy_client("http://127.0.0.1:3128").unwrap();
        d.proxy_client("http://127.0.0.1:3128").unwrap();
        assert_eq!(d.proxy_clients.lock().len(), 1);
        d.proxy_client("http://127.0.0.1:3129").unwrap();
        assert_eq!(d.proxy_clients.lock().len(), 2);
    }

    #[test]
    fn test_rejects_foreign_mid() {
        assert!(HttpDownloader::new("A1".parse().unwrap(), None).is_err());
    }

    #[tokio::test]
    async fn test_download_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/books"))
            .and(header("x-token", "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>books</body></html>"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let d = downloader();
        let mut request = Request::parse(&format!("{}/books", mock_server.uri()))
            .unwrap()
            .with_depth(2);
        request.set_header("x-token", "abc").unwrap();

        let response = d.download(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.depth, 2);
        assert!(response.body.contains("books"));

        let counts = d.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed), (1, 1, 1));
        assert_eq!(counts.handling, 0);
        assert_eq!(d.stats().snapshot().status_codes.get(&200), Some(&1));
        assert_eq!(d.summary().extra.unwrap()["requests"], 1);
    }

    #[tokio::test]
    async fn test_download_invalid_request_counts() {
        let d = downloader();
        let err = d
            .download(Request::parse("ftp://example.com/a").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Stage { stage: Stage::Download, .. }));
        let counts = d.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_download_transport_error() {
        let d = downloader().with_timeout(Duration::from_secs(2));
        // Nothing listens on port 9 of the loopback interface.
        let err = d
            .download(Request::parse("http://127.0.0.1:9/").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Download);
        let counts = d.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed), (1, 1, 0));
        assert_eq!(d.stats().snapshot().transport_errors, 1);
    }
}
