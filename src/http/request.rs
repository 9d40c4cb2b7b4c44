use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::domain::primary_domain;
use crate::{CrawlError, CrawlResult};

/// One URL fetch task.
///
/// Requests cross the wire when they are distributed to another node, so every
/// field is serializable, including the HTTP method and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(with = "http_serde::method")]
    pub method: Method,
    pub url: Url,
    #[serde(with = "http_serde::header_map")]
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub depth: u32,
    pub proxy: Option<String>,
    pub spider_name: String,
    pub node_name: Option<String>,
    /// Free-form context carried along with the request.
    pub extra: Map<String, Value>,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            depth: 0,
            proxy: None,
            spider_name: String::new(),
            node_name: None,
            extra: Map::new(),
        }
    }

    pub fn parse(url: &str) -> CrawlResult<Self> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_spider_name(mut self, spider_name: impl Into<String>) -> Self {
        self.spider_name = spider_name.into();
        self
    }

    pub fn set_node_name(&mut self, node_name: impl Into<String>) {
        self.node_name = Some(node_name.into());
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    pub fn set_proxy(&mut self, proxy: impl Into<String>) {
        self.proxy = Some(proxy.into());
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> CrawlResult<()> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| CrawlError::Argument(format!("invalid header name {}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CrawlError::Argument(format!("invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn set_user_agent(&mut self, user_agent: &str) -> CrawlResult<()> {
        self.set_header(header::USER_AGENT.as_str(), user_agent)
    }

    pub fn set_referer(&mut self, referer: &str) -> CrawlResult<()> {
        self.set_header(header::REFERER.as_str(), referer)
    }

    pub fn add_cookie(&mut self, key: &str, value: &str) -> CrawlResult<()> {
        let pair = format!("{}={}", key, value);
        let cookie = match self.headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, pair),
            _ => pair,
        };
        self.set_header(header::COOKIE.as_str(), &cookie)
    }

    /// Checks the request can be fetched: http(s) scheme and a host with a primary domain.
    pub fn validate(&self) -> CrawlResult<()> {
        let scheme = self.url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(CrawlError::Argument(format!(
                "unsupported url scheme {:?} ({})",
                scheme, self.url
            )));
        }
        self.primary_domain().map(|_| ())
    }

    pub fn primary_domain(&self) -> CrawlResult<String> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| CrawlError::Argument(format!("url without host: {}", self.url)))?;
        primary_domain(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Request::parse("http://cn.bing.com/search?q=rust")
            .unwrap()
            .validate()
            .is_ok());
        assert!(Request::parse("ftp://example.com/file")
            .unwrap()
            .validate()
            .is_err());
        assert!(Request::parse("data:text/plain,hello")
            .unwrap()
            .validate()
            .is_err());
    }

    #[test]
    fn test_headers_and_cookies() {
        let mut request = Request::parse("https://example.com").unwrap();
        request.set_user_agent("antnest/0.1").unwrap();
        request.add_cookie("a", "1").unwrap();
        request.add_cookie("b", "2").unwrap();
        assert_eq!(request.headers.get("user-agent").unwrap(), "antnest/0.1");
        assert_eq!(request.headers.get("cookie").unwrap(), "a=1; b=2");
        assert!(request.set_header("bad\0name", "x").is_err());
    }

    #[test]
    fn test_wire_format_keeps_method_and_headers() {
        let mut request = Request::parse("https://example.com/post")
            .unwrap()
            .with_method(Method::POST)
            .with_depth(3)
            .with_spider_name("books");
        request.set_referer("https://example.com").unwrap();
        request.set_extra("page", Value::from(2));

        let json = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.method, Method::POST);
        assert_eq!(back.depth, 3);
        assert_eq!(back.spider_name, "books");
        assert_eq!(back.headers.get("referer").unwrap(), "https://example.com");
        assert_eq!(back.extra.get("page"), Some(&Value::from(2)));
    }
}
