use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use super::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    Html,
    Json,
    Text,
    Binary,
}

impl ResponseType {
    pub fn detect(headers: &HashMap<String, String>, body: &str) -> Self {
        if let Some(content_type) = headers.get("content-type") {
            return if content_type.contains("text/html") {
                ResponseType::Html
            } else if content_type.contains("application/json") {
                ResponseType::Json
            } else if content_type.contains("text/") {
                ResponseType::Text
            } else {
                ResponseType::Binary
            };
        }
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            ResponseType::Json
        } else if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
            ResponseType::Html
        } else {
            ResponseType::Text
        }
    }
}

/// Fetch result, paired with the request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub response_type: ResponseType,
    pub request: Request,
    pub depth: u32,
}

impl Response {
    pub fn new(request: Request, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let headers = HashMap::new();
        Self {
            url: request.url.clone(),
            status,
            response_type: ResponseType::detect(&headers, &body),
            headers,
            body,
            timestamp: Utc::now(),
            depth: request.depth,
            request,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.response_type = ResponseType::detect(&headers, &self.body);
        self.headers = headers;
        self
    }

    pub fn spider_name(&self) -> &str {
        &self.request.spider_name
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
