use async_trait::async_trait;
use log::trace;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::http::{Request, Response, ResponseType};
use crate::module::{Data, Item, ResponseParser};
use crate::{CrawlError, CrawlResult, Stage};

/// How a value is pulled out of the nodes a selector matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// Concatenated text of every match.
    Text,
    /// Inner HTML of the first match.
    Html,
    /// Attribute of the first match carrying it.
    Attr(String),
    Texts,
    Htmls,
    Attrs(String),
    /// Literal value, no selector.
    Const(String),
}

/// A field rule written as `<kind>[.<attr>]|<selector>`, e.g. `attr.href|a.next`.
/// A string without `|` is a constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRule {
    pub extract: Extract,
    pub selector: Option<String>,
}

impl FromStr for FieldRule {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((kind, selector)) = s.split_once('|') else {
            return Ok(FieldRule {
                extract: Extract::Const(s.to_string()),
                selector: None,
            });
        };
        let (name, arg) = match kind.split_once('.') {
            Some((name, arg)) => (name, Some(arg.to_string())),
            None => (kind, None),
        };
        let extract = match (name, arg) {
            ("text", None) => Extract::Text,
            ("html", None) => Extract::Html,
            ("texts", None) => Extract::Texts,
            ("htmls", None) => Extract::Htmls,
            ("attr", Some(attr)) => Extract::Attr(attr),
            ("attrs", Some(attr)) => Extract::Attrs(attr),
            _ => {
                return Err(CrawlError::Argument(format!(
                    "unknown field rule kind {:?} in {:?}",
                    kind, s
                )))
            }
        };
        Ok(FieldRule {
            extract,
            selector: Some(selector.to_string()),
        })
    }
}

impl TryFrom<String> for FieldRule {
    type Error = CrawlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector = self.selector.as_deref().unwrap_or_default();
        match &self.extract {
            Extract::Text => write!(f, "text|{}", selector),
            Extract::Html => write!(f, "html|{}", selector),
            Extract::Texts => write!(f, "texts|{}", selector),
            Extract::Htmls => write!(f, "htmls|{}", selector),
            Extract::Attr(attr) => write!(f, "attr.{}|{}", attr, selector),
            Extract::Attrs(attr) => write!(f, "attrs.{}|{}", attr, selector),
            Extract::Const(value) => f.write_str(value),
        }
    }
}

impl From<FieldRule> for String {
    fn from(rule: FieldRule) -> Self {
        rule.to_string()
    }
}

/// Whether a page yields one item, or one item per node matched by a root selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Map,
    Array(String),
}

fn default_url_field() -> Option<String> {
    Some("url".to_string())
}

/// Declarative extraction rules of a spider. Plain data, so it replicates by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Links whose absolute URL matches one of these patterns are followed.
    #[serde(default)]
    pub follow_links: Vec<String>,
    /// Items are only extracted from pages whose URL matches; empty means every page.
    #[serde(default)]
    pub accept_urls: Vec<String>,
    #[serde(default)]
    pub node: NodeMode,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
    /// Fields whose values are URLs to crawl next.
    #[serde(default)]
    pub follow_fields: Vec<String>,
    /// Field the page URL is stored under.
    #[serde(default = "default_url_field")]
    pub url_field: Option<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            follow_links: Vec::new(),
            accept_urls: Vec::new(),
            node: NodeMode::Map,
            fields: BTreeMap::new(),
            follow_fields: Vec::new(),
            url_field: default_url_field(),
        }
    }
}

impl RuleSet {
    pub fn with_follow_link(mut self, pattern: impl Into<String>) -> Self {
        self.follow_links.push(pattern.into());
        self
    }

    pub fn with_accept_url(mut self, pattern: impl Into<String>) -> Self {
        self.accept_urls.push(pattern.into());
        self
    }

    pub fn with_node(mut self, node: NodeMode) -> Self {
        self.node = node;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, rule: &str) -> CrawlResult<Self> {
        self.fields.insert(name.into(), rule.parse()?);
        Ok(self)
    }

    pub fn with_follow_field(mut self, name: impl Into<String>) -> Self {
        self.follow_fields.push(name.into());
        self
    }
}

fn parse_selector(selector: &str) -> CrawlResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| CrawlError::Argument(format!("invalid selector {:?}: {:?}", selector, e)))
}

/// Response parser evaluating a [`RuleSet`].
pub struct RuleParser {
    rules: RuleSet,
    follow_links: Vec<Regex>,
    accept_urls: Vec<Regex>,
}

impl RuleParser {
    /// Compiles patterns and checks every selector up front.
    pub fn new(rules: RuleSet) -> CrawlResult<Self> {
        if let NodeMode::Array(root) = &rules.node {
            parse_selector(root)?;
        }
        for rule in rules.fields.values() {
            if let Some(selector) = &rule.selector {
                parse_selector(selector)?;
            }
        }
        let compile = |patterns: &[String]| -> CrawlResult<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(CrawlError::from))
                .collect()
        };
        Ok(Self {
            follow_links: compile(&rules.follow_links)?,
            accept_urls: compile(&rules.accept_urls)?,
            rules,
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn extract(&self, response: &Response) -> CrawlResult<(Vec<Data>, Vec<CrawlError>)> {
        let mut data = Vec::new();
        let mut errors = Vec::new();
        if response.response_type == ResponseType::Binary {
            return Ok((data, errors));
        }
        let document = Html::parse_document(&response.body);

        if !self.follow_links.is_empty() {
            let anchors = parse_selector("a[href]")?;
            for href in document.select(&anchors).filter_map(|a| a.value().attr("href")) {
                match response.url.join(href) {
                    Ok(url) if self.follow_links.iter().any(|r| r.is_match(url.as_str())) => {
                        data.push(Data::Request(Request::new(url)));
                    }
                    Ok(_) => {}
                    Err(e) => errors.push(link_error(response, href, e)),
                }
            }
        }

        let page = response.url.as_str();
        if self.rules.fields.is_empty()
            || (!self.accept_urls.is_empty() && !self.accept_urls.iter().any(|r| r.is_match(page)))
        {
            return Ok((data, errors));
        }

        let items = match &self.rules.node {
            NodeMode::Map => vec![self.extract_item(document.root_element())?],
            NodeMode::Array(root) => {
                let root = parse_selector(root)?;
                document
                    .select(&root)
                    .map(|node| self.extract_item(node))
                    .collect::<CrawlResult<Vec<_>>>()?
            }
        };

        for mut item in items.into_iter().filter(|item| !is_blank(item)) {
            for field in &self.rules.follow_fields {
                for href in item.get(field).map(urls_of).unwrap_or_default() {
                    match response.url.join(&href) {
                        Ok(url) => data.push(Data::Request(Request::new(url))),
                        Err(e) => errors.push(link_error(response, &href, e)),
                    }
                }
            }
            if let Some(url_field) = &self.rules.url_field {
                item.insert(url_field.clone(), Value::from(page));
            }
            data.push(Data::Item(item));
        }
        Ok((data, errors))
    }

    fn extract_item(&self, node: ElementRef<'_>) -> CrawlResult<Item> {
        let mut item = Item::new();
        for (name, rule) in &self.rules.fields {
            let value = match (&rule.extract, &rule.selector) {
                (Extract::Const(value), _) => Value::from(value.as_str()),
                (_, None) => Value::Null,
                (extract, Some(selector)) => {
                    let selector = parse_selector(selector)?;
                    let mut matches = node.select(&selector);
                    match extract {
                        Extract::Text => Value::from(
                            matches
                                .map(|e| e.text().collect::<String>())
                                .collect::<String>()
                                .trim(),
                        ),
                        Extract::Html => matches
                            .next()
                            .map(|e| Value::from(e.inner_html()))
                            .unwrap_or(Value::Null),
                        Extract::Attr(attr) => matches
                            .find_map(|e| e.value().attr(attr))
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        Extract::Texts => Value::from(
                            matches
                                .map(|e| e.text().collect::<String>().trim().to_string())
                                .collect::<Vec<_>>(),
                        ),
                        Extract::Htmls => {
                            Value::from(matches.map(|e| e.inner_html()).collect::<Vec<_>>())
                        }
                        Extract::Attrs(attr) => Value::from(
                            matches
                                .filter_map(|e| e.value().attr(attr).map(str::to_string))
                                .collect::<Vec<_>>(),
                        ),
                        Extract::Const(_) => Value::Null,
                    }
                }
            };
            item.insert(name.clone(), value);
        }
        Ok(item)
    }
}

fn link_error(response: &Response, href: &str, err: url::ParseError) -> CrawlError {
    CrawlError::stage(
        Stage::Analyze,
        format!("invalid link {:?}: {}", href, err),
        response.url.as_str(),
    )
}

fn urls_of(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_blank(item: &Item) -> bool {
    item.values().all(|value| match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(values) => values.is_empty(),
        _ => false,
    })
}

#[async_trait]
impl ResponseParser for RuleParser {
    async fn parse(&self, response: &Response) -> (Vec<Data>, Vec<CrawlError>) {
        match self.extract(response) {
            Ok((data, errors)) => {
                trace!(
                    "Rules extracted {} data and {} errors from {}",
                    data.len(),
                    errors.len(),
                    response.url
                );
                (data, errors)
            }
            Err(e) => (
                Vec::new(),
                vec![CrawlError::stage(Stage::Analyze, e.to_string(), response.url.as_str())],
            ),
        }
    }
}
