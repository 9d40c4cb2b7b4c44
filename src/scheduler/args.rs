use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::http::primary_domain;
use crate::module::{Analyzer, Downloader, Pipeline};
use crate::{CrawlError, CrawlResult};

/// Crawl policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestArgs {
    /// `None` is invalid. An empty list accepts every domain.
    pub accepted_domains: Option<Vec<String>>,
    pub max_depth: u32,
}

impl RequestArgs {
    pub fn new(accepted_domains: Vec<String>, max_depth: u32) -> Self {
        Self {
            accepted_domains: Some(accepted_domains),
            max_depth,
        }
    }

    pub fn check(&self) -> CrawlResult<()> {
        if self.accepted_domains.is_none() {
            return Err(CrawlError::Argument("nil accepted domain list".to_string()));
        }
        Ok(())
    }

    /// Primary domains of the accepted list.
    pub(crate) fn accepted_primary_domains(&self) -> CrawlResult<HashSet<String>> {
        self.accepted_domains
            .iter()
            .flatten()
            .map(|domain| primary_domain(domain))
            .collect()
    }
}

impl Default for RequestArgs {
    fn default() -> Self {
        Self::new(Vec::new(), 1)
    }
}

/// Capacity policy of the four buffer pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataArgs {
    pub req_buffer_cap: u32,
    pub req_max_buffer_number: u32,
    pub resp_buffer_cap: u32,
    pub resp_max_buffer_number: u32,
    pub item_buffer_cap: u32,
    pub item_max_buffer_number: u32,
    pub error_buffer_cap: u32,
    pub error_max_buffer_number: u32,
}

impl DataArgs {
    /// Same capacity and buffer count for every pool.
    pub fn uniform(buffer_cap: u32, max_buffer_number: u32) -> Self {
        Self {
            req_buffer_cap: buffer_cap,
            req_max_buffer_number: max_buffer_number,
            resp_buffer_cap: buffer_cap,
            resp_max_buffer_number: max_buffer_number,
            item_buffer_cap: buffer_cap,
            item_max_buffer_number: max_buffer_number,
            error_buffer_cap: buffer_cap,
            error_max_buffer_number: max_buffer_number,
        }
    }

    pub fn check(&self) -> CrawlResult<()> {
        let fields = [
            ("request buffer capacity", self.req_buffer_cap),
            ("request max buffer number", self.req_max_buffer_number),
            ("response buffer capacity", self.resp_buffer_cap),
            ("response max buffer number", self.resp_max_buffer_number),
            ("item buffer capacity", self.item_buffer_cap),
            ("item max buffer number", self.item_max_buffer_number),
            ("error buffer capacity", self.error_buffer_cap),
            ("error max buffer number", self.error_max_buffer_number),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(CrawlError::Argument(format!("zero {}", name))),
            None => Ok(()),
        }
    }
}

impl Default for DataArgs {
    fn default() -> Self {
        Self::uniform(50, 1000)
    }
}

/// Module instances the scheduler registers at init.
#[derive(Clone, Default)]
pub struct ModuleArgs {
    pub downloaders: Vec<Arc<dyn Downloader>>,
    pub analyzers: Vec<Arc<dyn Analyzer>>,
    pub pipelines: Vec<Arc<dyn Pipeline>>,
}

impl ModuleArgs {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        analyzer: Arc<dyn Analyzer>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Self {
        Self {
            downloaders: vec![downloader],
            analyzers: vec![analyzer],
            pipelines: vec![pipeline],
        }
    }

    pub fn check(&self) -> CrawlResult<()> {
        if self.downloaders.is_empty() {
            return Err(CrawlError::Argument("no downloader".to_string()));
        }
        if self.analyzers.is_empty() {
            return Err(CrawlError::Argument("no analyzer".to_string()));
        }
        if self.pipelines.is_empty() {
            return Err(CrawlError::Argument("no pipeline".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModuleArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleArgs")
            .field("downloaders", &self.downloaders.len())
            .field("analyzers", &self.analyzers.len())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_args() {
        assert!(RequestArgs::new(Vec::new(), 0).check().is_ok());
        let missing = RequestArgs {
            accepted_domains: None,
            max_depth: 0,
        };
        assert!(missing.check().is_err());

        let one = RequestArgs::new(vec!["bing.com".into()], 0);
        assert_eq!(one, RequestArgs::new(vec!["bing.com".into()], 0));
        assert_ne!(one, RequestArgs::new(vec!["bing.com".into()], 1));
        assert_ne!(one, missing);
        assert_ne!(
            one,
            RequestArgs::new(vec!["bing.net".into(), "bing.com".into()], 0)
        );
    }

    #[test]
    fn test_accepted_primary_domains() {
        let args = RequestArgs::new(vec!["cn.bing.com".into(), "news.bbc.co.uk".into()], 0);
        let domains = args.accepted_primary_domains().unwrap();
        assert!(domains.contains("bing.com"));
        assert!(domains.contains("bbc.co.uk"));
    }

    #[test]
    fn test_data_args() {
        assert!(DataArgs::uniform(10, 2).check().is_ok());
        for i in 0..8 {
            let mut values = [2u32; 8];
            values[i] = 0;
            let args = DataArgs {
                req_buffer_cap: values[0],
                req_max_buffer_number: values[1],
                resp_buffer_cap: values[2],
                resp_max_buffer_number: values[3],
                item_buffer_cap: values[4],
                item_max_buffer_number: values[5],
                error_buffer_cap: values[6],
                error_max_buffer_number: values[7],
            };
            assert!(matches!(args.check(), Err(CrawlError::Argument(_))));
        }
    }

    #[test]
    fn test_module_args_requires_every_role() {
        assert!(ModuleArgs::default().check().is_err());
    }
}
