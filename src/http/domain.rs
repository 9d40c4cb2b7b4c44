use std::net::IpAddr;

use crate::{CrawlError, CrawlResult};

// Second-level labels that act as public suffixes under a country code.
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "net", "org", "gov", "edu", "ac"];

/// Returns the registrable ("primary") domain of a host name.
///
/// `cn.bing.com` becomes `bing.com`, `news.bbc.co.uk` becomes `bbc.co.uk`.
/// IP addresses and single-label hosts such as `localhost` are returned as is.
pub fn primary_domain(host: &str) -> CrawlResult<String> {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return Err(CrawlError::Argument("empty host".to_string()));
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return Ok(bare.to_string());
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().any(|label| label.is_empty()) {
        return Err(CrawlError::Argument(format!("malformed host: {}", host)));
    }
    if labels.len() <= 2 {
        return Ok(host);
    }

    let last = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let keep = if last.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        3
    } else {
        2
    };
    Ok(labels[labels.len() - keep..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_domain() {
        assert_eq!(primary_domain("cn.bing.com").unwrap(), "bing.com");
        assert_eq!(primary_domain("bing.com").unwrap(), "bing.com");
        assert_eq!(primary_domain("WWW.Example.ORG.").unwrap(), "example.org");
        assert_eq!(primary_domain("news.bbc.co.uk").unwrap(), "bbc.co.uk");
        assert_eq!(primary_domain("a.b.sina.com.cn").unwrap(), "sina.com.cn");
        assert_eq!(primary_domain("127.0.0.1").unwrap(), "127.0.0.1");
        assert_eq!(primary_domain("localhost").unwrap(), "localhost");
    }

    #[test]
    fn test_primary_domain_rejects_garbage() {
        assert!(primary_domain("").is_err());
        assert!(primary_domain("a..b.com").is_err());
    }
}
