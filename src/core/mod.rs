pub mod errors;

pub use errors::{CrawlError, CrawlResult, ErrorKind, RpcError, Stage};
